//! Shared test doubles for the integration suites.
//!
//! - [`ScriptedConnector`]: in-memory remote that records every outbound
//!   [`ClientEvent`] and lets a test inject [`ServerEvent`]s
//! - [`RecordingClient`]: [`ConversationClient`] with call counters and a
//!   manual event emitter
//! - [`ManualSource`] / [`RecordingSink`]: devices driven by the test

// Not every suite uses every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use waav_conversation::core::audio::{
    AudioChunkCallback, AudioError, AudioResult, AudioSink, AudioSource,
};
use waav_conversation::core::realtime::{
    ClientEvent, ConversationClient, ConversationEvent, ConversationSubscription,
    DuplexConnection, DuplexConnector, EventListeners, RealtimeError, RealtimeResult, Response,
    ServerEvent, SubscriptionId,
};

/// Upper bound for any wait in the suites.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `condition` every few milliseconds until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// Scripted Remote
// =============================================================================

/// Shared state between a [`ScriptedConnector`] and its connections.
#[derive(Default)]
struct RemoteState {
    sent: Mutex<Vec<ClientEvent>>,
    inject: Mutex<Option<mpsc::UnboundedSender<ServerEvent>>>,
    closes: AtomicU32,
}

/// Connector whose remote side is controlled by the test.
pub struct ScriptedConnector {
    state: Arc<RemoteState>,
    sent_count: watch::Sender<usize>,
    attempts: AtomicU32,
    failures_left: AtomicU32,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Self::failing_first(0)
    }

    /// The first `failures` connection attempts fail with `ConnectionFailed`.
    pub fn failing_first(failures: u32) -> Arc<Self> {
        let (sent_count, _) = watch::channel(0);
        Arc::new(Self {
            state: Arc::new(RemoteState::default()),
            sent_count,
            attempts: AtomicU32::new(0),
            failures_left: AtomicU32::new(failures),
        })
    }

    /// Connector that never connects.
    pub fn unreachable() -> Arc<Self> {
        Self::failing_first(u32::MAX)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Deliver `event` on the current connection.
    pub fn push(&self, event: ServerEvent) {
        let inject = self.state.inject.lock();
        let sender = inject.as_ref().expect("no open scripted connection");
        sender.send(event).expect("scripted connection dropped");
    }

    /// End the current connection from the remote side.
    pub fn hang_up(&self) {
        self.state.inject.lock().take();
    }

    /// Every event sent so far, in order.
    pub fn sent(&self) -> Vec<ClientEvent> {
        self.state.sent.lock().clone()
    }

    /// Wire names of every event sent so far, in order.
    pub fn sent_types(&self) -> Vec<&'static str> {
        self.state.sent.lock().iter().map(ClientEvent::event_type).collect()
    }

    pub fn count_sent(&self, event_type: &str) -> usize {
        self.sent_types().iter().filter(|t| **t == event_type).count()
    }

    /// Wait until at least `count` events were sent, then return them all.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<ClientEvent> {
        let mut sent_count = self.sent_count.subscribe();
        tokio::time::timeout(WAIT_TIMEOUT, sent_count.wait_for(|n| *n >= count))
            .await
            .expect("timed out waiting for outbound events")
            .expect("connector dropped");
        self.sent()
    }
}

#[async_trait]
impl DuplexConnector for ScriptedConnector {
    async fn connect(&self) -> RealtimeResult<Box<dyn DuplexConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RealtimeError::ConnectionFailed("scripted refusal".to_string()));
        }

        let (inject_tx, inbound) = mpsc::unbounded_channel();
        *self.state.inject.lock() = Some(inject_tx);
        Ok(Box::new(ScriptedConnection {
            state: self.state.clone(),
            sent_count: self.sent_count.clone(),
            inbound,
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

struct ScriptedConnection {
    state: Arc<RemoteState>,
    sent_count: watch::Sender<usize>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
    closed: bool,
}

#[async_trait]
impl DuplexConnection for ScriptedConnection {
    fn send(&mut self, event: ClientEvent) -> RealtimeResult<()> {
        if self.closed {
            return Err(RealtimeError::NotConnected);
        }
        let count = {
            let mut sent = self.state.sent.lock();
            sent.push(event);
            sent.len()
        };
        self.sent_count.send_replace(count);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.inbound.recv().await
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        self.closed = true;
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.inbound.close();
        Ok(())
    }
}

// =============================================================================
// Recording Client
// =============================================================================

/// Counters and controls for a [`RecordingClient`] after it has been boxed.
#[derive(Default)]
pub struct ClientProbe {
    pub start_calls: AtomicU32,
    pub stop_calls: AtomicU32,
    audio: Mutex<Vec<Bytes>>,
    listeners: Mutex<EventListeners>,
    connected: Mutex<bool>,
}

impl ClientProbe {
    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn audio(&self) -> Vec<Bytes> {
        self.audio.lock().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn emit_audio(&self, pcm: &'static [u8]) {
        self.emit(ConversationEvent::AudioDelta(Bytes::from_static(pcm)));
    }

    pub fn emit_done(&self) {
        self.emit(ConversationEvent::ResponseDone(Response::default()));
    }

    pub fn emit(&self, event: ConversationEvent) {
        self.listeners.lock().emit(&event);
    }
}

/// [`ConversationClient`] that records calls instead of talking to a remote.
pub struct RecordingClient {
    probe: Arc<ClientProbe>,
    next_subscription: u64,
    fail_start: bool,
    fail_stop: bool,
}

impl RecordingClient {
    pub fn new() -> (Self, Arc<ClientProbe>) {
        let probe = Arc::new(ClientProbe::default());
        (
            Self {
                probe: probe.clone(),
                next_subscription: 0,
                fail_start: false,
                fail_stop: false,
            },
            probe,
        )
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }
}

#[async_trait]
impl ConversationClient for RecordingClient {
    async fn start(&mut self) -> RealtimeResult<()> {
        self.probe.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(RealtimeError::ConnectionFailed("gave up after 3 attempts".to_string()));
        }
        *self.probe.connected.lock() = true;
        Ok(())
    }

    async fn stop(&mut self) -> RealtimeResult<()> {
        self.probe.stop_calls.fetch_add(1, Ordering::SeqCst);
        *self.probe.connected.lock() = false;
        if self.fail_stop {
            return Err(RealtimeError::WebSocketError("close failed".to_string()));
        }
        Ok(())
    }

    fn send_audio(&self, chunk: Bytes) -> RealtimeResult<()> {
        if !*self.probe.connected.lock() {
            return Err(RealtimeError::NotConnected);
        }
        self.probe.audio.lock().push(chunk);
        Ok(())
    }

    fn subscribe(&mut self) -> ConversationSubscription {
        self.next_subscription += 1;
        let (listener, subscription) =
            ConversationSubscription::channel(SubscriptionId(self.next_subscription));
        self.probe.listeners.lock().add(listener);
        subscription
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.probe.listeners.lock().remove(id);
    }

    fn is_connected(&self) -> bool {
        *self.probe.connected.lock()
    }
}

// =============================================================================
// Devices
// =============================================================================

/// Capture device that only produces chunks when the test pushes them.
#[derive(Default)]
pub struct ManualSource {
    callback: Mutex<Option<AudioChunkCallback>>,
    pub start_calls: AtomicU32,
    pub stop_calls: AtomicU32,
    fail_start: bool,
}

impl ManualSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_start() -> Arc<Self> {
        Arc::new(Self {
            fail_start: true,
            ..Self::default()
        })
    }

    /// Deliver a captured chunk to the registered callback.
    pub fn push(&self, chunk: &'static [u8]) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(Bytes::from_static(chunk));
        }
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSource for ManualSource {
    async fn start(&self) -> AudioResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(AudioError::StartFailed("no capture device".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) -> AudioResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_data(&self, callback: AudioChunkCallback) {
        *self.callback.lock() = Some(callback);
    }
}

/// Playback device recording every written chunk.
#[derive(Default)]
pub struct RecordingSink {
    chunks: Mutex<Vec<Bytes>>,
    pub start_calls: AtomicU32,
    pub stop_calls: AtomicU32,
    fail_start: bool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_start() -> Arc<Self> {
        Arc::new(Self {
            fail_start: true,
            ..Self::default()
        })
    }

    pub fn chunks(&self) -> Vec<Bytes> {
        self.chunks.lock().clone()
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn start(&self) -> AudioResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(AudioError::StartFailed("no playback device".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) -> AudioResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write(&self, chunk: Bytes) {
        self.chunks.lock().push(chunk);
    }
}
