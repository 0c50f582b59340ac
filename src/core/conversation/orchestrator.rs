//! Turn orchestrator: one complete conversation session.
//!
//! [`TurnOrchestrator`] composes an [`AudioSource`], an [`AudioSink`] and a
//! [`ConversationClient`]:
//!
//! - captured chunks go to `send_audio` only while the [`TurnGate`] is
//!   listening; chunks captured while the remote speaks are dropped
//! - remote audio deltas close the gate and are written to the sink
//! - turn completion reopens the gate and, in auto-stop mode, ends the session
//!
//! # Architecture
//!
//! `start()` hands the client, the event subscription and the capture
//! channel to a session task that owns the gate. Every reaction runs on that
//! task, so gate transitions never interleave. The task publishes the gate
//! through a `watch` channel that the capture callback reads, so a chunk
//! captured while the remote speaks is dropped before it is ever queued.
//! `stop()` is a request to the session task; the task runs the teardown
//! (source, sink, client) exactly once and records its outcome, which every
//! `stop()` caller receives.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut session = TurnOrchestrator::new(
//!     Box::new(client),
//!     Arc::new(Microphone::new(16000)),
//!     Arc::new(Speakers::new(24000)),
//!     OrchestratorOptions::default(),
//! );
//!
//! session.start().await?;
//! tokio::signal::ctrl_c().await?;
//! session.stop().await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use super::gate::TurnGate;
use crate::core::audio::{AudioError, AudioSink, AudioSource};
use crate::core::realtime::{
    ConversationClient, ConversationEvent, ConversationSubscription, RealtimeError, Response,
};

/// Capacity of the stop request channel.
const CONTROL_CHANNEL_CAPACITY: usize = 8;

// =============================================================================
// Types
// =============================================================================

/// Errors surfaced by [`TurnOrchestrator`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The conversation client failed to connect or disconnect
    #[error("Conversation client error: {0}")]
    Connection(#[from] RealtimeError),

    /// An audio device failed to start or stop
    #[error("Audio device error: {0}")]
    Device(#[from] AudioError),

    /// `start()` was called on a running session
    #[error("Session already started")]
    AlreadyStarted,

    /// `start()` was called after the session ended
    #[error("Session already terminated")]
    Terminated,

    /// The session teardown failed; carries the first teardown error
    #[error("Session teardown failed: {0}")]
    TeardownFailed(String),
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
        }
    }
}

/// Observer invoked with every remote audio chunk.
pub type AiAudioObserver = Arc<dyn Fn(&Bytes) + Send + Sync>;

/// Observer invoked on every remote turn completion.
pub type AiResponseDoneObserver = Arc<dyn Fn(&Response) + Send + Sync>;

/// Session behaviour switches and instrumentation hooks.
#[derive(Clone, Default)]
pub struct OrchestratorOptions {
    /// End the session after the first turn completion.
    pub auto_stop: bool,
    pub on_ai_audio_chunk: Option<AiAudioObserver>,
    pub on_ai_response_done: Option<AiResponseDoneObserver>,
}

impl OrchestratorOptions {
    pub fn auto_stop(mut self, auto_stop: bool) -> Self {
        self.auto_stop = auto_stop;
        self
    }

    pub fn on_ai_audio_chunk(mut self, observer: AiAudioObserver) -> Self {
        self.on_ai_audio_chunk = Some(observer);
        self
    }

    pub fn on_ai_response_done(mut self, observer: AiResponseDoneObserver) -> Self {
        self.on_ai_response_done = Some(observer);
        self
    }
}

impl std::fmt::Debug for OrchestratorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorOptions")
            .field("auto_stop", &self.auto_stop)
            .field("on_ai_audio_chunk", &self.on_ai_audio_chunk.is_some())
            .field("on_ai_response_done", &self.on_ai_response_done.is_some())
            .finish()
    }
}

enum ControlRequest {
    Stop(oneshot::Sender<Result<(), OrchestratorError>>),
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs one half-duplex conversation session.
pub struct TurnOrchestrator {
    correlation_id: Uuid,
    client: Mutex<Option<Box<dyn ConversationClient>>>,
    source: Arc<dyn AudioSource>,
    sink: Arc<dyn AudioSink>,
    options: OrchestratorOptions,
    state: watch::Sender<SessionState>,
    gate: watch::Sender<TurnGate>,
    teardown_error: Arc<Mutex<Option<String>>>,
    control: Option<mpsc::Sender<ControlRequest>>,
}

impl TurnOrchestrator {
    pub fn new(
        client: Box<dyn ConversationClient>,
        source: Arc<dyn AudioSource>,
        sink: Arc<dyn AudioSink>,
        options: OrchestratorOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (gate, _) = watch::channel(TurnGate::Listening);
        Self {
            correlation_id: Uuid::new_v4(),
            client: Mutex::new(Some(client)),
            source,
            sink,
            options,
            state,
            gate,
            teardown_error: Arc::new(Mutex::new(None)),
            control: None,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Current gate position, as last published by the session task.
    pub fn gate(&self) -> TurnGate {
        *self.gate.borrow()
    }

    /// Start the client, wire capture and playback, then start the devices.
    pub async fn start(&mut self) -> Result<(), OrchestratorError> {
        match self.state() {
            SessionState::Idle => {}
            SessionState::Running => return Err(OrchestratorError::AlreadyStarted),
            SessionState::Stopping | SessionState::Stopped => {
                return Err(OrchestratorError::Terminated);
            }
        }

        let started_at = Instant::now();
        let correlation_id = self.correlation_id;
        tracing::info!(correlation_id = %correlation_id, "Session started");

        let mut client = self
            .client
            .get_mut()
            .take()
            .ok_or(OrchestratorError::AlreadyStarted)?;

        // Subscribe first so nothing emitted during the handshake is missed.
        let events = client.subscribe();
        if let Err(e) = client.start().await {
            client.unsubscribe(events.id());
            *self.client.get_mut() = Some(client);
            tracing::error!(correlation_id = %correlation_id, error = %e, "Conversation client failed to start");
            return Err(e.into());
        }

        let (capture_tx, capture_rx) = mpsc::unbounded_channel::<Bytes>();
        let dropped_chunks = Arc::new(AtomicU64::new(0));
        let gate = self.gate.subscribe();
        let dropped_at_capture = dropped_chunks.clone();
        self.source.on_data(Arc::new(move |chunk: Bytes| {
            if !gate.borrow().admits_capture() {
                dropped_at_capture.fetch_add(1, Ordering::Relaxed);
                return;
            }
            // Closed once the session task is gone; late chunks are dropped.
            let _ = capture_tx.send(chunk);
        }));

        if let Err(e) = self.start_devices().await {
            tracing::error!(correlation_id = %correlation_id, error = %e, "Audio device failed to start");
            self.abort_start(client.as_mut()).await;
            return Err(e.into());
        }

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let session = SessionTask {
            correlation_id,
            started_at,
            client,
            source: self.source.clone(),
            sink: self.sink.clone(),
            options: self.options.clone(),
            events,
            events_open: true,
            capture: capture_rx,
            control: control_rx,
            gate: TurnGate::Listening,
            gate_tx: self.gate.clone(),
            state_tx: self.state.clone(),
            teardown_error: self.teardown_error.clone(),
            dropped_chunks,
        };

        self.control = Some(control_tx);
        self.state.send_replace(SessionState::Running);

        let span = tracing::info_span!("session", correlation_id = %correlation_id);
        tokio::spawn(session.run().instrument(span));
        Ok(())
    }

    /// End the session. Only the first request performs the teardown; every
    /// later or overlapping call waits for the session to be over and returns
    /// the recorded teardown outcome.
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        let Some(control) = self.control.as_ref() else {
            if self.state() == SessionState::Idle {
                self.state.send_replace(SessionState::Stopped);
                tracing::info!(correlation_id = %self.correlation_id, "Session stopped before start");
            }
            return Ok(());
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if control.send(ControlRequest::Stop(reply_tx)).await.is_ok() {
            if let Ok(result) = reply_rx.await {
                return result;
            }
        }

        // The teardown already ran on behalf of another caller or auto-stop.
        self.stopped().await;
        match self.teardown_error.lock().clone() {
            Some(message) => Err(OrchestratorError::TeardownFailed(message)),
            None => Ok(()),
        }
    }

    /// Resolve once the session has reached [`SessionState::Stopped`].
    pub async fn stopped(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == SessionState::Stopped).await;
    }

    async fn start_devices(&self) -> Result<(), AudioError> {
        self.source.start().await?;
        self.sink.start().await?;
        Ok(())
    }

    async fn abort_start(&self, client: &mut dyn ConversationClient) {
        if let Err(e) = self.source.stop().await {
            tracing::warn!(correlation_id = %self.correlation_id, error = %e, "Audio source stop failed");
        }
        if let Err(e) = self.sink.stop().await {
            tracing::warn!(correlation_id = %self.correlation_id, error = %e, "Audio sink stop failed");
        }
        if let Err(e) = client.stop().await {
            tracing::warn!(correlation_id = %self.correlation_id, error = %e, "Conversation client stop failed");
        }
        self.state.send_replace(SessionState::Stopped);
    }
}

// =============================================================================
// Session Task
// =============================================================================

struct SessionTask {
    correlation_id: Uuid,
    started_at: Instant,
    client: Box<dyn ConversationClient>,
    source: Arc<dyn AudioSource>,
    sink: Arc<dyn AudioSink>,
    options: OrchestratorOptions,
    events: ConversationSubscription,
    events_open: bool,
    capture: mpsc::UnboundedReceiver<Bytes>,
    control: mpsc::Receiver<ControlRequest>,
    gate: TurnGate,
    gate_tx: watch::Sender<TurnGate>,
    state_tx: watch::Sender<SessionState>,
    teardown_error: Arc<Mutex<Option<String>>>,
    dropped_chunks: Arc<AtomicU64>,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                request = self.control.recv() => {
                    match request {
                        Some(ControlRequest::Stop(reply)) => {
                            let result = self.teardown().await;
                            let _ = reply.send(result);
                        }
                        None => {
                            // Orchestrator dropped without stopping.
                            if let Err(e) = self.teardown().await {
                                tracing::error!(correlation_id = %self.correlation_id, error = %e, "Session teardown failed");
                            }
                        }
                    }
                    break;
                }

                event = self.events.recv(), if self.events_open => match event {
                    Some(ConversationEvent::AudioDelta(pcm)) => self.on_audio_delta(pcm),
                    Some(ConversationEvent::ResponseDone(response)) => {
                        if self.on_response_done(&response) {
                            tracing::info!(
                                correlation_id = %self.correlation_id,
                                response_id = ?response.id,
                                "Auto stopping session after response.done"
                            );
                            if let Err(e) = self.teardown().await {
                                tracing::error!(
                                    correlation_id = %self.correlation_id,
                                    error = %e,
                                    "Failed to auto stop session"
                                );
                            }
                            break;
                        }
                    }
                    None => {
                        tracing::warn!(correlation_id = %self.correlation_id, "Conversation event stream ended");
                        self.events_open = false;
                    }
                },

                Some(chunk) = self.capture.recv() => self.on_capture(chunk),
            }
        }
    }

    fn on_capture(&mut self, chunk: Bytes) {
        // Admitted at capture, but the remote started speaking since.
        if !self.gate.admits_capture() {
            self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if let Err(e) = self.client.send_audio(chunk) {
            tracing::warn!(correlation_id = %self.correlation_id, error = %e, "Failed to forward captured audio");
        }
    }

    fn on_audio_delta(&mut self, pcm: Bytes) {
        if self.gate.on_audio_delta() {
            self.gate_tx.send_replace(self.gate);
            tracing::info!(correlation_id = %self.correlation_id, "AI started speaking - pausing microphone");
        }

        self.sink.write(pcm.clone());
        if let Some(observer) = &self.options.on_ai_audio_chunk {
            observer(&pcm);
        }
    }

    /// Returns whether the session should end now.
    fn on_response_done(&mut self, response: &Response) -> bool {
        if self.gate.on_response_done() {
            self.gate_tx.send_replace(self.gate);
            tracing::info!(
                correlation_id = %self.correlation_id,
                dropped_chunks = self.dropped_chunks.swap(0, Ordering::Relaxed),
                "AI finished speaking - resuming microphone"
            );
        }

        if let Some(observer) = &self.options.on_ai_response_done {
            observer(response);
        }
        self.options.auto_stop
    }

    /// Stop source, sink and client in that order. Every step runs; the
    /// first failure is returned.
    async fn teardown(&mut self) -> Result<(), OrchestratorError> {
        self.state_tx.send_replace(SessionState::Stopping);
        let mut first_error: Option<OrchestratorError> = None;

        if let Err(e) = self.source.stop().await {
            tracing::warn!(correlation_id = %self.correlation_id, error = %e, "Audio source stop failed");
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.sink.stop().await {
            tracing::warn!(correlation_id = %self.correlation_id, error = %e, "Audio sink stop failed");
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.client.stop().await {
            tracing::warn!(correlation_id = %self.correlation_id, error = %e, "Conversation client stop failed");
            first_error.get_or_insert(e.into());
        }

        let duration_ms = self.started_at.elapsed().as_millis() as u64;
        tracing::info!(
            correlation_id = %self.correlation_id,
            duration_ms,
            status = if first_error.is_none() { "completed" } else { "completed_with_errors" },
            "Session ended"
        );

        if let Some(e) = &first_error {
            *self.teardown_error.lock() = Some(e.to_string());
        }
        self.state_tx.send_replace(SessionState::Stopped);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
