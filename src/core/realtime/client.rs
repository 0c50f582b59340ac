//! Realtime conversation client.
//!
//! [`RealtimeConversationClient`] wraps a [`DuplexConnection`] and hides the
//! remote service's commit/response protocol behind a chunk-streaming
//! contract:
//!
//! - every chunk passed to `send_audio` is appended to the remote input
//!   buffer immediately
//! - appended audio is committed in batches; a burst of chunks produces one
//!   `input_audio_buffer.commit` + `response.create` pair
//! - at most one pair is in flight; audio arriving meanwhile is flushed by a
//!   single pair right after `response.done`
//! - remote audio deltas and turn completions are re-emitted as
//!   [`ConversationEvent`]s
//!
//! # Architecture
//!
//! `start()` connects (with retry) and spawns a driver task that owns the
//! connection, the [`CommitScheduler`] and the commit timer. The client talks
//! to it over an unbounded command channel, so `send_audio` never suspends.
//! The driver polls commands, then remote events, then the timer; a queued
//! burst is drained before the timer gets a chance to fire.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_conversation::core::realtime::{
//!     ConversationClient, RealtimeConversationClient, SessionConfiguration, WebSocketConnector,
//! };
//!
//! let connector = Arc::new(WebSocketConnector::new(api_key, model));
//! let mut client = RealtimeConversationClient::new(connector, SessionConfiguration::default());
//! let mut events = client.subscribe();
//!
//! client.start().await?;
//! client.send_audio(chunk)?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::base::{
    ConversationClient, ConversationEvent, ConversationSubscription, DuplexConnection,
    DuplexConnector, EventListeners, RealtimeError, RealtimeResult, RetryPolicy, SubscriptionId,
};
use super::messages::{ApiError, ClientEvent, Response, ServerEvent};
use super::scheduler::{CommitScheduler, DeferredTask};
use super::session::SessionConfiguration;

// =============================================================================
// Client
// =============================================================================

/// Commands from the client handle to its driver task.
#[derive(Debug)]
enum ClientCommand {
    Audio(Bytes),
}

struct DriverLink {
    commands: mpsc::UnboundedSender<ClientCommand>,
    driver: JoinHandle<RealtimeResult<()>>,
}

/// Conversation client speaking the realtime commit/response protocol.
pub struct RealtimeConversationClient {
    connector: Arc<dyn DuplexConnector>,
    session: SessionConfiguration,
    retry_policy: RetryPolicy,
    commit_debounce: Duration,
    listeners: Arc<Mutex<EventListeners>>,
    next_subscription: u64,
    link: Option<DriverLink>,
}

impl RealtimeConversationClient {
    /// Create a client. Nothing connects until `start()`.
    pub fn new(connector: Arc<dyn DuplexConnector>, session: SessionConfiguration) -> Self {
        Self {
            connector,
            session,
            retry_policy: RetryPolicy::default(),
            commit_debounce: Duration::ZERO,
            listeners: Arc::new(Mutex::new(EventListeners::default())),
            next_subscription: 0,
            link: None,
        }
    }

    /// Override the connection retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Delay between the first appended chunk of a batch and its commit.
    pub fn with_commit_debounce(mut self, commit_debounce: Duration) -> Self {
        self.commit_debounce = commit_debounce;
        self
    }

    pub fn session(&self) -> &SessionConfiguration {
        &self.session
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    async fn connect_with_retry(&self) -> RealtimeResult<Box<dyn DuplexConnection>> {
        let endpoint = self.connector.describe();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.connector.connect().await {
                Ok(connection) => return Ok(connection),
                Err(e) if self.retry_policy.should_retry(attempt) => {
                    let delay_ms = self.retry_policy.calculate_delay(attempt);
                    tracing::warn!(
                        endpoint = %endpoint,
                        attempt,
                        max_attempts = self.retry_policy.max_attempts,
                        delay_ms,
                        error = %e,
                        "Realtime API connection attempt failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) => {
                    tracing::error!(
                        endpoint = %endpoint,
                        attempts = attempt,
                        error = %e,
                        "Realtime API connection failed"
                    );
                    return Err(RealtimeError::ConnectionFailed(format!(
                        "gave up after {} attempts: {}",
                        attempt, e
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl ConversationClient for RealtimeConversationClient {
    async fn start(&mut self) -> RealtimeResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        // Reap a driver that ended because the remote closed.
        if self.link.is_some() {
            self.stop().await?;
        }

        let connection = self.connect_with_retry().await?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let driver = ClientDriver {
            connection,
            commands: commands_rx,
            scheduler: CommitScheduler::new(),
            deferred: DeferredTask::default(),
            listeners: self.listeners.clone(),
            session: self.session.clone(),
            commit_debounce: self.commit_debounce,
            session_configured: false,
        };
        let handle = tokio::spawn(driver.run().in_current_span());

        self.link = Some(DriverLink {
            commands: commands_tx,
            driver: handle,
        });

        tracing::info!(endpoint = %self.connector.describe(), "Realtime API connected");
        Ok(())
    }

    async fn stop(&mut self) -> RealtimeResult<()> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };

        // Closing the command channel tells the driver to shut down.
        drop(link.commands);

        match link.driver.await {
            Ok(result) => result,
            Err(e) => Err(RealtimeError::ConnectionFailed(format!(
                "client driver task failed: {}",
                e
            ))),
        }
    }

    fn send_audio(&self, chunk: Bytes) -> RealtimeResult<()> {
        let link = self.link.as_ref().ok_or(RealtimeError::NotConnected)?;
        link.commands
            .send(ClientCommand::Audio(chunk))
            .map_err(|_| RealtimeError::NotConnected)
    }

    fn subscribe(&mut self) -> ConversationSubscription {
        self.next_subscription += 1;
        let (listener, subscription) =
            ConversationSubscription::channel(SubscriptionId(self.next_subscription));
        self.listeners.lock().add(listener);
        subscription
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.listeners.lock().remove(id);
    }

    fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| !link.commands.is_closed())
    }
}

impl Drop for RealtimeConversationClient {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.driver.abort();
        }
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Task owning the connection and the protocol state for one connection.
struct ClientDriver {
    connection: Box<dyn DuplexConnection>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    scheduler: CommitScheduler,
    deferred: DeferredTask,
    listeners: Arc<Mutex<EventListeners>>,
    session: SessionConfiguration,
    commit_debounce: Duration,
    session_configured: bool,
}

impl ClientDriver {
    async fn run(mut self) -> RealtimeResult<()> {
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                event = self.connection.next_event() => match event {
                    Some(event) => self.handle_server_event(event),
                    None => {
                        tracing::warn!("Realtime connection closed by remote");
                        break;
                    }
                },

                _ = self.deferred.elapsed() => self.fire_commit(),
            }
        }

        if self.deferred.cancel() {
            self.scheduler.on_commit_cancelled();
        }
        let result = self.connection.close().await;
        match &result {
            Ok(()) => tracing::info!("Realtime API disconnected"),
            Err(e) => tracing::warn!(error = %e, "Realtime API close failed"),
        }
        result
    }

    fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Audio(chunk) => self.append_audio(&chunk),
        }
    }

    fn append_audio(&mut self, chunk: &[u8]) {
        self.send(ClientEvent::audio_append(chunk));

        let outcome = self.scheduler.on_audio_appended();
        if outcome.log_chunk_count {
            tracing::debug!(chunks = self.scheduler.chunk_count(), "Audio chunks sent");
        }
        if outcome.arm_commit {
            self.deferred.schedule(self.commit_debounce);
        }
    }

    /// Commit the input buffer and ask for a response.
    fn fire_commit(&mut self) {
        self.scheduler.on_commit_due();
        self.send(ClientEvent::InputAudioBufferCommit);
        self.send(ClientEvent::ResponseCreate);
        tracing::debug!(state = self.scheduler.state().as_str(), "Audio buffer committed");
    }

    fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { .. } => {
                if !self.session_configured {
                    self.session_configured = true;
                    self.configure_session();
                }
            }

            ServerEvent::AudioDelta { delta, .. } => match delta.decode() {
                Ok(pcm) => self.emit(ConversationEvent::AudioDelta(Bytes::from(pcm))),
                Err(e) => {
                    let err = RealtimeError::ProtocolData(format!("audio delta: {}", e));
                    tracing::warn!(error = %err, "Dropping undecodable audio delta");
                }
            },

            ServerEvent::ResponseDone { response } => self.handle_response_done(response),

            ServerEvent::InputAudioTranscriptionCompleted {
                event_id,
                item_id,
                content_index,
                transcript,
            } => {
                if !transcript.is_empty() {
                    tracing::info!(
                        role = "user",
                        transcript = %transcript,
                        item_id = ?item_id,
                        content_index = ?content_index,
                        event_id = ?event_id,
                        "User audio transcript captured"
                    );
                }
            }

            ServerEvent::Error { error } => log_remote_error(&error),

            ServerEvent::Unknown => {}
        }
    }

    fn configure_session(&mut self) {
        self.send(ClientEvent::SessionUpdate {
            session: self.session.clone(),
        });
        tracing::info!(voice = %self.session.voice, "Realtime session configured");

        self.send(ClientEvent::ResponseCreate);
        tracing::info!("Initial greeting requested");
    }

    fn handle_response_done(&mut self, response: Response) {
        if self.scheduler.on_response_done() {
            self.deferred.schedule(self.commit_debounce);
        }

        let segments = response.assistant_transcripts();
        if !segments.is_empty() {
            tracing::info!(
                role = "assistant",
                response_id = ?response.id,
                status = ?response.status,
                transcript = %response.assistant_transcript(),
                transcript_segments = ?segments,
                "Assistant transcript captured"
            );
        }

        self.emit(ConversationEvent::ResponseDone(response));
    }

    fn send(&mut self, event: ClientEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.connection.send(event) {
            tracing::error!(event_type, error = %e, "Failed to send realtime event");
        }
    }

    fn emit(&self, event: ConversationEvent) {
        self.listeners.lock().emit(&event);
    }
}

fn log_remote_error(error: &ApiError) {
    let err = RealtimeError::ProviderError(error.message.clone());
    tracing::error!(
        error = %err,
        error_type = %error.error_type,
        code = ?error.code,
        param = ?error.param,
        "Realtime client error"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::LoopbackConnector;

    #[tokio::test]
    async fn test_send_audio_requires_connection() {
        let client = RealtimeConversationClient::new(
            Arc::new(LoopbackConnector::new()),
            SessionConfiguration::default(),
        );

        let result = client.send_audio(Bytes::from_static(&[0u8; 4]));
        assert!(matches!(result, Err(RealtimeError::NotConnected)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut client = RealtimeConversationClient::new(
            Arc::new(LoopbackConnector::new()),
            SessionConfiguration::default(),
        );
        assert!(client.stop().await.is_ok());
        assert!(client.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_start_stop_start() {
        let mut client = RealtimeConversationClient::new(
            Arc::new(LoopbackConnector::new()),
            SessionConfiguration::default(),
        );

        client.start().await.unwrap();
        assert!(client.is_connected());
        // second start is a no-op
        client.start().await.unwrap();

        client.stop().await.unwrap();
        assert!(!client.is_connected());
        assert!(matches!(
            client.send_audio(Bytes::from_static(b"x")),
            Err(RealtimeError::NotConnected)
        ));

        client.start().await.unwrap();
        assert!(client.send_audio(Bytes::from_static(b"x")).is_ok());
        client.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscription_ids_are_unique() {
        let mut client = RealtimeConversationClient::new(
            Arc::new(LoopbackConnector::new()),
            SessionConfiguration::default(),
        );
        let first = client.subscribe();
        let second = client.subscribe();
        assert_ne!(first.id(), second.id());

        client.unsubscribe(first.id());
        assert_eq!(client.listeners.lock().len(), 1);
    }

    #[test]
    fn test_builder_defaults() {
        let client = RealtimeConversationClient::new(
            Arc::new(LoopbackConnector::new()),
            SessionConfiguration::default(),
        )
        .with_commit_debounce(Duration::from_millis(5));

        assert_eq!(client.retry_policy().max_attempts, 3);
        assert_eq!(client.commit_debounce, Duration::from_millis(5));
        assert_eq!(client.session().voice.as_str(), "alloy");
    }
}
