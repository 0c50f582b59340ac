//! Base traits and types for the realtime conversation engine.
//!
//! This module defines the seams between the commit/response protocol engine
//! and the things it talks to:
//!
//! - [`DuplexConnector`] / [`DuplexConnection`]: the ordered, bidirectional
//!   channel to the remote voice service.
//! - [`ConversationClient`]: the "send audio, receive audio deltas and turn
//!   completions" contract consumed by the turn orchestrator.
//! - [`ConversationEvent`] and [`ConversationSubscription`]: the closed set of
//!   events a client emits and the ordered receiver handed to each listener.
//!
//! # Audio Format
//!
//! Audio crossing these interfaces is opaque raw PCM. Ordering within a stream
//! is preserved end-to-end.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use super::messages::{ClientEvent, Response, ServerEvent};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the remote service failed (after retries, where retried)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Error reported by the remote service during a session
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Malformed or undecodable payload received from the remote service
    #[error("Protocol data error: {0}")]
    ProtocolData(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded retry with exponential backoff for establishing the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of connection attempts, including the first one.
    /// Default: 3
    pub max_attempts: u32,

    /// Delay after the first failed attempt (milliseconds).
    /// Default: 500ms
    pub initial_delay_ms: u64,

    /// Upper bound for the delay between attempts (milliseconds).
    /// Default: 5000ms
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    /// Returns the delay in milliseconds.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;

        // base_delay * multiplier^(attempt-1), capped
        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1) as i32);
        delay.min(self.max_delay_ms as f64) as u64
    }

    /// Whether another attempt is allowed after `attempt` attempts have failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

// =============================================================================
// Conversation Events
// =============================================================================

/// Events a conversation client emits to its listeners.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// Decoded audio from the remote voice (raw PCM).
    AudioDelta(Bytes),
    /// The remote finished its turn.
    ResponseDone(Response),
}

impl ConversationEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConversationEvent::AudioDelta(_) => "audio_delta",
            ConversationEvent::ResponseDone(_) => "response_done",
        }
    }
}

/// Identifier of a single subscription on a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Ordered stream of [`ConversationEvent`]s for one listener.
///
/// Dropping the subscription is equivalent to unsubscribing; the client prunes
/// closed listeners on the next emit.
#[derive(Debug)]
pub struct ConversationSubscription {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<ConversationEvent>,
}

impl ConversationSubscription {
    /// Create a listener/subscription pair sharing `id`.
    pub fn channel(id: SubscriptionId) -> (EventListener, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (EventListener { id, sender }, Self { id, receiver })
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the emitting side is gone.
    pub async fn recv(&mut self) -> Option<ConversationEvent> {
        self.receiver.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ConversationEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Sending half of a [`ConversationSubscription`].
#[derive(Debug, Clone)]
pub struct EventListener {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<ConversationEvent>,
}

impl EventListener {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

/// The set of listeners a client re-emits events to.
#[derive(Debug, Default)]
pub struct EventListeners {
    listeners: Vec<EventListener>,
}

impl EventListeners {
    pub fn add(&mut self, listener: EventListener) {
        self.listeners.push(listener);
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() != before
    }

    /// Deliver `event` to every live listener, in registration order.
    pub fn emit(&mut self, event: &ConversationEvent) {
        self.listeners
            .retain(|listener| listener.sender.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

// =============================================================================
// Connection Traits
// =============================================================================

/// Establishes [`DuplexConnection`]s to the remote voice service.
///
/// One call is one handshake attempt; retrying is the caller's job.
#[async_trait]
pub trait DuplexConnector: Send + Sync {
    async fn connect(&self) -> RealtimeResult<Box<dyn DuplexConnection>>;

    /// Human readable endpoint description for logs.
    fn describe(&self) -> String;
}

/// An open, ordered, bidirectional channel to the remote voice service.
#[async_trait]
pub trait DuplexConnection: Send {
    /// Queue an outbound command. Never suspends.
    fn send(&mut self, event: ClientEvent) -> RealtimeResult<()>;

    /// Next inbound event, in the order the remote emitted them.
    ///
    /// Returns `None` once the remote side has closed. Must be cancel-safe:
    /// the client polls it inside `tokio::select!`.
    async fn next_event(&mut self) -> Option<ServerEvent>;

    /// Close the channel and wait until the transport acknowledges.
    /// Calling it on an already closed connection is a no-op.
    async fn close(&mut self) -> RealtimeResult<()>;
}

// =============================================================================
// Client Trait
// =============================================================================

/// The contract a turn orchestrator needs from a conversation client.
///
/// # Example
///
/// ```rust,ignore
/// use waav_conversation::core::realtime::{ConversationClient, ConversationEvent};
///
/// let mut events = client.subscribe();
/// client.start().await?;
/// client.send_audio(chunk)?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         ConversationEvent::AudioDelta(pcm) => speakers.write(pcm),
///         ConversationEvent::ResponseDone(_) => break,
///     }
/// }
/// client.stop().await?;
/// ```
#[async_trait]
pub trait ConversationClient: Send {
    /// Connect to the remote service. Fails with
    /// [`RealtimeError::ConnectionFailed`] once retries are exhausted.
    async fn start(&mut self) -> RealtimeResult<()>;

    /// Close the remote connection. Idempotent; the client can be started
    /// again afterwards.
    async fn stop(&mut self) -> RealtimeResult<()>;

    /// Stream one captured chunk to the remote side. Never suspends.
    fn send_audio(&self, chunk: Bytes) -> RealtimeResult<()>;

    /// Register a listener for [`ConversationEvent`]s. Subscriptions survive
    /// `stop()`/`start()` cycles.
    fn subscribe(&mut self) -> ConversationSubscription;

    /// Remove a listener registered with [`subscribe`](Self::subscribe).
    fn unsubscribe(&mut self, id: SubscriptionId);

    /// Whether a remote connection is currently open.
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RealtimeError::ConnectionFailed("test".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = RealtimeError::NotConnected;
        assert_eq!(err.to_string(), "Not connected");
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 500);
        assert_eq!(policy.max_delay_ms, 5000);
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_retry_should_retry() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn test_retry_calculate_delay() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.calculate_delay(1), 500);
        assert_eq!(policy.calculate_delay(2), 1000);
        assert_eq!(policy.calculate_delay(3), 2000);
        assert_eq!(policy.calculate_delay(4), 4000);
        // capped
        assert_eq!(policy.calculate_delay(5), 5000);
        assert_eq!(policy.calculate_delay(12), 5000);
    }

    #[tokio::test]
    async fn test_listeners_emit_in_order_and_prune_closed() {
        let mut listeners = EventListeners::default();
        let (first, mut first_rx) = ConversationSubscription::channel(SubscriptionId(1));
        let (second, second_rx) = ConversationSubscription::channel(SubscriptionId(2));
        listeners.add(first);
        listeners.add(second);
        drop(second_rx);

        listeners.emit(&ConversationEvent::AudioDelta(Bytes::from_static(b"a")));
        listeners.emit(&ConversationEvent::AudioDelta(Bytes::from_static(b"b")));

        assert_eq!(listeners.len(), 1);
        match first_rx.recv().await {
            Some(ConversationEvent::AudioDelta(data)) => assert_eq!(&data[..], b"a"),
            other => panic!("unexpected event: {:?}", other),
        }
        match first_rx.recv().await {
            Some(ConversationEvent::AudioDelta(data)) => assert_eq!(&data[..], b"b"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_listeners_remove() {
        let mut listeners = EventListeners::default();
        let (listener, _rx) = ConversationSubscription::channel(SubscriptionId(7));
        listeners.add(listener);

        assert!(listeners.remove(SubscriptionId(7)));
        assert!(!listeners.remove(SubscriptionId(7)));
        assert!(listeners.is_empty());
    }
}
