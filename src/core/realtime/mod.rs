//! Realtime conversation protocol module.
//!
//! This module turns a stream of raw audio chunks into the remote voice
//! service's turn-based protocol and back.
//!
//! # Architecture
//!
//! - `DuplexConnector` / `DuplexConnection` traits abstract the transport
//!   ([`WebSocketConnector`] for the real service, [`LoopbackConnector`] for
//!   dry runs)
//! - [`CommitScheduler`] + [`DeferredTask`] hold the batching state machine
//! - [`RealtimeConversationClient`] drives both and implements
//!   [`ConversationClient`]
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian mono, base64-encoded on the wire.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_conversation::core::realtime::{
//!     ConversationClient, ConversationEvent, RealtimeConversationClient, SessionConfiguration,
//!     WebSocketConnector,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let connector = Arc::new(WebSocketConnector::new("sk-...", "gpt-realtime-2025-08-28"));
//!     let mut client = RealtimeConversationClient::new(connector, SessionConfiguration::default());
//!
//!     let mut events = client.subscribe();
//!     client.start().await.unwrap();
//!
//!     while let Some(event) = events.recv().await {
//!         if let ConversationEvent::AudioDelta(pcm) = event {
//!             // play pcm
//!         }
//!     }
//! }
//! ```

mod base;
mod client;
mod loopback;
mod messages;
mod scheduler;
mod session;
mod websocket;

pub use base::{
    ConversationClient, ConversationEvent, ConversationSubscription, DuplexConnection,
    DuplexConnector, EventListener, EventListeners, RealtimeError, RealtimeResult, RetryPolicy,
    SubscriptionId,
};
pub use client::RealtimeConversationClient;
pub use loopback::{LoopbackConnection, LoopbackConnector};
pub use messages::{
    ApiError, AudioPayload, ClientEvent, ContentPart, ConversationItem, Response, ServerEvent,
};
pub use scheduler::{AppendOutcome, CHUNK_LOG_INTERVAL, CommitScheduler, CommitState, DeferredTask};
pub use session::{
    AudioFormat, DEFAULT_REALTIME_MODEL, DEFAULT_TRANSCRIPTION_MODEL, InputAudioTranscription,
    OPENAI_REALTIME_URL, SessionConfiguration, TurnDetection, Voice,
};
pub use websocket::{WebSocketConnection, WebSocketConnector};
