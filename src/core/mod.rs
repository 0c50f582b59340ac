pub mod audio;
pub mod conversation;
pub mod realtime;

// Re-export commonly used types for convenience
pub use audio::{AudioError, AudioResult, AudioSink, AudioSource};

pub use conversation::{
    OrchestratorError, OrchestratorOptions, SessionState, TurnGate, TurnOrchestrator,
};

pub use realtime::{
    ConversationClient, ConversationEvent, RealtimeConversationClient, RealtimeError,
    RealtimeResult, SessionConfiguration,
};
