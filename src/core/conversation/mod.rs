//! Conversation sessions: turn gating and session lifecycle.

mod gate;
mod orchestrator;

pub use gate::TurnGate;
pub use orchestrator::{
    AiAudioObserver, AiResponseDoneObserver, OrchestratorError, OrchestratorOptions,
    SessionState, TurnOrchestrator,
};
