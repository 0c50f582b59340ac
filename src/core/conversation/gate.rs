//! Turn gate: keeps the human and the remote voice out of each other's turn.
//!
//! While the remote is speaking the gate is [`TurnGate::Suspended`] and
//! captured audio must be dropped, not queued. The first audio delta of a turn
//! closes the gate; the turn's completion reopens it.

/// Which party may currently stream audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnGate {
    /// Capture flows to the remote.
    #[default]
    Listening,
    /// The remote is speaking; capture is discarded.
    Suspended,
}

impl TurnGate {
    /// Whether captured audio may be forwarded.
    #[must_use]
    pub fn admits_capture(&self) -> bool {
        matches!(self, TurnGate::Listening)
    }

    /// Remote audio arrived. Returns `true` if this closed the gate.
    pub fn on_audio_delta(&mut self) -> bool {
        let opened = self.admits_capture();
        *self = TurnGate::Suspended;
        opened
    }

    /// The remote finished its turn. Returns `true` if this reopened the gate.
    pub fn on_response_done(&mut self) -> bool {
        let closed = !self.admits_capture();
        *self = TurnGate::Listening;
        closed
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TurnGate::Listening => "listening",
            TurnGate::Suspended => "suspended",
        }
    }
}
