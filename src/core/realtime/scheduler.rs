//! Commit/response batching state machine.
//!
//! [`CommitScheduler`] holds the protocol state owned by the realtime client:
//! whether a response is in flight, whether audio arrived while it was, and
//! whether a commit cycle is armed. It never performs I/O; callers act on
//! the decisions it returns.
//!
//! [`DeferredTask`] is the single-slot timer that fires the armed commit.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut scheduler = CommitScheduler::default();
//! let mut deferred = DeferredTask::default();
//!
//! if scheduler.on_audio_appended().arm_commit {
//!     deferred.schedule(Duration::ZERO);
//! }
//! deferred.elapsed().await;
//! scheduler.on_commit_due(); // send commit + response.create
//! ```

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Appended chunks between diagnostic log lines.
pub const CHUNK_LOG_INTERVAL: u64 = 100;

/// Response tracking for the commit/response protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitState {
    /// No commit+response pair in flight.
    #[default]
    Idle,
    /// A commit+response pair is in flight.
    AwaitingResponse,
    /// A pair is in flight and audio arrived after it was sent.
    AwaitingResponseWithBufferedAudio,
}

impl CommitState {
    pub fn is_pending(&self) -> bool {
        !matches!(self, CommitState::Idle)
    }

    pub fn has_buffered_audio(&self) -> bool {
        matches!(self, CommitState::AwaitingResponseWithBufferedAudio)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Idle => "idle",
            CommitState::AwaitingResponse => "awaiting_response",
            CommitState::AwaitingResponseWithBufferedAudio => "awaiting_response_buffered",
        }
    }
}

/// Outcome of an appended chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Arm the deferred commit.
    pub arm_commit: bool,
    /// Emit the periodic chunk counter log line.
    pub log_chunk_count: bool,
}

/// Pure commit/response scheduler.
#[derive(Debug, Default)]
pub struct CommitScheduler {
    state: CommitState,
    commit_scheduled: bool,
    chunk_count: u64,
}

impl CommitScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CommitState {
        self.state
    }

    pub fn commit_scheduled(&self) -> bool {
        self.commit_scheduled
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// Record a chunk that was just appended to the remote input buffer.
    ///
    /// While a response is pending the audio is marked buffered and nothing
    /// is armed. Otherwise a commit is armed unless one already is.
    pub fn on_audio_appended(&mut self) -> AppendOutcome {
        self.chunk_count += 1;
        let log_chunk_count = self.chunk_count % CHUNK_LOG_INTERVAL == 0;

        let arm_commit = match self.state {
            CommitState::Idle => self.arm(),
            CommitState::AwaitingResponse | CommitState::AwaitingResponseWithBufferedAudio => {
                self.state = CommitState::AwaitingResponseWithBufferedAudio;
                false
            }
        };

        AppendOutcome {
            arm_commit,
            log_chunk_count,
        }
    }

    /// The armed commit fired: the caller sends commit then response.create.
    pub fn on_commit_due(&mut self) {
        self.commit_scheduled = false;
        self.state = CommitState::AwaitingResponse;
    }

    /// The remote finished a response.
    ///
    /// Returns whether a commit must be armed to flush audio buffered while
    /// the response was pending.
    pub fn on_response_done(&mut self) -> bool {
        let buffered = self.state.has_buffered_audio();
        self.state = CommitState::Idle;
        self.chunk_count = 0;
        buffered && self.arm()
    }

    /// The armed commit was cancelled without firing.
    pub fn on_commit_cancelled(&mut self) {
        self.commit_scheduled = false;
    }

    /// Back to the initial state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn arm(&mut self) -> bool {
        if self.commit_scheduled {
            return false;
        }
        self.commit_scheduled = true;
        true
    }
}

// =============================================================================
// Deferred Task
// =============================================================================

/// Single-slot deferred timer.
///
/// `elapsed()` stays pending while nothing is scheduled, so it can sit in a
/// `tokio::select!` branch permanently.
#[derive(Debug, Default)]
pub struct DeferredTask {
    slot: Option<Pin<Box<Sleep>>>,
}

impl DeferredTask {
    /// Arm the task to fire after `delay`. No-op when already armed.
    pub fn schedule(&mut self, delay: Duration) -> bool {
        if self.slot.is_some() {
            return false;
        }
        self.slot = Some(Box::pin(tokio::time::sleep_until(Instant::now() + delay)));
        true
    }

    /// Disarm. Returns whether a task was armed.
    pub fn cancel(&mut self) -> bool {
        self.slot.take().is_some()
    }

    pub fn is_scheduled(&self) -> bool {
        self.slot.is_some()
    }

    /// Resolve when the armed task fires, clearing the slot.
    ///
    /// Cancel-safe: dropping the future leaves the task armed.
    pub async fn elapsed(&mut self) {
        match self.slot.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.slot = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
