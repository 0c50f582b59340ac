//! Local audio capture and playback.
//!
//! The conversation engine consumes devices only through the [`AudioSource`]
//! and [`AudioSink`] traits. Chunks are opaque raw PCM (16-bit signed
//! little-endian mono for the bundled devices) and ordering within a stream is
//! preserved.
//!
//! # Devices
//!
//! - [`FakeAudioSource`] / [`FakeAudioSink`]: silent 20ms frames and an
//!   in-memory recorder, for dry runs and tests
//! - [`Microphone`] / [`Speakers`]: `sox` child processes bound to the
//!   default system devices

mod fake;
mod sox;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use fake::{FAKE_CHUNK_BYTES, FAKE_CHUNK_INTERVAL, FakeAudioSink, FakeAudioSource};
pub use sox::{Microphone, SOX_PROGRAM, Speakers};

/// Errors that can occur while driving an audio device.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Device could not be started
    #[error("Failed to start audio device: {0}")]
    StartFailed(String),

    /// Device could not be stopped cleanly
    #[error("Failed to stop audio device: {0}")]
    StopFailed(String),

    /// Underlying I/O failure
    #[error("Audio I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for audio device operations.
pub type AudioResult<T> = Result<T, AudioError>;

/// Callback receiving captured chunks in capture order.
pub type AudioChunkCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// A capture device producing raw PCM chunks.
#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn start(&self) -> AudioResult<()>;

    async fn stop(&self) -> AudioResult<()>;

    /// Replace the data callback. Chunks captured while no callback is set
    /// are discarded.
    fn on_data(&self, callback: AudioChunkCallback);
}

/// A playback device accepting raw PCM chunks.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn start(&self) -> AudioResult<()>;

    async fn stop(&self) -> AudioResult<()>;

    /// Queue a chunk for playback. Never blocks; chunks play in write order.
    fn write(&self, chunk: Bytes);
}
