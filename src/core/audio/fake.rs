//! Fake devices for dry runs and tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{AudioChunkCallback, AudioResult, AudioSink, AudioSource};

/// Size of each fake capture chunk (10ms of 16kHz PCM16 mono).
pub const FAKE_CHUNK_BYTES: usize = 320;

/// Interval between fake capture chunks.
pub const FAKE_CHUNK_INTERVAL: Duration = Duration::from_millis(20);

/// Emits a silent chunk every [`FAKE_CHUNK_INTERVAL`] while started.
#[derive(Default)]
pub struct FakeAudioSource {
    callback: std::sync::Arc<Mutex<Option<AudioChunkCallback>>>,
    running: Mutex<Option<CancellationToken>>,
}

impl FakeAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

#[async_trait]
impl AudioSource for FakeAudioSource {
    async fn start(&self) -> AudioResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let callback = self.callback.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FAKE_CHUNK_INTERVAL);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let current = callback.lock().clone();
                        if let Some(cb) = current {
                            cb(Bytes::from(vec![0u8; FAKE_CHUNK_BYTES]));
                        }
                    }
                }
            }
        });

        *running = Some(token);
        tracing::debug!("Fake audio source started");
        Ok(())
    }

    async fn stop(&self) -> AudioResult<()> {
        if let Some(token) = self.running.lock().take() {
            token.cancel();
            tracing::debug!("Fake audio source stopped");
        }
        Ok(())
    }

    fn on_data(&self, callback: AudioChunkCallback) {
        *self.callback.lock() = Some(callback);
    }
}

/// Records every written chunk.
#[derive(Default)]
pub struct FakeAudioSink {
    chunks: Mutex<Vec<Bytes>>,
}

impl FakeAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks written so far, in write order.
    pub fn chunks(&self) -> Vec<Bytes> {
        self.chunks.lock().clone()
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.lock().iter().map(Bytes::len).sum()
    }
}

#[async_trait]
impl AudioSink for FakeAudioSink {
    async fn start(&self) -> AudioResult<()> {
        Ok(())
    }

    async fn stop(&self) -> AudioResult<()> {
        Ok(())
    }

    fn write(&self, chunk: Bytes) {
        self.chunks.lock().push(chunk);
    }
}
