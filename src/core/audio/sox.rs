//! System audio devices backed by `sox` child processes.
//!
//! Both devices use 16-bit signed-integer mono raw PCM at the configured
//! sample rate:
//!
//! - [`Microphone`]: `sox -d -t raw -b 16 -e signed-integer -c 1 -r <rate> -`
//! - [`Speakers`]: `sox -t raw -b 16 -e signed-integer -c 1 -r <rate> - -d`

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{AudioChunkCallback, AudioError, AudioResult, AudioSink, AudioSource};

/// Program used for capture and playback.
pub const SOX_PROGRAM: &str = "sox";

const READ_BUFFER_BYTES: usize = 4096;

/// How long `Speakers::stop` lets sox finish queued audio before killing it.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn raw_pcm_args(sample_rate: u32) -> Vec<String> {
    vec![
        "-t".into(),
        "raw".into(),
        "-b".into(),
        "16".into(),
        "-e".into(),
        "signed-integer".into(),
        "-c".into(),
        "1".into(),
        "-r".into(),
        sample_rate.to_string(),
    ]
}

fn log_stderr<R>(stderr: R, device: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(device, stderr = %line, "sox stderr");
        }
    })
}

async fn reap(mut child: Child, device: &'static str) -> AudioResult<()> {
    match child.try_wait()? {
        Some(status) => {
            tracing::warn!(device, status = %status, "sox process exited");
            Ok(())
        }
        None => {
            child
                .start_kill()
                .map_err(|e| AudioError::StopFailed(format!("kill sox: {}", e)))?;
            let status = child.wait().await?;
            tracing::debug!(device, status = %status, "sox process exited");
            Ok(())
        }
    }
}

// =============================================================================
// Microphone
// =============================================================================

struct Capture {
    child: Child,
    reader: JoinHandle<()>,
}

/// Default system microphone.
pub struct Microphone {
    sample_rate: u32,
    program: String,
    callback: Arc<Mutex<Option<AudioChunkCallback>>>,
    capture: Mutex<Option<Capture>>,
}

impl Microphone {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            program: SOX_PROGRAM.to_string(),
            callback: Arc::new(Mutex::new(None)),
            capture: Mutex::new(None),
        }
    }

    /// Use a different sox binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn command_args(&self) -> Vec<String> {
        let mut args = vec!["-d".to_string()];
        args.extend(raw_pcm_args(self.sample_rate));
        args.push("-".to_string());
        args
    }
}

#[async_trait]
impl AudioSource for Microphone {
    async fn start(&self) -> AudioResult<()> {
        if self.capture.lock().is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.program)
            .args(self.command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AudioError::StartFailed(format!("{}: {}", self.program, e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| AudioError::StartFailed("sox stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            log_stderr(stderr, "microphone");
        }

        let callback = self.callback.clone();
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; READ_BUFFER_BYTES];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        tracing::trace!(chunk_size = n, "Microphone data received");
                        let current = callback.lock().clone();
                        if let Some(cb) = current {
                            cb(Bytes::copy_from_slice(&buf[..n]));
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Microphone read failed");
                        break;
                    }
                }
            }
        });

        *self.capture.lock() = Some(Capture { child, reader });
        tracing::info!(sample_rate = self.sample_rate, "Microphone started (sox)");
        Ok(())
    }

    async fn stop(&self) -> AudioResult<()> {
        let Some(capture) = self.capture.lock().take() else {
            return Ok(());
        };

        let result = reap(capture.child, "microphone").await;
        capture.reader.abort();
        tracing::info!("Microphone stopped");
        result
    }

    fn on_data(&self, callback: AudioChunkCallback) {
        *self.callback.lock() = Some(callback);
    }
}

// =============================================================================
// Speakers
// =============================================================================

struct Playback {
    child: Child,
    queue: mpsc::UnboundedSender<Bytes>,
    writer: JoinHandle<()>,
}

/// Default system output device.
pub struct Speakers {
    sample_rate: u32,
    program: String,
    playback: Mutex<Option<Playback>>,
}

impl Speakers {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            program: SOX_PROGRAM.to_string(),
            playback: Mutex::new(None),
        }
    }

    /// Use a different sox binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn command_args(&self) -> Vec<String> {
        let mut args = raw_pcm_args(self.sample_rate);
        args.push("-".to_string());
        args.push("-d".to_string());
        args
    }
}

#[async_trait]
impl AudioSink for Speakers {
    async fn start(&self) -> AudioResult<()> {
        if self.playback.lock().is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.program)
            .args(self.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AudioError::StartFailed(format!("{}: {}", self.program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AudioError::StartFailed("sox stdin unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            log_stderr(stderr, "speakers");
        }

        let (queue, mut chunks) = mpsc::unbounded_channel::<Bytes>();
        let writer = tokio::spawn(async move {
            while let Some(chunk) = chunks.recv().await {
                if let Err(e) = stdin.write_all(&chunk).await {
                    tracing::error!(error = %e, "Speaker write failed");
                    return;
                }
            }
            // EOF lets sox play out what it has buffered.
            let _ = stdin.shutdown().await;
        });

        *self.playback.lock() = Some(Playback {
            child,
            queue,
            writer,
        });
        tracing::info!(sample_rate = self.sample_rate, "Speakers started");
        Ok(())
    }

    async fn stop(&self) -> AudioResult<()> {
        let Some(playback) = self.playback.lock().take() else {
            return Ok(());
        };
        let Playback {
            mut child,
            queue,
            writer,
        } = playback;

        drop(queue);
        if tokio::time::timeout(DRAIN_TIMEOUT, writer).await.is_err() {
            tracing::warn!("Speaker queue did not drain in time");
        }

        let exited = tokio::time::timeout(DRAIN_TIMEOUT, child.wait()).await;
        let result = match exited {
            Ok(Ok(status)) => {
                tracing::debug!(status = %status, "sox process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(AudioError::StopFailed(e.to_string())),
            Err(_) => reap(child, "speakers").await,
        };
        tracing::info!("Speakers stopped");
        result
    }

    fn write(&self, chunk: Bytes) {
        if let Some(playback) = self.playback.lock().as_ref() {
            let _ = playback.queue.send(chunk);
        }
    }
}
