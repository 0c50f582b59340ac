//! In-process loopback remote for dry runs.
//!
//! The loopback speaks the same wire events as the real service without any
//! network: committed input audio is echoed back as `response.audio.delta`
//! events followed by `response.done` whenever `response.create` arrives.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::base::{DuplexConnection, DuplexConnector, RealtimeError, RealtimeResult};
use super::messages::{ClientEvent, ContentPart, ConversationItem, Response, ServerEvent};

/// Connector producing [`LoopbackConnection`]s.
#[derive(Debug, Default)]
pub struct LoopbackConnector {
    connections: AtomicU64,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections handed out so far.
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DuplexConnector for LoopbackConnector {
    async fn connect(&self) -> RealtimeResult<Box<dyn DuplexConnection>> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackConnection::new()))
    }

    fn describe(&self) -> String {
        "loopback".to_string()
    }
}

/// Echoing in-memory connection.
pub struct LoopbackConnection {
    buffered: Vec<Vec<u8>>,
    committed: Vec<Vec<u8>>,
    responses: u64,
    inbound_tx: Option<mpsc::UnboundedSender<ServerEvent>>,
    inbound_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl LoopbackConnection {
    fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            buffered: Vec::new(),
            committed: Vec::new(),
            responses: 0,
            inbound_tx: Some(inbound_tx),
            inbound_rx,
        }
    }

    fn respond(&mut self, inbound: &mpsc::UnboundedSender<ServerEvent>) {
        self.responses += 1;
        let chunks = std::mem::take(&mut self.committed);
        let echoed: usize = chunks.iter().map(Vec::len).sum();

        for chunk in &chunks {
            let _ = inbound.send(ServerEvent::audio_delta(chunk));
        }

        let response = Response {
            id: Some(format!("loopback_resp_{}", self.responses)),
            status: Some("completed".to_string()),
            output: vec![ConversationItem {
                id: None,
                role: Some("assistant".to_string()),
                content: vec![ContentPart {
                    content_type: Some("audio".to_string()),
                    text: None,
                    transcript: Some(format!("echoed {} bytes", echoed)),
                }],
            }],
        };
        let _ = inbound.send(ServerEvent::ResponseDone { response });
    }
}

#[async_trait]
impl DuplexConnection for LoopbackConnection {
    fn send(&mut self, event: ClientEvent) -> RealtimeResult<()> {
        let inbound = self.inbound_tx.clone().ok_or(RealtimeError::NotConnected)?;

        match event {
            ClientEvent::InputAudioBufferAppend { audio } => {
                let pcm = ServerEvent::decode_audio_delta(&audio)
                    .map_err(|e| RealtimeError::ProtocolData(e.to_string()))?;
                self.buffered.push(pcm);
            }
            ClientEvent::InputAudioBufferCommit => {
                self.committed.append(&mut self.buffered);
            }
            ClientEvent::ResponseCreate => self.respond(&inbound),
            ClientEvent::SessionUpdate { .. } => {}
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.inbound_rx.recv().await
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        self.inbound_tx.take();
        self.buffered.clear();
        self.committed.clear();
        Ok(())
    }
}
