//! WebSocket transport for the Realtime API.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON text frames
//! - Auth: `Authorization: Bearer <key>`, `OpenAI-Beta: realtime=v1`
//!
//! Each connection spawns a pump task that serializes outbound
//! [`ClientEvent`]s, parses inbound frames into [`ServerEvent`]s, answers
//! pings and performs the close handshake.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::Instrument;
use url::Url;

use super::base::{DuplexConnection, DuplexConnector, RealtimeError, RealtimeResult};
use super::messages::{ClientEvent, ServerEvent};
use super::session::OPENAI_REALTIME_URL;

/// How long `close()` waits for the server's close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Connector
// =============================================================================

/// Connects to the Realtime API over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    api_key: String,
    model: String,
    base_url: String,
}

impl WebSocketConnector {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_REALTIME_URL.to_string(),
        }
    }

    /// Point the connector at a different endpoint (e.g. a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Endpoint URL with the `model` query parameter.
    pub fn build_ws_url(&self) -> RealtimeResult<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("invalid realtime url: {}", e))
        })?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(RealtimeError::InvalidConfiguration(format!(
                    "unsupported realtime url scheme: {}",
                    other
                )));
            }
        }
        url.query_pairs_mut().append_pair("model", &self.model);
        Ok(url)
    }

    fn build_request(&self, url: &Url) -> RealtimeResult<http::Request<()>> {
        let host = url
            .host_str()
            .ok_or_else(|| RealtimeError::InvalidConfiguration("realtime url has no host".into()))?;
        let host = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        http::Request::builder()
            .uri(url.as_str())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header(
                "Sec-WebSocket-Key",
                tungstenite::handshake::client::generate_key(),
            )
            .header("Sec-WebSocket-Version", "13")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Host", host)
            .body(())
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl DuplexConnector for WebSocketConnector {
    async fn connect(&self) -> RealtimeResult<Box<dyn DuplexConnection>> {
        if self.api_key.trim().is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let url = self.build_ws_url()?;
        let request = self.build_request(&url)?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_handshake_error)?;

        tracing::debug!(model = %self.model, "WebSocket handshake complete");
        Ok(Box::new(WebSocketConnection::spawn(ws_stream)))
    }

    fn describe(&self) -> String {
        format!("{}?model={}", self.base_url, self.model)
    }
}

fn map_handshake_error(error: tungstenite::Error) -> RealtimeError {
    match error {
        tungstenite::Error::Http(response)
            if response.status() == http::StatusCode::UNAUTHORIZED
                || response.status() == http::StatusCode::FORBIDDEN =>
        {
            RealtimeError::AuthenticationFailed(format!("HTTP {}", response.status()))
        }
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

// =============================================================================
// Connection
// =============================================================================

/// An open WebSocket to the Realtime API.
pub struct WebSocketConnection {
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
    pump: Option<JoinHandle<()>>,
}

impl WebSocketConnection {
    fn spawn(ws_stream: WsStream) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump(ws_stream, outbound_rx, inbound_tx).in_current_span());

        Self {
            outbound: Some(outbound_tx),
            inbound: inbound_rx,
            pump: Some(pump),
        }
    }
}

#[async_trait]
impl DuplexConnection for WebSocketConnection {
    fn send(&mut self, event: ClientEvent) -> RealtimeResult<()> {
        let outbound = self.outbound.as_ref().ok_or(RealtimeError::NotConnected)?;
        outbound
            .send(event)
            .map_err(|_| RealtimeError::WebSocketError("connection closed".to_string()))
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.inbound.recv().await
    }

    async fn close(&mut self) -> RealtimeResult<()> {
        self.outbound.take();
        if let Some(pump) = self.pump.take() {
            pump.await
                .map_err(|e| RealtimeError::WebSocketError(format!("pump task failed: {}", e)))?;
        }
        Ok(())
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn pump(
    ws_stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    inbound: mpsc::UnboundedSender<ServerEvent>,
) {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    loop {
        tokio::select! {
            event = outbound.recv() => match event {
                Some(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            let err = RealtimeError::SerializationError(e.to_string());
                            tracing::error!(error = %err, "Failed to serialize event");
                            continue;
                        }
                    };

                    if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                        tracing::error!(error = %e, "Failed to send WebSocket message");
                        return;
                    }
                }
                None => {
                    // Local close: send our close frame, then wait for the peer's.
                    if let Err(e) = ws_sink.close().await {
                        tracing::debug!(error = %e, "WebSocket close frame not sent");
                        return;
                    }
                    let drained = tokio::time::timeout(CLOSE_TIMEOUT, async {
                        while let Some(Ok(msg)) = ws_stream.next().await {
                            if msg.is_close() {
                                break;
                            }
                        }
                    })
                    .await;
                    if drained.is_err() {
                        tracing::warn!("Timed out waiting for WebSocket close acknowledgement");
                    }
                    return;
                }
            },

            msg = ws_stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            // Receiver gone means the client is shutting down.
                            let _ = inbound.send(event);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to parse server event");
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                        tracing::error!(error = %e, "Failed to send pong");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "WebSocket closed by server");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let err = RealtimeError::WebSocketError(e.to_string());
                    tracing::error!(error = %err, "WebSocket error");
                    return;
                }
                None => return,
            },
        }
    }
}
