use std::time::Instant;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{Endpoint, SyncConfig};
use crate::error::{Result, SyncError};
use crate::utils::current_unix_millis;

/// A live, bidirectional text channel to the room server.
///
/// `recv` must be cancel-safe: the session polls it inside `select!`.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<()>;

    /// `None` once the peer has closed the channel.
    async fn recv(&mut self) -> Option<Result<String>>;

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()>;

    fn label(&self) -> &str {
        ""
    }

    fn last_rtt_ms(&self) -> Option<f32> {
        None
    }
}

/// Opens a [`Transport`] for a room. One call is one handshake attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, room_id: &str) -> Result<Box<dyn Transport>>;
}

/// WebSocket connector that tries each configured endpoint in turn.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoints: Vec<Endpoint>,
}

impl WsConnector {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.endpoints.clone())
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, room_id: &str) -> Result<Box<dyn Transport>> {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            let url = room_url(&endpoint.url, room_id)?;
            match connect_async(url.as_str()).await {
                Ok((stream, _)) => {
                    info!("Connected to {} room server at {}", endpoint.label, url);
                    return Ok(Box::new(WsTransport::new(stream, endpoint.label.clone())));
                }
                Err(e) => {
                    warn!(
                        "Failed to connect to {} room server at {}: {}",
                        endpoint.label, url, e
                    );
                    last_error = Some(SyncError::transport(e));
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SyncError::Transport("no endpoints configured".into())))
    }
}

/// Address a room on a base endpoint: `ws://host/ws` becomes `ws://host/ws?room=<id>`.
pub fn room_url(base: &str, room_id: &str) -> Result<Url> {
    let mut url = Url::parse(base).map_err(|e| SyncError::Transport(format!("bad endpoint {base}: {e}")))?;
    url.query_pairs_mut().append_pair("room", room_id);
    Ok(url)
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    label: String,
    pending_ping: Option<(u64, Instant)>,
    last_rtt_ms: Option<f32>,
}

impl WsTransport {
    pub fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, label: String) -> Self {
        Self {
            stream,
            label,
            pending_ping: None,
            last_rtt_ms: None,
        }
    }

    fn record_pong(&mut self, payload: &[u8]) {
        if payload.len() < 8 {
            return;
        }
        let mut nonce_bytes = [0u8; 8];
        nonce_bytes.copy_from_slice(&payload[..8]);
        let nonce = u64::from_le_bytes(nonce_bytes);
        if let Some((expected, sent_at)) = self.pending_ping {
            if expected == nonce {
                self.last_rtt_ms = Some(sent_at.elapsed().as_secs_f32() * 1000.0);
                self.pending_ping = None;
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(SyncError::transport)
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(WsMessage::Pong(payload))) => self.record_pong(&payload),
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!("{} room server closed the socket: {:?}", self.label, frame);
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some(Err(SyncError::transport(e))),
                None => return None,
            }
        }
    }

    async fn ping(&mut self) -> Result<()> {
        let nonce = Uuid::new_v4().as_u128() as u64;
        self.pending_ping = Some((nonce, Instant::now()));

        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&nonce.to_le_bytes());
        payload.extend_from_slice(&current_unix_millis().to_le_bytes());
        self.stream
            .send(WsMessage::Ping(payload.into()))
            .await
            .map_err(SyncError::transport)
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.close(None).await.map_err(SyncError::transport)
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn last_rtt_ms(&self) -> Option<f32> {
        self.last_rtt_ms
    }
}
