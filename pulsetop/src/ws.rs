//! WebSocket transport to the agent, behind small traits so the reconnect
//! logic can run against an in-memory channel in tests.

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::types::{ClientMessage, ServerMessage};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("send failed: {0}")]
    Send(String),
    #[error("connection closed")]
    Closed,
    #[error("undecodable frame: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One open channel to the agent.
pub trait Transport: Send {
    fn send(&mut self, msg: &ClientMessage) -> impl Future<Output = Result<(), ClientError>> + Send;
    /// Next server frame; `None` once the peer is gone.
    fn recv(&mut self) -> impl Future<Output = Option<Result<ServerMessage, ClientError>>> + Send;
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens fresh transports; called once per connection attempt.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;
    fn connect(&self) -> impl Future<Output = Result<Self::Transport, ClientError>> + Send;
}

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self) -> Result<WsTransport, ClientError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        Ok(WsTransport { ws })
    }
}

pub struct WsTransport {
    ws: WsStream,
}

impl Transport for WsTransport {
    async fn send(&mut self, msg: &ClientMessage) -> Result<(), ClientError> {
        let text = serde_json::to_string(msg)?;
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| ClientError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage, ClientError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(json)) => {
                    return Some(serde_json::from_str(&json).map_err(ClientError::from))
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "websocket read failed");
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
