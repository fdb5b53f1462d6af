//! WebSocket relay connector

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use peercall_core::relay::{FrameSink, FrameStream, RelayLink};
use peercall_core::{RelayConfig, RelayConnector, RelayError};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};
use url::Url;

/// How long a connect attempt (TCP + handshake) may take
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The relay URL cannot be used for a WebSocket connection
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported relay URL scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),
}

/// Opens a fresh WebSocket to the relay on every [`connect`](RelayConnector::connect)
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: &str) -> Result<Self, ConnectorError> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Self {
                url,
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            }),
            other => Err(ConnectorError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Result<Self, ConnectorError> {
        Self::new(&config.url)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self) -> Result<RelayLink, RelayError> {
        debug!("Opening WebSocket to {}", self.url);
        let (socket, response) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                RelayError::Connect(format!(
                    "timed out after {:?} connecting to {}",
                    self.connect_timeout, self.url
                ))
            })?
            .map_err(|e| RelayError::Connect(e.to_string()))?;

        info!("WebSocket to {} open (HTTP {})", self.url, response.status());
        let (write, read) = socket.split();
        Ok(RelayLink::new(WsSink { inner: write }, WsStream { inner: read }))
    }
}

struct WsSink {
    inner: SplitSink<Socket, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: String) -> Result<(), RelayError> {
        self.inner.send(Message::Text(frame)).await.map_err(|e| match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => RelayError::Closed,
            other => RelayError::Send(other.to_string()),
        })
    }

    async fn close(&mut self) {
        // Sends the close frame; errors mean the peer is already gone
        if let Err(e) = self.inner.close().await {
            trace!("WebSocket close: {}", e);
        }
    }
}

struct WsStream {
    inner: SplitStream<Socket>,
}

#[async_trait]
impl FrameStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("Ignoring non-UTF-8 binary frame from relay"),
                },
                Ok(Message::Close(frame)) => {
                    debug!("Relay closed the WebSocket: {:?}", frame);
                    return None;
                }
                // Pings are answered by tungstenite itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(RelayError::Connect(e.to_string()))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_ws_and_wss() {
        assert!(WsConnector::new("ws://localhost:8080/relay").is_ok());
        let connector = WsConnector::new("wss://relay.example.com").unwrap();
        assert_eq!(connector.url().host_str(), Some("relay.example.com"));
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            WsConnector::new("http://localhost:8080"),
            Err(ConnectorError::UnsupportedScheme(scheme)) if scheme == "http"
        ));
        assert!(matches!(WsConnector::new("not a url"), Err(ConnectorError::InvalidUrl(_))));
    }

    #[test]
    fn test_from_config() {
        let config = RelayConfig::new("ws://127.0.0.1:9000");
        let connector = WsConnector::from_config(&config)
            .unwrap()
            .with_connect_timeout(Duration::from_secs(2));
        assert_eq!(connector.connect_timeout, Duration::from_secs(2));
        assert_eq!(connector.url().port(), Some(9000));
    }
}
