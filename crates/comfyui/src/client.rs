//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for a single
//! ComfyUI instance. Call [`ComfyUIClient::connect`] to establish a
//! live [`ComfyUIConnection`] scoped to one client id.

use std::time::Duration;

use async_trait::async_trait;
use comfybridge_core::config::BridgeConfig;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// A stream of raw WebSocket frames from ComfyUI.
///
/// Dropping the stream closes the underlying connection.
pub type EventStream = BoxStream<'static, Result<Message, tungstenite::Error>>;

/// Something that can open an event stream for a client id.
///
/// [`ComfyUIClient`] is the production implementation; tests feed
/// scripted frames through their own sources.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn open(&self, client_id: &str) -> Result<EventStream, ComfyUIClientError>;
}

/// Configuration handle for a ComfyUI instance.
///
/// Stores the WebSocket URL needed to receive execution events. Create
/// a [`ComfyUIConnection`] by calling [`connect`](Self::connect).
pub struct ComfyUIClient {
    ws_url: String,
    connect_timeout: Duration,
}

/// A live WebSocket connection to a ComfyUI instance.
#[derive(Debug)]
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl ComfyUIClient {
    /// Create a new client targeting a ComfyUI instance.
    ///
    /// * `ws_url`          - WebSocket base URL, e.g. `ws://host:8188`.
    /// * `connect_timeout` - bound on the handshake.
    pub fn new(ws_url: String, connect_timeout: Duration) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            connect_timeout,
        }
    }

    /// Build a client from the bridge configuration.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.ws_url(), config.request_timeout)
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Event endpoint for `client_id`, with the id form-encoded into
    /// the query.
    pub fn endpoint(&self, client_id: &str) -> Result<String, ComfyUIClientError> {
        reqwest::Url::parse_with_params(&format!("{}/ws", self.ws_url), [("clientId", client_id)])
            .map(String::from)
            .map_err(|e| ComfyUIClientError::Connection(format!("Invalid WebSocket URL {}: {e}", self.ws_url)))
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// `client_id` is passed as a query parameter so that ComfyUI only
    /// addresses this job's execution messages to this socket.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.endpoint(client_id)?;

        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                ComfyUIClientError::Connection(format!(
                    "Timed out connecting to ComfyUI at {} after {:?}",
                    self.ws_url, self.connect_timeout
                ))
            })?;

        let (ws_stream, _response) = handshake.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }
}

#[async_trait]
impl EventSource for ComfyUIClient {
    async fn open(&self, client_id: &str) -> Result<EventStream, ComfyUIClientError> {
        let conn = self.connect(client_id).await?;
        Ok(conn.ws_stream.boxed())
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
