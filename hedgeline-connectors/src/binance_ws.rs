//! Binance WebSocket Combined Stream
//!
//! One socket carrying the symbol's kline feed and the account's user-data
//! feed. Frames are handed to the session layer as raw text; this module only
//! manages the socket and decides when the stream has ended.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WebSocketMessage, WebSocketStream};
use tracing::{debug, error, info, warn};

use hedgeline_exec::StreamChannel;

/// Type alias for the WebSocket stream (with auto TLS).
pub(crate) type WsStream = WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Read timeout in seconds.
///
/// Binance pings every 3 minutes, so a healthy socket is never silent this long.
pub const READ_TIMEOUT_SECS: u64 = 240;

/// Errors that can occur in the Binance WebSocket clients.
#[derive(Debug, Error)]
pub enum BinanceWsError {
    /// Failed to connect to WebSocket.
    #[error("Failed to connect to WebSocket: {0}")]
    ConnectionFailed(String),

    /// Failed to send message.
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Invalid message format.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Request signing failed.
    #[error("Failed to sign request: {0}")]
    SignatureError(String),

    /// API returned an error for a request.
    #[error("Binance API error: {code} - {msg}")]
    ApiError { code: i64, msg: String },

    /// Channel closed unexpectedly.
    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    /// Timed out waiting for message.
    #[error("Timed out waiting for message")]
    Timeout,
}

/// Combined market + user-data stream.
pub struct BinanceStream {
    /// Socket, `None` once the stream has ended
    ws_stream: Option<WsStream>,
    /// Maximum silence before the stream counts as dead
    read_timeout: Duration,
}

impl BinanceStream {
    /// Connect to a combined stream URL.
    pub async fn connect(url: &str) -> Result<Self, BinanceWsError> {
        Self::connect_with_timeout(url, Duration::from_secs(READ_TIMEOUT_SECS)).await
    }

    /// Connect with a custom read timeout.
    pub async fn connect_with_timeout(url: &str, read_timeout: Duration) -> Result<Self, BinanceWsError> {
        // The URL embeds the listen key; log only the host part
        let host = url.split("/stream").next().unwrap_or(url);
        info!(%host, "Connecting to Binance combined stream");

        let (ws_stream, _) =
            connect_async(url).await.map_err(|e| BinanceWsError::ConnectionFailed(e.to_string()))?;

        info!(%host, "Connected to Binance combined stream");
        Ok(Self { ws_stream: Some(ws_stream), read_timeout })
    }

    /// Check if the stream is still open.
    pub fn is_connected(&self) -> bool {
        self.ws_stream.is_some()
    }
}

#[async_trait]
impl StreamChannel for BinanceStream {
    async fn next_message(&mut self) -> Option<String> {
        loop {
            let ws = self.ws_stream.as_mut()?;

            match timeout(self.read_timeout, ws.next()).await {
                Ok(Some(Ok(WebSocketMessage::Text(text)))) => return Some(text),
                Ok(Some(Ok(WebSocketMessage::Ping(_)))) => {
                    // tungstenite queues the pong and flushes it on the next read
                    debug!("Received ping from Binance");
                },
                Ok(Some(Ok(WebSocketMessage::Pong(_)))) => {
                    debug!("Received pong from Binance");
                },
                Ok(Some(Ok(WebSocketMessage::Close(frame)))) => {
                    warn!(?frame, "WebSocket connection closed by server");
                    self.ws_stream = None;
                    return None;
                },
                Ok(Some(Ok(_))) => {
                    // Ignore binary and raw frames
                },
                Ok(Some(Err(e))) => {
                    error!(error = %e, "WebSocket error");
                    self.ws_stream = None;
                    return None;
                },
                Ok(None) => {
                    warn!("WebSocket stream ended");
                    self.ws_stream = None;
                    return None;
                },
                Err(_) => {
                    error!(timeout_secs = self.read_timeout.as_secs(), "Timeout waiting for message");
                    self.close().await;
                    return None;
                },
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut ws) = self.ws_stream.take() {
            if let Err(e) = ws.close(None).await {
                debug!(error = %e, "Error closing combined stream");
            }
            // Drain until the close handshake completes or the peer vanishes
            let _ = timeout(Duration::from_secs(1), async {
                while let Some(Ok(_)) = ws.next().await {}
            })
            .await;
            info!("Combined stream closed");
        }
    }
}
