// exchange/transport.rs
//
// Connection seam between the feed connector and the wire. The production
// implementation speaks WebSocket through tokio-tungstenite; tests script
// frames through `exchange::mock`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use super::errors::FeedError;

/// Inbound frame, independent of the transport library
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong,
    Close(Option<String>),
}

/// One open feed connection
#[async_trait]
pub trait FeedConnection: Send {
    /// Wait for the next frame. `None` means the stream ended.
    async fn next_frame(&mut self) -> Option<Result<FeedFrame, FeedError>>;

    /// Send a keepalive ping
    async fn send_ping(&mut self, payload: Vec<u8>) -> Result<(), FeedError>;

    /// Answer a server ping
    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<(), FeedError>;

    /// Send a close frame
    async fn close(&mut self) -> Result<(), FeedError>;
}

/// Factory for feed connections
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedConnection>, FeedError>;
}

// =================================================================
// WebSocket transport
// =================================================================

/// WebSocket transport backed by tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedConnection>, FeedError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| FeedError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        debug!("WebSocket connected to {}", url);
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedConnection for WsConnection {
    async fn next_frame(&mut self) -> Option<Result<FeedFrame, FeedError>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(Message::Text(text)) => FeedFrame::Text(text),
                Ok(Message::Binary(data)) => FeedFrame::Binary(data),
                Ok(Message::Ping(payload)) => FeedFrame::Ping(payload),
                Ok(Message::Pong(_)) => FeedFrame::Pong,
                Ok(Message::Close(frame)) => {
                    FeedFrame::Close(frame.map(|f| f.reason.to_string()))
                }
                // Raw frames never surface while reading
                Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(e.into())),
            };
            return Some(Ok(frame));
        }
    }

    async fn send_ping(&mut self, payload: Vec<u8>) -> Result<(), FeedError> {
        self.stream
            .send(Message::Ping(payload))
            .await
            .map_err(|e| FeedError::Ping(e.to_string()))
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> Result<(), FeedError> {
        self.stream.send(Message::Pong(payload)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FeedError> {
        self.stream.send(Message::Close(None)).await?;
        Ok(())
    }
}
