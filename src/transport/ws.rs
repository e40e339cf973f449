//! tokio-tungstenite-backed WebSocket transport.

use super::{Socket, SocketFactory, SocketFrame};
use crate::error::{QueueflowError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Opens one WebSocket per WS-transport submission.
pub struct TungsteniteSocketFactory;

#[async_trait]
impl SocketFactory for TungsteniteSocketFactory {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>> {
        debug!(url, "Connecting WebSocket");
        let (inner, _response) = connect_async(url)
            .await
            .map_err(|e| QueueflowError::Socket(e.to_string()))?;
        Ok(Box::new(TungsteniteSocket { inner }))
    }
}

struct TungsteniteSocket {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for TungsteniteSocket {
    async fn send(&mut self, payload: Value) -> Result<()> {
        self.inner
            .send(Message::Text(payload.to_string()))
            .await
            .map_err(|e| QueueflowError::Socket(e.to_string()))
    }

    async fn next_frame(&mut self) -> SocketFrame {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return SocketFrame::Text(text),
                Some(Ok(Message::Close(_))) | None => return SocketFrame::Closed { clean: true },
                // Pings and pongs are handled by the library; binary frames
                // are not part of this protocol.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket errored");
                    return SocketFrame::Closed { clean: false };
                }
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
