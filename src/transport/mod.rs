//! Transport seams.
//!
//! Every network touchpoint of the engine goes through one of three traits:
//! plain HTTP requests, server-sent event streams, and WebSockets. The
//! session wires in the reqwest/tungstenite implementations by default; tests
//! substitute programmable fakes. Keeping the seams this narrow is what lets
//! the submission engine be exercised frame by frame without a server.

pub mod http;
pub mod sse;
pub mod ws;

use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;
use std::collections::HashMap;

pub use http::ReqwestTransport;
pub use sse::ReqwestEventStreamFactory;
pub use ws::TungsteniteSocketFactory;

/// Extra request headers, e.g. auth headers for shared-GPU hosts.
pub type Headers = HashMap<String, String>;

/// Status and decoded body of an HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    /// Decoded JSON body; `Value::Null` when the body is empty or not JSON
    pub body: Value,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// JSON-over-HTTP requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value, headers: &Headers) -> Result<HttpReply>;

    async fn get_json(&self, url: &str) -> Result<HttpReply>;
}

/// One message delivered on an SSE stream.
#[derive(Debug, Clone)]
pub struct StreamFrame {
    /// The raw `data:` payload of the event
    pub data: String,
}

/// Opens server-sent event streams.
///
/// All streams of a session (queue join, the shared data stream, the
/// heartbeat) come from the one injected factory.
#[async_trait]
pub trait EventStreamFactory: Send + Sync {
    async fn connect(&self, url: &str) -> Result<BoxStream<'static, Result<StreamFrame>>>;
}

/// One inbound WebSocket event.
#[derive(Debug, Clone)]
pub enum SocketFrame {
    Text(String),
    /// Terminal: the socket is gone. `clean` mirrors the close handshake.
    Closed { clean: bool },
}

/// A connected WebSocket, one per WS-transport submission.
#[async_trait]
pub trait Socket: Send {
    /// Send one JSON text frame.
    async fn send(&mut self, payload: Value) -> Result<()>;

    /// Receive the next frame. `Closed` is terminal; callers stop reading
    /// after it.
    async fn next_frame(&mut self) -> SocketFrame;

    /// Close the socket. Errors are ignored; the socket is done either way.
    async fn close(&mut self);
}

/// Opens WebSocket connections.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>>;
}
