//! Shared helpers for the submission integration tests.
//!
//! The engine is exercised frame by frame through programmable transports:
//! [`MockHttp`] answers POSTs from scripted responses and records every
//! request, [`MockSse`] hands out channel-backed event streams the test
//! feeds, and [`MockWs`] does the same for WebSockets. All tests run on a
//! current-thread runtime, so `settle()` deterministically drains the
//! spawned drivers between steps.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use queueflow::client::api::{ApiInfo, EndpointInfo};
use queueflow::client::config::{AppConfig, Dependency, Protocol};
use queueflow::error::{QueueflowError, Result};
use queueflow::submit::{Event, EventKind, Submission};
use queueflow::transport::{
    EventStreamFactory, Headers, HttpReply, HttpTransport, Socket, SocketFactory, SocketFrame,
    StreamFrame,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

static TRACING: Once = Once::new();

/// Route engine tracing through the test harness. `RUST_LOG=queueflow=debug`
/// makes a failing frame sequence readable.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Let every spawned driver and stream task run to its next suspension.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Config fixtures
// ---------------------------------------------------------------------------

/// App config with `/predict` (fn 0) and `/gen` (fn 1), both queued.
/// Every scenario builds its client through here, so tracing is installed
/// as a side effect.
pub fn app_config(protocol: Protocol) -> AppConfig {
    init_tracing();
    AppConfig {
        root: "http://app.test".to_string(),
        path: String::new(),
        protocol,
        version: "4.19.1".to_string(),
        dependencies: vec![
            Dependency {
                id: Some(0),
                api_name: Some("predict".to_string()),
                queue: None,
                zerogpu: false,
                show_api: true,
            },
            Dependency {
                id: Some(1),
                api_name: Some("gen".to_string()),
                queue: None,
                zerogpu: false,
                show_api: true,
            },
        ],
        components: Vec::new(),
        space_id: None,
        auth_required: false,
        enable_queue: true,
    }
}

/// API view matching [`app_config`].
pub fn api_info() -> ApiInfo {
    let mut api = ApiInfo::default();
    api.named_endpoints
        .insert("predict".to_string(), EndpointInfo::default());
    api.named_endpoints
        .insert("gen".to_string(), EndpointInfo::default());
    api
}

// ---------------------------------------------------------------------------
// HTTP mock
// ---------------------------------------------------------------------------

/// Scripted HTTP transport. Responses are matched by URL substring and
/// consumed in order; the last response for a route sticks.
pub struct MockHttp {
    routes: Mutex<HashMap<String, VecDeque<(u16, Value)>>>,
    posts: Mutex<Vec<(String, Value)>>,
}

impl MockHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            posts: Mutex::new(Vec::new()),
        })
    }

    /// Queue a response for any request whose URL contains `route`.
    pub fn respond(&self, route: &str, status: u16, body: Value) {
        self.routes
            .lock()
            .entry(route.to_string())
            .or_default()
            .push_back((status, body));
    }

    /// Every recorded POST as `(url, body)`, in request order.
    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().clone()
    }

    /// The recorded POSTs whose URL contains `route`.
    pub fn posts_to(&self, route: &str) -> Vec<Value> {
        self.posts
            .lock()
            .iter()
            .filter(|(url, _)| url.contains(route))
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn reply_for(&self, url: &str) -> HttpReply {
        let mut routes = self.routes.lock();
        let key = routes
            .keys()
            .find(|route| url.contains(route.as_str()))
            .cloned();
        match key {
            Some(key) => {
                let queue = routes.get_mut(&key).expect("route exists");
                let (status, body) = if queue.len() > 1 {
                    queue.pop_front().expect("non-empty queue")
                } else {
                    queue.front().cloned().unwrap_or((404, Value::Null))
                };
                HttpReply { status, body }
            }
            None => HttpReply {
                status: 404,
                body: Value::Null,
            },
        }
    }
}

#[async_trait]
impl HttpTransport for MockHttp {
    async fn post_json(&self, url: &str, body: &Value, _headers: &Headers) -> Result<HttpReply> {
        self.posts.lock().push((url.to_string(), body.clone()));
        Ok(self.reply_for(url))
    }

    async fn get_json(&self, url: &str) -> Result<HttpReply> {
        Ok(self.reply_for(url))
    }
}

// ---------------------------------------------------------------------------
// SSE mock
// ---------------------------------------------------------------------------

/// Feeds frames into a stream the engine connected by URL substring.
pub struct StreamController {
    tx: mpsc::UnboundedSender<Result<StreamFrame>>,
}

impl StreamController {
    /// Push one JSON frame.
    pub fn frame(&self, value: Value) {
        let _ = self.tx.send(Ok(StreamFrame {
            data: value.to_string(),
        }));
    }

    /// Push a transport-level error.
    pub fn error(&self, message: &str) {
        let _ = self
            .tx
            .send(Err(QueueflowError::Stream(message.to_string())));
    }

    /// Whether the engine has dropped its end of the stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Event-stream factory backed by pre-registered channels.
pub struct MockSse {
    pending: Mutex<HashMap<String, mpsc::UnboundedReceiver<Result<StreamFrame>>>>,
}

impl MockSse {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Register a stream for the next connect whose URL contains `route`.
    pub fn expect(&self, route: &str) -> StreamController {
        let (tx, rx) = mpsc::unbounded_channel();
        self.pending.lock().insert(route.to_string(), rx);
        StreamController { tx }
    }
}

#[async_trait]
impl EventStreamFactory for MockSse {
    async fn connect(&self, url: &str) -> Result<BoxStream<'static, Result<StreamFrame>>> {
        let mut pending = self.pending.lock();
        let key = pending
            .keys()
            .find(|route| url.contains(route.as_str()))
            .cloned()
            .ok_or_else(|| QueueflowError::Stream(format!("unexpected stream connect: {url}")))?;
        let rx = pending.remove(&key).expect("registered stream");
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

// ---------------------------------------------------------------------------
// WebSocket mock
// ---------------------------------------------------------------------------

/// Controls one scripted socket: inbound frames in, outbound sends recorded.
pub struct SocketController {
    tx: mpsc::UnboundedSender<SocketFrame>,
    sent: Arc<Mutex<Vec<Value>>>,
    closed: Arc<AtomicBool>,
}

impl SocketController {
    pub fn frame(&self, value: Value) {
        let _ = self.tx.send(SocketFrame::Text(value.to_string()));
    }

    pub fn close(&self, clean: bool) {
        let _ = self.tx.send(SocketFrame::Closed { clean });
    }

    /// Everything the engine sent, decoded.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockSocket {
    rx: mpsc::UnboundedReceiver<SocketFrame>,
    sent: Arc<Mutex<Vec<Value>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Socket for MockSocket {
    async fn send(&mut self, payload: Value) -> Result<()> {
        self.sent.lock().push(payload);
        Ok(())
    }

    async fn next_frame(&mut self) -> SocketFrame {
        match self.rx.recv().await {
            Some(frame) => frame,
            None => SocketFrame::Closed { clean: true },
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Socket factory handing out scripted sockets in registration order.
pub struct MockWs {
    sockets: Mutex<VecDeque<MockSocket>>,
    urls: Mutex<Vec<String>>,
}

impl MockWs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sockets: Mutex::new(VecDeque::new()),
            urls: Mutex::new(Vec::new()),
        })
    }

    /// Script the next socket the factory will hand out.
    pub fn expect(&self) -> SocketController {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.sockets.lock().push_back(MockSocket {
            rx,
            sent: sent.clone(),
            closed: closed.clone(),
        });
        SocketController { tx, sent, closed }
    }

    /// URLs the engine connected to, in order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl SocketFactory for MockWs {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>> {
        self.urls.lock().push(url.to_string());
        self.sockets
            .lock()
            .pop_front()
            .map(|socket| Box::new(socket) as Box<dyn Socket>)
            .ok_or_else(|| QueueflowError::Socket(format!("unexpected socket connect: {url}")))
    }
}

// ---------------------------------------------------------------------------
// Event recording
// ---------------------------------------------------------------------------

/// Attach recording listeners for every event kind.
pub fn record_events(submission: &Submission) -> Arc<Mutex<Vec<Event>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::Status, EventKind::Data, EventKind::Log] {
        let sink = events.clone();
        submission.on(
            kind,
            Arc::new(move |event: &Event| sink.lock().push(event.clone())),
        );
    }
    events
}

/// Compact readable shape of a recorded event, for sequence assertions.
pub fn describe(event: &Event) -> String {
    match event {
        Event::Status(status) => format!("status:{:?}", status.stage),
        Event::Data(data) => format!("data:{}", data.data),
        Event::Log(log) => format!("log:{}", log.log),
    }
}

pub fn describe_all(events: &[Event]) -> Vec<String> {
    events.iter().map(describe).collect()
}
