#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # queueflow
//!
//! queueflow is an async client for app servers that expose user-defined
//! prediction endpoints behind a job queue. One call against a logical
//! endpoint becomes a [`Submission`]: the engine uploads any binary
//! payloads, negotiates the transport the server's config demands, joins
//! the queue, and emits a typed event stream of `status`, `data` and `log`
//! events until exactly one terminal status closes the call.
//!
//! ## Features
//!
//! - **Five transports, one contract**: direct POST for queue-skipping
//!   endpoints, a dedicated WebSocket queue, a legacy SSE queue, and the
//!   multiplexed SSE revisions (`sse_v1` through `sse_v3`) all surface the
//!   same events.
//! - **Multiplexing**: any number of in-flight submissions share one SSE
//!   connection, keyed by server-assigned event ids, with the join-reply /
//!   stream race handled by buffering.
//! - **Diff streams**: incremental outputs are folded into a running
//!   snapshot, so listeners always receive whole values.
//! - **Cancellation**: `cancel()` settles the submission locally, then
//!   best-effort tells the server to drop the queue entry.
//!
//! ## Example
//!
//! ```no_run
//! use queueflow::{Client, ClientOptions, EventKind, InputValue};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> queueflow::Result<()> {
//!     let client = Client::connect("http://localhost:7860", ClientOptions::default()).await?;
//!
//!     // Fire-and-collect convenience:
//!     let answer = client
//!         .predict("/predict", vec![InputValue::Data(serde_json::json!(2))])
//!         .await?;
//!     println!("{answer}");
//!
//!     // Or listen to the full event stream:
//!     let submission = client.submit("/gen", vec![InputValue::Data(serde_json::json!("hi"))])?;
//!     submission.on(
//!         EventKind::Data,
//!         Arc::new(|event: &queueflow::Event| println!("{event:?}")),
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`client`]: session state, config/API discovery, `predict`
//! - [`submit`]: the submission engine, event types, the SSE multiplexer
//! - [`protocol`]: wire frames, frame interpretation, diff folding
//! - [`transport`]: HTTP/SSE/WebSocket seams and their reqwest-family
//!   implementations
//! - [`upload`]: binary payload preparation
//! - [`error`]: error types and `Result` alias

pub mod client;
pub mod error;
pub mod protocol;
pub mod submit;
pub mod transport;
pub mod upload;

pub use client::api::{ApiInfo, EndpointInfo, EndpointRef, ParameterInfo};
pub use client::config::{AppConfig, ClientOptions, Dependency, Protocol};
pub use client::{AuthHeaderSource, Client, ClientBuilder, NoAuthHeaders};
pub use error::{
    QueueflowError, Result, BROKEN_CONNECTION_MSG, QUEUE_FULL_MSG, UNEXPECTED_ERROR_MSG,
};
pub use protocol::interpreter::Stage;
pub use submit::{
    DataEvent, Event, EventKind, Listener, LogEvent, StatusEvent, Submission, TransportKind,
};
pub use upload::{FileRef, InputValue, Uploader};
