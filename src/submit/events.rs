//! Events delivered to submission listeners.
//!
//! Every submission emits a stream of tagged events: `status` for lifecycle
//! changes, `data` for outputs, `log` for server-side log lines. The terminal
//! `status` of any path has stage `complete` or `error`, and nothing is
//! emitted after it.

use crate::protocol::interpreter::{Stage, Status};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// Discriminant used to register listeners for one event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Status,
    Data,
    Log,
}

/// One event fired at a submission's listeners.
#[derive(Debug, Clone)]
pub enum Event {
    Status(StatusEvent),
    Data(DataEvent),
    Log(LogEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Status(_) => EventKind::Status,
            Event::Data(_) => EventKind::Data,
            Event::Log(_) => EventKind::Log,
        }
    }
}

/// Lifecycle update for a submission.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub stage: Stage,
    /// Whether the call went through the server's queue
    pub queue: bool,
    pub time: DateTime<Utc>,
    pub fn_index: usize,
    pub endpoint: String,
    /// Queue ETA while pending, average duration on completion (seconds)
    pub eta: Option<f64>,
    pub message: Option<String>,
    /// The transport broke rather than the job failing
    pub broken: bool,
    pub progress_data: Option<Value>,
    /// Zero-based queue position
    pub position: Option<usize>,
    /// Queue length at the time of the update
    pub size: Option<usize>,
    pub success: Option<bool>,
    pub code: Option<i64>,
}

impl StatusEvent {
    /// Stamp a protocol-level status with submission identity and time.
    pub fn from_status(status: Status, fn_index: usize, endpoint: &str) -> Self {
        Self {
            stage: status.stage,
            queue: status.queue,
            time: Utc::now(),
            fn_index,
            endpoint: endpoint.to_string(),
            eta: status.eta,
            message: status.message,
            broken: status.broken,
            progress_data: status.progress_data,
            position: status.position,
            size: status.size,
            success: status.success,
            code: status.code,
        }
    }

    /// Initial status fired once payload preparation finishes.
    pub fn pending(queue: bool, fn_index: usize, endpoint: &str) -> Self {
        Self::from_status(
            Status {
                queue,
                ..Status::at(Stage::Pending)
            },
            fn_index,
            endpoint,
        )
    }
}

/// Output payload for a submission.
#[derive(Debug, Clone)]
pub struct DataEvent {
    pub data: Value,
    pub time: DateTime<Utc>,
    pub fn_index: usize,
    pub endpoint: String,
    pub event_data: Option<Value>,
    pub trigger_id: Option<u64>,
}

/// Server log line forwarded to the caller.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub log: String,
    pub level: String,
    pub fn_index: usize,
    pub endpoint: String,
}

/// A registered listener. Listeners are compared by `Arc` identity when
/// removed, so the same closure value can be attached and detached.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;
