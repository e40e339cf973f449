//! Wire protocol shared by every queue transport.
//!
//! The server speaks one frame vocabulary across the WebSocket queue, the
//! legacy SSE queue and the multiplexed SSE revisions; transports differ only
//! in which frames they use and how frames are addressed. [`QueueFrame`] is
//! the superset schema; [`interpreter`] classifies frames and [`diff`] folds
//! incremental outputs.

pub mod diff;
pub mod interpreter;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame discriminator, the wire `msg` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameTag {
    /// WS only: server asks the client to identify itself
    SendHash,
    /// Server asks the client to send the submission payload
    SendData,
    /// Join rejected, queue at capacity
    QueueFull,
    /// Queue position / ETA update
    Estimation,
    /// Fine-grained progress for a running job
    Progress,
    /// Job left the queue and started running
    ProcessStarts,
    /// Intermediate output from a generator endpoint
    ProcessGenerating,
    /// Terminal frame carrying the final output
    ProcessCompleted,
    /// Server-side log line addressed to the caller
    Log,
    /// Keep-alive, carries nothing
    Heartbeat,
    /// Server-side failure outside normal job flow
    UnexpectedError,
    /// Server stopped; treated like an unexpected error
    ServerStopped,
    /// SSE v3: all in-flight events are finished, the stream may close
    CloseStream,
}

/// Output block of data-bearing frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Output {
    /// Positional output values, or a diff descriptor on diff-stream frames
    #[serde(default)]
    pub data: Option<Value>,
    /// Server-reported job error
    #[serde(default)]
    pub error: Option<String>,
    /// Rolling average duration of this endpoint, seconds
    #[serde(default)]
    pub average_duration: Option<f64>,
    /// Set on generating frames of diff-stream protocols
    #[serde(default)]
    pub is_generating: Option<bool>,
}

/// One server → client frame, superset of all transports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueFrame {
    pub msg: FrameTag,
    /// Addresses the submission on multiplexed streams
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Output>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<usize>,
    /// Zero-based position in the queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<usize>,
    /// Estimated seconds until this job runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_eta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_data: Option<Value>,
    /// Log line, for `log` frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Human-readable error detail on `unexpected_error` frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl QueueFrame {
    /// Bare frame with only a tag, for synthesized control frames.
    pub fn bare(msg: FrameTag) -> Self {
        Self {
            msg,
            event_id: None,
            output: None,
            success: None,
            code: None,
            queue_size: None,
            rank: None,
            rank_eta: None,
            progress_data: None,
            log: None,
            level: None,
            message: None,
        }
    }

    /// Synthesized error frame, used to fail registered callbacks when the
    /// shared stream itself dies.
    pub fn synthesized_error(message: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            success: Some(false),
            ..Self::bare(FrameTag::UnexpectedError)
        }
    }
}

/// WS identification reply to a `send_hash` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashReply {
    pub fn_index: usize,
    pub session_hash: String,
}

/// Payload reply to a `send_data` frame, also the body of queue-join and
/// queue-data POSTs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataReply {
    pub fn_index: usize,
    pub data: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<u64>,
    pub session_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

/// Body of the cancellation POST to `${root}/reset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResetBody {
    /// WS queue entries are addressed by function and session
    Session {
        fn_index: usize,
        session_hash: String,
    },
    /// SSE-family entries are addressed by their server-assigned event id
    Event { event_id: String },
}
