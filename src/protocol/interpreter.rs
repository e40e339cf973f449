//! Frame classification.
//!
//! [`interpret`] is a pure function from one server frame (plus the last
//! observed stage for the same function) to a tagged [`Interpreted`] variant.
//! It updates no shared state; the submission engine owns the per-function
//! last-stage map and every side effect.

use crate::error::{QUEUE_FULL_MSG, UNEXPECTED_ERROR_MSG};
use crate::protocol::{FrameTag, QueueFrame};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle stage of a submission as reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Generating,
    Complete,
    Error,
}

impl Stage {
    /// Terminal stages end the submission; nothing may be emitted after them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Complete | Stage::Error)
    }
}

/// Protocol-level status extracted from a frame, before the engine stamps it
/// with fn_index, endpoint and time.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub stage: Stage,
    /// Whether the submission went through the server's queue
    pub queue: bool,
    pub message: Option<String>,
    /// Seconds: queue ETA on estimations, average duration on completion
    pub eta: Option<f64>,
    /// Zero-based queue position
    pub position: Option<usize>,
    /// Total queue length
    pub size: Option<usize>,
    pub progress_data: Option<Value>,
    pub success: Option<bool>,
    pub code: Option<i64>,
    /// Set when the transport itself broke rather than the job failing
    pub broken: bool,
}

impl Status {
    /// Status with the given stage and nothing else set.
    pub fn at(stage: Stage) -> Self {
        Self {
            stage,
            queue: true,
            message: None,
            eta: None,
            position: None,
            size: None,
            progress_data: None,
            success: None,
            code: None,
            broken: false,
        }
    }

    /// Terminal error status with a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            success: Some(false),
            ..Self::at(Stage::Error)
        }
    }
}

/// A server log line addressed to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub log: String,
    pub level: String,
}

/// Classification of one server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpreted {
    /// WS only: reply with `{fn_index, session_hash}`
    SendHash,
    /// Reply with the submission payload
    SendData,
    /// Status change without data
    Update(Status),
    /// Intermediate status, optionally with inline data
    Generating { status: Status, data: Option<Value> },
    /// Terminal status, optionally with final data
    Complete { status: Status, data: Option<Value> },
    /// Log line to forward to listeners
    Log(LogRecord),
    /// Keep-alive; ignored
    Heartbeat,
    /// Server failure outside the job lifecycle; terminal
    UnexpectedError(Status),
    /// SSE v3: the shared stream may close now
    CloseStream,
}

/// Classify one frame.
///
/// `previous_stage` is the last stage observed for the same fn_index; an
/// `estimation` frame received while a job is already generating must not
/// demote its stage back to pending.
pub fn interpret(frame: &QueueFrame, previous_stage: Option<Stage>) -> Interpreted {
    match frame.msg {
        FrameTag::SendHash => Interpreted::SendHash,
        FrameTag::SendData => Interpreted::SendData,
        FrameTag::QueueFull => Interpreted::Update(Status {
            code: frame.code,
            success: frame.success,
            ..Status::error(QUEUE_FULL_MSG)
        }),
        FrameTag::Estimation => Interpreted::Update(Status {
            position: frame.rank,
            size: frame.queue_size,
            eta: frame.rank_eta,
            code: frame.code,
            success: frame.success,
            ..Status::at(previous_stage.unwrap_or(Stage::Pending))
        }),
        FrameTag::Progress => Interpreted::Update(Status {
            progress_data: frame.progress_data.clone(),
            code: frame.code,
            success: frame.success,
            ..Status::at(Stage::Pending)
        }),
        FrameTag::ProcessStarts => Interpreted::Update(Status {
            position: Some(0),
            eta: frame.rank_eta,
            code: frame.code,
            success: frame.success,
            ..Status::at(Stage::Pending)
        }),
        FrameTag::ProcessGenerating => {
            let status = Status {
                code: frame.code,
                success: frame.success,
                progress_data: frame.progress_data.clone(),
                ..Status::at(Stage::Generating)
            };
            Interpreted::Generating {
                status,
                data: frame
                    .output
                    .as_ref()
                    .filter(|_| frame.success.unwrap_or(true))
                    .and_then(|output| output.data.clone()),
            }
        }
        FrameTag::ProcessCompleted => {
            let output = frame.output.as_ref();
            if let Some(error) = output.and_then(|o| o.error.clone()) {
                Interpreted::Complete {
                    status: Status {
                        code: frame.code,
                        ..Status::error(error)
                    },
                    data: None,
                }
            } else {
                Interpreted::Complete {
                    status: Status {
                        eta: output.and_then(|o| o.average_duration),
                        code: frame.code,
                        success: frame.success,
                        ..Status::at(Stage::Complete)
                    },
                    data: output
                        .filter(|_| frame.success.unwrap_or(true))
                        .and_then(|o| o.data.clone()),
                }
            }
        }
        FrameTag::Log => Interpreted::Log(LogRecord {
            log: frame.log.clone().unwrap_or_default(),
            level: frame.level.clone().unwrap_or_else(|| "info".to_string()),
        }),
        FrameTag::Heartbeat => Interpreted::Heartbeat,
        FrameTag::UnexpectedError | FrameTag::ServerStopped => Interpreted::UnexpectedError(
            Status::error(
                frame
                    .message
                    .clone()
                    .unwrap_or_else(|| UNEXPECTED_ERROR_MSG.to_string()),
            ),
        ),
        FrameTag::CloseStream => Interpreted::CloseStream,
    }
}
