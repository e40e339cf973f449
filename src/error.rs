//! Error types for queueflow
//!
//! This module defines the main error type used throughout queueflow and the
//! caller-facing messages that surface inside terminal `status` events.

use thiserror::Error;

/// Result type alias for queueflow operations
pub type Result<T> = std::result::Result<T, QueueflowError>;

/// Message surfaced when a transport closes uncleanly or a queue-data POST fails.
pub const BROKEN_CONNECTION_MSG: &str = "Connection errored out.";

/// Message surfaced when the server rejects a queue join with HTTP 503.
pub const QUEUE_FULL_MSG: &str = "This application is currently busy. Please try again.";

/// Message surfaced when frame handling itself fails.
pub const UNEXPECTED_ERROR_MSG: &str = "An Unexpected Error Occurred!";

/// Main error type for queueflow operations
#[derive(Error, Debug)]
pub enum QueueflowError {
    /// The requested endpoint does not exist in the app's API
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// The session has no discovered API to resolve endpoints against
    #[error("No API found for this app")]
    NoApi,

    /// A transport closed uncleanly mid-submission
    #[error("{BROKEN_CONNECTION_MSG}")]
    BrokenConnection,

    /// The server's queue rejected the join request
    #[error("{QUEUE_FULL_MSG}")]
    QueueFull,

    /// The server reported an error for the submission
    #[error("Server error: {0}")]
    Server(String),

    /// A server frame could not be parsed or handled
    #[error("Frame error: {0}")]
    Frame(String),

    /// A binary payload could not be uploaded
    #[error("Upload error: {0}")]
    Upload(String),

    /// Configuration error (bad root URL, missing config fields)
    #[error("Configuration error: {0}")]
    Config(String),

    /// WebSocket transport error
    #[error("Socket error: {0}")]
    Socket(String),

    /// SSE stream transport error
    #[error("Stream error: {0}")]
    Stream(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
