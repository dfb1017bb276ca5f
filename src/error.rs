use thiserror::Error;

use crate::bridge::Command;

/// Failures of the byte channel itself. These never reach the capture
/// pipeline; the port manager turns them into a reconnect.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("native host connection failed: {0}")]
    ConnectFailed(String),
    #[error("native host manifest invalid: {0}")]
    Manifest(String),
    #[error("bridge io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("frame too large: {len} bytes (limit {limit} bytes)")]
    FrameTooLarge { len: usize, limit: usize },
    #[error("bridge already running")]
    AlreadyRunning,
    #[error("bridge is shut down")]
    Closed,
}

/// Failures surfaced to whoever asked for a capture. None of these close
/// the activity that was being captured.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no response to {command} within {timeout_ms}ms")]
    Timeout { command: Command, timeout_ms: u64 },
    #[error("response channel closed before {0} resolved")]
    ChannelClosed(Command),
    #[error("bridge unavailable: {0}")]
    Bridge(#[from] BridgeError),
    #[error("page reported an error: {0}")]
    Remote(String),
    #[error("unsupported payload kind {0}")]
    UnsupportedPayload(String),
    #[error("unexpected {actual} payload in response to {command}")]
    UnexpectedPayload { command: Command, actual: String },
    #[error("response to {0} carried no payload")]
    MissingPayload(Command),
    #[error("content changed from {expected} to {actual} while the request was in flight")]
    StaleIdentity { expected: String, actual: String },
    #[error("{0} is not supported by this strategy")]
    Unsupported(Command),
    #[error("invalid capture data: {0}")]
    InvalidData(String),
    #[error("payload decoding failed: {0}")]
    Decode(#[from] serde_json::Error),
}

impl CaptureError {
    pub fn invalid_data(message: impl Into<String>) -> Self {
        CaptureError::InvalidData(message.into())
    }

    /// Late results for content the user already left. Expected during tab
    /// switches, so callers log these quietly.
    pub fn is_stale(&self) -> bool {
        matches!(self, CaptureError::StaleIdentity { .. })
    }
}

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;
