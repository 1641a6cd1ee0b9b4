//! Error types for the kiosk
//!
//! Errors that travel inside iced messages and join events are `Clone`, so
//! they never need an `Arc`. `ConfigError` wraps I/O errors and stays local.

use thiserror::Error;

use crate::state::data::ScanRecordId;
use crate::state::workflow::WorkflowState;

/// Failures on the capture path (local camera or remote device)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The user (or the OS) refused access to the local camera
    #[error("camera access was denied")]
    PermissionDenied,

    /// The local camera could not be opened or read
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// The remote device failed to return a usable frame
    #[error("remote capture failed: {0}")]
    RemoteCapture(String),

    /// The remote preview stream went away
    #[error("remote camera stream lost")]
    StreamLost,

    /// The operation does not apply to the selected source
    #[error("operation not supported by the {0} source")]
    WrongSource(&'static str),
}

/// Failures reported by the analysis backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// Backend answered with an error status
    #[error("analysis rejected (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// Request never completed
    #[error("analysis request failed: {0}")]
    Transport(String),

    /// Backend answered with something we could not read
    #[error("analysis response malformed: {0}")]
    Malformed(String),
}

/// Failures from one enhancement generation call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation rejected (HTTP {status})")]
    Rejected { status: u16 },

    #[error("generation request failed: {0}")]
    Transport(String),

    #[error("backend returned no image")]
    Empty,

    #[error("generated image could not be decoded: {0}")]
    Malformed(String),
}

/// Failures from the scan store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("scan {0} not found")]
    NotFound(ScanRecordId),

    #[error("database error: {0}")]
    Database(String),

    #[error("stored scan is corrupt: {0}")]
    Corrupt(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

/// An action was requested in a state that does not accept it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        state: WorkflowState,
        action: &'static str,
    },
}

/// Configuration could not be written
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration directory on this system")]
    NoConfigDir,

    #[error("failed to write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Payload decoding failures (base64, data URLs)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("invalid base64: {0}")]
    Base64(String),

    #[error("payload is empty")]
    Empty,

    #[error("unrecognized image format")]
    UnknownFormat,
}

impl From<base64::DecodeError> for PayloadError {
    fn from(err: base64::DecodeError) -> Self {
        PayloadError::Base64(err.to_string())
    }
}
