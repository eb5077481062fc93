//! Error types shared by the timer engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown entity: {0}")]
    NotFound(String),

    #[error("invalid time format: {0:?} (expected H:MM or whole minutes)")]
    InvalidFormat(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed timer state for {entity}: {reason}")]
    MalformedState { entity: String, reason: String },

    #[error("persistence failure: {0}")]
    Persistence(#[from] SnapshotError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Snapshot load/save failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no snapshot at {0}")]
    NotFound(PathBuf),

    #[error("corrupt snapshot: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
#[error("delivery to channel {channel} failed: {reason}")]
pub struct DeliveryError {
    pub channel: u64,
    pub reason: String,
}

impl DeliveryError {
    pub fn new(channel: u64, reason: impl Into<String>) -> Self {
        Self {
            channel,
            reason: reason.into(),
        }
    }
}
