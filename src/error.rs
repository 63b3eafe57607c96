//! Error types for the measurement engine.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpeedTestError>;

#[derive(Debug, Error)]
pub enum SpeedTestError {
    /// Voluntary stop. Never shown to the user as a failure.
    #[error("measurement cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("latency probe failed: {0}")]
    ProbeFailed(String),

    #[error("endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("a measurement is already running")]
    AlreadyRunning,

    #[error("stream worker aborted: {0}")]
    Worker(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl SpeedTestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SpeedTestError::Cancelled { .. })
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SpeedTestError::ConfigInvalid(msg.into())
    }
}
