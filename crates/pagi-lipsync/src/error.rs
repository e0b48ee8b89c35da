//! Error types for the PAGI lip-sync core
//!
//! Lip motion is cosmetic, so a turn never fails on these. Timing errors from an alignment
//! source are counted as alignment failures; config and IO errors point at a misconfigured
//! source and are only logged. Either way the turn degrades to an estimated timeline.

use thiserror::Error;

/// Result type alias for lip-sync operations
pub type LipSyncResult<T> = Result<T, LipSyncError>;

/// Errors that can occur while building or playing a viseme timeline
#[derive(Error, Debug)]
pub enum LipSyncError {
    #[error("Alignment unavailable: {0}")]
    AlignmentUnavailable(String),

    #[error("Malformed timing data: {0}")]
    MalformedTiming(String),

    #[error("Alignment HTTP error: {0}")]
    AlignmentHttp(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timer error: {0}")]
    Timer(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LipSyncError {
    /// True when the turn controller should switch to the fallback estimator.
    pub fn is_recoverable_by_fallback(&self) -> bool {
        matches!(
            self,
            LipSyncError::AlignmentUnavailable(_)
                | LipSyncError::AlignmentHttp(_)
                | LipSyncError::MalformedTiming(_)
                | LipSyncError::Json(_)
        )
    }
}

impl From<reqwest::Error> for LipSyncError {
    fn from(err: reqwest::Error) -> Self {
        LipSyncError::AlignmentHttp(err.to_string())
    }
}

impl From<config::ConfigError> for LipSyncError {
    fn from(err: config::ConfigError) -> Self {
        LipSyncError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for LipSyncError {
    fn from(err: toml::de::Error) -> Self {
        LipSyncError::Config(err.to_string())
    }
}
