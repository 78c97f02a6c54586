//! Error types for facetharvest.
//!
//! Library crates use [`FacetHarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Only setup failures ever escape a harvest run as `Err`; shard-level and
//! record-level failures are converted into outcomes by the extractor and
//! orchestrator.

use std::path::PathBuf;

/// Top-level error type for all facetharvest operations.
#[derive(Debug, thiserror::Error)]
pub enum FacetHarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Missing, malformed, or expired session credentials, or a provider
    /// that cannot be reached when the run starts.
    #[error("session error: {message}")]
    Session { message: String },

    /// Network/HTTP error talking to the provider.
    #[error("network error: {0}")]
    Network(String),

    /// JSON or markup parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Checkpoint or export persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid value, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FacetHarvestError>;

impl FacetHarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a session error from any displayable message.
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort a harvest before any shard runs.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::Session { .. } | Self::Validation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = FacetHarvestError::config("page_size must be > 0");
        assert_eq!(err.to_string(), "config error: page_size must be > 0");

        let err = FacetHarvestError::session("JSESSIONID cookie missing");
        assert!(err.to_string().contains("JSESSIONID"));
    }

    #[test]
    fn setup_failure_classification() {
        assert!(FacetHarvestError::session("expired").is_setup_failure());
        assert!(FacetHarvestError::config("bad").is_setup_failure());
        assert!(!FacetHarvestError::Network("timeout".into()).is_setup_failure());
        assert!(!FacetHarvestError::parse("bad json").is_setup_failure());
    }
}
