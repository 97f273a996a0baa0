//! Error types for Lakeflow.
//!
//! Library crates use [`LakeflowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Lakeflow operations.
#[derive(Debug, thiserror::Error)]
pub enum LakeflowError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure or an unexpected HTTP status.
    #[error("network error: {0}")]
    Network(String),

    /// 401-class response. Fatal to the task, never retried.
    #[error("authentication failed for {url}, check the connection credentials")]
    Authentication { url: String },

    /// 404-class response. Collectors absorb this and skip the item.
    #[error("resource not found: {url}")]
    NotFound { url: String },

    /// Malformed JSON or structured payload.
    #[error("decode error ({origin}): {message}")]
    Decode { message: String, origin: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed scope or task options.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The owning task was cancelled before it finished.
    #[error("operation cancelled")]
    Cancelled,

    /// A task died without reporting a result.
    #[error("internal error: {0}")]
    Internal(String),

    /// Plan compilation failed for one scope.
    #[error("scope #{index}: {source}")]
    Scope {
        index: usize,
        source: Box<LakeflowError>,
    },

    /// A pipeline task failed at run time.
    #[error("stage #{stage}, plugin `{plugin}`: {source}")]
    Task {
        stage: usize,
        plugin: String,
        source: Box<LakeflowError>,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LakeflowError>;

impl LakeflowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a decode error, naming where the payload came from.
    pub fn decode(origin: impl Into<String>, msg: impl std::fmt::Display) -> Self {
        Self::Decode {
            message: msg.to_string(),
            origin: origin.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach the index of the scope whose compilation failed.
    pub fn in_scope(self, index: usize) -> Self {
        Self::Scope {
            index,
            source: Box::new(self),
        }
    }

    /// Attach the stage index and plugin name of the failing task.
    pub fn in_task(self, stage: usize, plugin: impl Into<String>) -> Self {
        Self::Task {
            stage,
            plugin: plugin.into(),
            source: Box::new(self),
        }
    }

    /// Whether this is a cancellation, possibly wrapped in context.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Scope { source, .. } | Self::Task { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Whether the condition should be absorbed by the caller instead of
    /// aborting the owning task.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = LakeflowError::config("missing endpoint");
        assert_eq!(err.to_string(), "config error: missing endpoint");

        let err = LakeflowError::validation("owner is required");
        assert!(err.to_string().contains("owner is required"));
    }

    #[test]
    fn context_wrappers_keep_the_cause() {
        let err = LakeflowError::validation("bad options").in_scope(2);
        assert_eq!(err.to_string(), "scope #2: validation error: bad options");

        let err = LakeflowError::decode("_raw_bitbucket_api_commits#7", "expected value")
            .in_task(1, "bitbucket");
        let text = err.to_string();
        assert!(text.starts_with("stage #1, plugin `bitbucket`"));
        assert!(text.contains("_raw_bitbucket_api_commits#7"));
    }

    #[test]
    fn only_not_found_is_recoverable() {
        let not_found = LakeflowError::NotFound {
            url: "https://example.com/x".into(),
        };
        assert!(not_found.is_recoverable());

        let auth = LakeflowError::Authentication {
            url: "https://example.com/x".into(),
        };
        assert!(!auth.is_recoverable());
        assert!(!LakeflowError::Cancelled.is_recoverable());
        assert!(LakeflowError::Cancelled.in_task(0, "gitlab").is_cancelled());
    }
}
