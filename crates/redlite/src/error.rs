//! Error types for redlite.
//!
//! Construction-time failures (launch errors, readiness timeouts) are always
//! surfaced to the caller; teardown failures are absorbed inside the handle
//! and logged instead, since teardown commonly runs during process exit.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the redlite library.
#[derive(Debug, Error)]
pub enum Error {
    /// The redis-server binary exited with a nonzero status before
    /// daemonizing. Carries the tail of the server log when one was written.
    #[error("redis-server failed to start: {message}")]
    LaunchFailed {
        message: String,
        /// Tail of the server log, if any was produced.
        log: Option<String>,
    },

    /// The server process started but never became reachable within the
    /// configured start timeout.
    #[error("{what} within {timeout:?}")]
    StartTimeout {
        what: &'static str,
        timeout: Duration,
        log: Option<String>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Errors from the client connection library, propagated unchanged.
    #[error(transparent)]
    Connection(#[from] redis::RedisError),
}

/// Result type alias for redlite operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl Error {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Error::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// True for errors raised by the launch/readiness path, as opposed to
    /// ordinary connection errors from the client library.
    pub fn is_start_error(&self) -> bool {
        matches!(self, Error::LaunchFailed { .. } | Error::StartTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::LaunchFailed {
            message: "exit status: 1".into(),
            log: None,
        };
        assert_eq!(
            err.to_string(),
            "redis-server failed to start: exit status: 1"
        );
    }

    #[test]
    fn test_start_errors() {
        assert!(Error::StartTimeout {
            what: "socket did not appear",
            timeout: Duration::from_secs(10),
            log: None,
        }
        .is_start_error());
        assert!(!Error::Config {
            message: "bad".into()
        }
        .is_start_error());
    }
}
