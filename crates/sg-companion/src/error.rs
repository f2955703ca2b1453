//! Error types for companion lifecycle operations.

use std::path::PathBuf;

use sg_common::UnsupportedPlatform;
use thiserror::Error;

/// Errors returned by [`ServiceController`](crate::ServiceController).
///
/// Liveness probes and the "not ours" termination case never produce one of
/// these; they degrade to booleans and outcomes instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// No companion executable exists at any candidate location.
    #[error("companion executable not found ({} locations searched)", searched.len())]
    NotFound {
        /// Every location that was checked, in search order.
        searched: Vec<PathBuf>,
    },

    /// The OS refused to create the process.
    #[error("failed to spawn {}: {reason}", path.display())]
    Spawn {
        /// Executable that was launched.
        path: PathBuf,
        /// OS error text.
        reason: String,
    },

    /// The companion was started but was not running at the liveness check.
    #[error("companion exited right after start: {}", path.display())]
    NotAlive {
        /// Executable that was launched.
        path: PathBuf,
    },

    /// The running OS or CPU is not supported.
    #[error(transparent)]
    UnsupportedPlatform(#[from] UnsupportedPlatform),
}

impl ServiceError {
    /// Returns a user-friendly error message suitable for display in the UI.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::NotFound { .. } => {
                "The streaming service is not installed. Please install it manually."
            }
            Self::Spawn { .. } => "The streaming service could not be started.",
            Self::NotAlive { .. } => "The streaming service stopped right after starting.",
            Self::UnsupportedPlatform(_) => "This platform is not supported.",
        }
    }

    /// Returns whether calling the operation again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::NotAlive { .. })
    }
}

/// Result type alias for companion operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
