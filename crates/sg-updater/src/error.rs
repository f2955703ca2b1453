//! Error types for the self-update pipeline.
//!
//! Each stage has its own error enum. [`UpdateError`] is what the orchestrator
//! surfaces: the stage that failed plus the stage's own error, so byte counts,
//! HTTP statuses and OS error text reach the UI intact.

use std::path::PathBuf;

use sg_common::UnsupportedPlatform;
use thiserror::Error;

/// Errors from querying the release index.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReleaseError {
    /// The index was unreachable.
    #[error("network error: {0}")]
    Network(String),

    /// The index answered with a non-success status.
    #[error("release index returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// GitHub API rate limit exceeded.
    #[error("GitHub API rate limit exceeded, retry after {retry_after} seconds")]
    RateLimited {
        /// Seconds until the limit resets.
        retry_after: u64,
    },

    /// The index body could not be parsed.
    #[error("malformed release index: {0}")]
    Malformed(String),

    /// The release has no usable version identifier.
    #[error("invalid version format: {0}")]
    InvalidVersion(String),
}

impl From<reqwest::Error> for ReleaseError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Errors from fetching an artifact.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DownloadError {
    /// Transport failures on every attempt.
    #[error("download failed after {attempts} attempts: {reason}")]
    Network {
        /// Attempts made.
        attempts: u32,
        /// Last transport error.
        reason: String,
    },

    /// The server answered with a status that retrying cannot fix.
    #[error("download of {url} returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// URL that answered.
        url: String,
    },

    /// Every attempt produced a truncated or implausibly small file.
    #[error(
        "downloaded {observed} bytes, expected {}, minimum {minimum} (after {attempts} attempts)",
        expected.map_or_else(|| "unknown".to_string(), |e| e.to_string())
    )]
    Integrity {
        /// Bytes on disk after the last attempt.
        observed: u64,
        /// Length the server declared, when it declared one.
        expected: Option<u64>,
        /// Plausibility floor.
        minimum: u64,
        /// Attempts made.
        attempts: u32,
    },

    /// The published SHA-256 digest did not match the file.
    #[error("checksum verification failed: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest published by the release index.
        expected: String,
        /// Digest of the downloaded file.
        actual: String,
    },

    /// The URL (or a redirect target) could not be parsed.
    #[error("invalid download URL: {0}")]
    InvalidUrl(String),

    /// Redirect chain longer than the configured limit.
    #[error("too many redirects (limit {limit})")]
    TooManyRedirects {
        /// Configured limit.
        limit: usize,
    },

    /// Local file error.
    #[error("I/O error on {}: {reason}", path.display())]
    Io {
        /// File being written.
        path: PathBuf,
        /// OS error text.
        reason: String,
    },
}

/// Errors from installing a downloaded artifact.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstallError {
    /// The app was installed by a package manager; the user must install the
    /// artifact themselves.
    #[error("automatic install not possible, install {} manually", artifact.display())]
    ManualInstallRequired {
        /// Where the downloaded file was left.
        artifact: PathBuf,
    },

    /// Elevation was declined or the target is not writable.
    #[error("permission denied: {0}")]
    Permission(String),

    /// The artifact does not have the format this platform installs.
    #[error("unexpected artifact {}: {reason}", artifact.display())]
    UnexpectedArtifact {
        /// The artifact.
        artifact: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The new executable could not be made executable.
    #[error("{} is not executable: {reason}", path.display())]
    NotExecutable {
        /// The file.
        path: PathBuf,
        /// OS error text.
        reason: String,
    },

    /// The running application's install location is unknown.
    #[error("cannot determine the installed application path")]
    UnknownInstallPath,

    /// The helper script could not be written.
    #[error("failed to write helper script: {0}")]
    HelperScript(String),

    /// The helper could not be launched.
    #[error("failed to launch helper: {0}")]
    Launch(String),

    /// An install command ran but reported failure.
    #[error("`{command}` failed ({})", exit_description(*status))]
    CommandFailed {
        /// The command line.
        command: String,
        /// Exit code, `None` when killed by a signal.
        status: Option<i32>,
    },

    /// Installation finished but the executable never appeared.
    #[error("installed program not found after waiting {waited_secs} s")]
    NotDetected {
        /// Seconds waited.
        waited_secs: u64,
    },

    /// The artifact could not be read.
    #[error("I/O error on {}: {reason}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// OS error text.
        reason: String,
    },

    /// The running OS or CPU is not supported.
    #[error(transparent)]
    UnsupportedPlatform(#[from] UnsupportedPlatform),
}

fn exit_description(status: Option<i32>) -> String {
    status.map_or_else(
        || "terminated by a signal".to_string(),
        |code| format!("exit code {code}"),
    )
}

/// Errors surfaced by [`Updater`](crate::Updater).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpdateError {
    /// Querying the release index failed.
    #[error("update check failed: {0}")]
    CheckFailed(#[source] ReleaseError),

    /// The latest release is not newer than the running version.
    #[error("no update available: running {current}, latest {latest}")]
    NoUpdateAvailable {
        /// Running version.
        current: String,
        /// Latest published version.
        latest: String,
    },

    /// The release has no artifact for this platform.
    #[error("no release asset found for {platform}")]
    NoAssetFound {
        /// Platform description.
        platform: String,
    },

    /// Fetching the artifact failed.
    #[error("download failed: {0}")]
    DownloadFailed(#[source] DownloadError),

    /// Installing the artifact failed.
    #[error("install failed: {0}")]
    InstallFailed(#[source] InstallError),

    /// Install was requested before a download completed.
    #[error("no downloaded update to install")]
    NothingDownloaded,

    /// The running OS or CPU is not supported.
    #[error(transparent)]
    UnsupportedPlatform(#[from] UnsupportedPlatform),
}

impl UpdateError {
    /// Returns a user-friendly error message suitable for display in the UI.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::CheckFailed(ReleaseError::RateLimited { .. }) => {
                "GitHub API rate limit reached. Please try again later."
            }
            Self::CheckFailed(_) => {
                "Could not check for updates. Please check your internet connection."
            }
            Self::NoUpdateAvailable { .. } => "You are running the latest version.",
            Self::NoAssetFound { .. } => "No update available for your platform.",
            Self::DownloadFailed(DownloadError::Integrity { .. }) => {
                "The download was incomplete or corrupted. Please try again."
            }
            Self::DownloadFailed(DownloadError::ChecksumMismatch { .. }) => {
                "Security verification failed. The download may have been tampered with."
            }
            Self::DownloadFailed(_) => "Could not download the update. Please try again.",
            Self::InstallFailed(InstallError::ManualInstallRequired { .. }) => {
                "Please install the downloaded update manually."
            }
            Self::InstallFailed(InstallError::Permission(_)) => {
                "Permission to install the update was denied."
            }
            Self::InstallFailed(InstallError::NotDetected { .. }) => {
                "The installer finished but the program was not found. Please install it manually."
            }
            Self::InstallFailed(_) => "Could not install the update. Please try again.",
            Self::NothingDownloaded => "Download the update before installing it.",
            Self::UnsupportedPlatform(_) => "Updates are not supported on this platform.",
        }
    }

    /// Returns whether this error is potentially recoverable with a retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CheckFailed(err) => matches!(
                err,
                ReleaseError::Network(_)
                    | ReleaseError::RateLimited { .. }
                    | ReleaseError::Status { status: 500.., .. }
            ),
            Self::DownloadFailed(err) => matches!(
                err,
                DownloadError::Network { .. }
                    | DownloadError::Integrity { .. }
                    | DownloadError::Status { status: 500.., .. }
            ),
            Self::InstallFailed(err) => {
                matches!(err, InstallError::HelperScript(_) | InstallError::Launch(_))
            }
            Self::NoUpdateAvailable { .. }
            | Self::NoAssetFound { .. }
            | Self::NothingDownloaded
            | Self::UnsupportedPlatform(_) => false,
        }
    }
}

/// Result type alias for update operations.
pub type Result<T> = std::result::Result<T, UpdateError>;
