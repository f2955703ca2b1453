//! Configuration for the update pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Latest-release endpoint of the StreamGo repository.
pub const DEFAULT_RELEASE_INDEX_URL: &str =
    "https://api.github.com/repos/Bo0ii/StreamGo/releases/latest";

/// Latest-release endpoint of the companion service.
pub const DEFAULT_COMPANION_INDEX_URL: &str =
    "https://api.github.com/repos/Stremio/stremio-service/releases/latest";

/// Base URL companion packages are served from, as `<base>/<tag>/<file>`.
pub const DEFAULT_COMPANION_DOWNLOAD_URL: &str = "https://dl.strem.io/stremio-service";

/// Artifacts smaller than this are treated as corrupt.
pub const MIN_ARTIFACT_BYTES: u64 = 1024 * 1024;

/// User agent string for all requests.
pub const USER_AGENT_VALUE: &str = concat!(
    "streamgo-updater/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/Bo0ii/StreamGo)"
);

/// Settings consumed by [`Updater`](crate::Updater).
///
/// The release index URL and current version are owned by the host; the
/// updater only reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Release index endpoint returning the latest release.
    pub release_index_url: String,
    /// Version of the running application.
    pub current_version: String,
    /// Application name, used for bundle and artifact names.
    pub app_name: String,
    /// Download attempts shared by network and integrity failures.
    pub max_attempts: u32,
    /// Pause between download attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Plausibility floor for downloaded artifacts.
    pub min_artifact_bytes: u64,
    /// Longest redirect chain followed.
    pub max_redirects: usize,
    /// Connection timeout, in seconds.
    pub connect_timeout_secs: u64,
    /// Release index request timeout, in seconds.
    pub request_timeout_secs: u64,
    /// Check the published SHA-256 digest when the index provides one.
    pub verify_digest: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            release_index_url: DEFAULT_RELEASE_INDEX_URL.to_string(),
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            app_name: sg_common::APP_NAME.to_string(),
            max_attempts: 3,
            retry_delay_ms: 1_000,
            min_artifact_bytes: MIN_ARTIFACT_BYTES,
            max_redirects: 10,
            connect_timeout_secs: 15,
            request_timeout_secs: 30,
            verify_digest: true,
        }
    }
}

impl UpdaterConfig {
    /// Config for an index URL and running version; everything else default.
    #[must_use]
    pub fn new(release_index_url: impl Into<String>, current_version: impl Into<String>) -> Self {
        Self {
            release_index_url: release_index_url.into(),
            current_version: current_version.into(),
            ..Self::default()
        }
    }

    /// Set the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the pause between attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Pause between attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Connection timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Release index request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings for installing the companion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionInstallConfig {
    /// Release index of the companion; only the tag is used.
    pub release_index_url: String,
    /// Base URL of the package downloads.
    pub download_base_url: String,
    /// How long to wait for the executable to appear after installing.
    pub install_timeout_secs: u64,
    /// Pause between checks for the installed executable, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for CompanionInstallConfig {
    fn default() -> Self {
        Self {
            release_index_url: DEFAULT_COMPANION_INDEX_URL.to_string(),
            download_base_url: DEFAULT_COMPANION_DOWNLOAD_URL.to_string(),
            install_timeout_secs: 120,
            poll_interval_ms: 5_000,
        }
    }
}

impl CompanionInstallConfig {
    /// Wait budget for the installed executable.
    #[must_use]
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    /// Pause between checks for the installed executable.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
