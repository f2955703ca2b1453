//! Companion service settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sg_common::CompanionLayout;

/// Interval between status polls by long-running hosts.
pub const SERVICE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Names, locations and timing of the companion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// On-disk naming of the companion executable.
    pub layout: CompanionLayout,
    /// Binaries next to a bundled copy that must stay executable.
    pub sibling_binaries: Vec<String>,
    /// Helper processes the companion spawns, killed with it.
    pub runtime_helpers: Vec<String>,
    /// Extra command-line patterns killed on Unix by a forced shutdown.
    pub extra_kill_patterns: Vec<String>,
    /// Flatpak application id tried on Linux when no executable is found.
    pub flatpak_app_id: Option<String>,
    /// Pause between terminate and start during a restart, in milliseconds.
    pub restart_grace_ms: u64,
    /// Pause between start and the liveness check, in milliseconds.
    pub verify_delay_ms: u64,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            layout: CompanionLayout::default(),
            sibling_binaries: vec![
                "ffmpeg".to_string(),
                "ffprobe".to_string(),
                "stremio-runtime".to_string(),
            ],
            runtime_helpers: vec!["stremio-runtime".to_string()],
            extra_kill_patterns: vec!["server.js".to_string()],
            flatpak_app_id: Some("com.stremio.Service".to_string()),
            restart_grace_ms: 2_000,
            verify_delay_ms: 1_000,
        }
    }
}

impl CompanionConfig {
    /// Pause between terminate and start during a restart.
    #[must_use]
    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.restart_grace_ms)
    }

    /// Pause between start and the liveness check.
    #[must_use]
    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    /// Set both restart delays.
    #[must_use]
    pub fn with_delays(mut self, restart_grace: Duration, verify_delay: Duration) -> Self {
        self.restart_grace_ms = restart_grace.as_millis() as u64;
        self.verify_delay_ms = verify_delay.as_millis() as u64;
        self
    }

    /// Disable the flatpak fallback.
    #[must_use]
    pub fn without_flatpak(mut self) -> Self {
        self.flatpak_app_id = None;
        self
    }
}
