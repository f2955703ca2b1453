//! Settings file for the `streamgo` command.
//!
//! ```toml
//! [updater]
//! release_index_url = "https://api.github.com/repos/Bo0ii/StreamGo/releases/latest"
//! max_attempts = 5
//!
//! [companion]
//! restart_grace_ms = 3000
//!
//! [companion_install]
//! install_timeout_secs = 300
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sg_common::{APP_NAME, PlatformPaths};
use sg_companion::CompanionConfig;
use sg_updater::{CompanionInstallConfig, UpdaterConfig};

/// File name looked up in the per-user config directory.
pub const SETTINGS_FILE: &str = "settings.toml";

/// Everything the CLI can be configured with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Release index and download behaviour.
    pub updater: UpdaterConfig,
    /// Companion service naming and timing.
    pub companion: CompanionConfig,
    /// Where the companion installer comes from and how long it may take.
    pub companion_install: CompanionInstallConfig,
}

impl Settings {
    /// `settings.toml` in the per-user config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        PlatformPaths::user_config_dir(APP_NAME).map(|dir| dir.join(SETTINGS_FILE))
    }

    /// Load settings.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used when present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Parse a settings file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        let settings =
            Self::from_toml(&text).with_context(|| format!("parse settings {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
