//! Self-update for StreamGo.
//!
//! The pipeline has three stages, sequenced by [`Updater`]:
//!
//! - [`release`]: ask the release index for the latest version and pick the
//!   asset matching this OS and CPU.
//! - [`download`]: stream the asset to disk with progress events, verify the
//!   byte count, the plausibility floor and the published SHA-256, and retry
//!   from scratch on failure.
//! - [`install`]: hand the verified artifact to a helper script that waits
//!   for this process to exit, replaces the application and relaunches it.
//!
//! [`CompanionInstaller`] reuses the release and download stages to fetch
//! and install the companion service's own packages.
//!
//! Each stage has its own error type; [`UpdateError`] wraps them so callers
//! can tell a failed check from a failed download or install.
//!
//! # Example
//!
//! ```no_run
//! use sg_updater::{UpdateError, Updater, UpdaterConfig};
//!
//! async fn update() -> sg_updater::Result<()> {
//!     let updater = Updater::new(UpdaterConfig::default())?;
//!     let check = updater.check_for_update().await?;
//!     if !check.available {
//!         return Ok(());
//!     }
//!
//!     let report = updater
//!         .start_update_download(|p| println!("{}%", p.percentage()))
//!         .await?;
//!     println!("downloaded {} bytes", report.bytes);
//!
//!     match updater.install_and_restart().await {
//!         Err(UpdateError::InstallFailed(err)) => eprintln!("{err}"),
//!         Err(err) => return Err(err),
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod companion;
pub mod config;
pub mod download;
pub mod error;
pub mod install;
pub mod orchestrator;
pub mod release;
pub mod verify;
pub mod version;

pub use companion::{CompanionDownload, CompanionInstaller, CompanionPackage, LinuxDistro};
pub use config::{
    CompanionInstallConfig, DEFAULT_RELEASE_INDEX_URL, MIN_ARTIFACT_BYTES, UpdaterConfig,
};
pub use download::{
    DownloadProgress, DownloadReport, DownloadSession, Downloader, format_bytes, format_speed,
};
pub use error::{DownloadError, InstallError, ReleaseError, Result, UpdateError};
pub use install::{InstallContext, InstallPlan, PlatformInstaller, installer_for};
pub use orchestrator::{UpdateCheck, Updater};
pub use release::{Packaging, ReleaseAsset, ReleaseClient, ReleaseInfo, resolve_asset_for};
pub use version::{PreRelease, Version, is_newer};

/// Version of this crate, used as the default running version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
