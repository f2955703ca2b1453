//! Check, download and install sequencing.

use std::convert::Infallible;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sg_common::{Platform, PlatformPaths};
use tokio::sync::Mutex;

use crate::config::UpdaterConfig;
use crate::download::{DownloadProgress, DownloadReport, Downloader};
use crate::error::{DownloadError, ReleaseError, Result, UpdateError};
use crate::install::{InstallContext, InstallPlan, installer_for};
use crate::release::{ReleaseAsset, ReleaseClient, ReleaseInfo, resolve_asset_for};
use crate::version::Version;

/// Answer to "is there an update?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCheck {
    /// Whether the latest release is newer than the running version.
    pub available: bool,
    /// Latest published version.
    pub latest_version: String,
    /// Running version.
    pub current_version: String,
    /// When the latest release was published.
    pub published_at: Option<DateTime<Utc>>,
    /// Release notes.
    pub notes: Option<String>,
    /// Release page, for a manual download.
    pub page_url: Option<String>,
}

/// A verified download waiting to be installed.
#[derive(Debug, Clone)]
struct StagedUpdate {
    version: String,
    asset: ReleaseAsset,
    report: DownloadReport,
    /// Private directory created for this download, removed with it.
    private_dir: Option<PathBuf>,
}

impl StagedUpdate {
    /// Delete the artifact (and its private directory) unless it lives at `keep`.
    fn discard(&self, keep: &Path) {
        if self.report.path == keep {
            return;
        }
        let result = match &self.private_dir {
            Some(dir) => std::fs::remove_dir_all(dir),
            None => std::fs::remove_file(&self.report.path),
        };
        match result {
            Ok(()) => tracing::debug!(path = %self.report.path.display(), "discarded previous download"),
            Err(error) => tracing::warn!(
                %error,
                path = %self.report.path.display(),
                "could not delete previous download"
            ),
        }
    }
}

/// Sequences release check, download and install for the running application.
///
/// Downloads and installs are serialized: a second call waits for the first.
#[derive(Debug)]
pub struct Updater {
    config: UpdaterConfig,
    releases: ReleaseClient,
    downloader: Downloader,
    platform: Platform,
    paths: PlatformPaths,
    download_dir: Option<PathBuf>,
    staged: Mutex<Option<StagedUpdate>>,
}

impl Updater {
    /// Updater for the running process.
    pub fn new(config: UpdaterConfig) -> Result<Self> {
        Self::with_platform(config, Platform::current()?, PlatformPaths::from_env())
    }

    /// Updater targeting an explicit platform and environment.
    pub fn with_platform(
        config: UpdaterConfig,
        platform: Platform,
        paths: PlatformPaths,
    ) -> Result<Self> {
        let releases = ReleaseClient::new(&config).map_err(UpdateError::CheckFailed)?;
        let downloader = Downloader::new(&config).map_err(UpdateError::DownloadFailed)?;
        Ok(Self {
            config,
            releases,
            downloader,
            platform,
            paths,
            download_dir: None,
            staged: Mutex::new(None),
        })
    }

    /// Keep downloads in `dir` instead of a fresh private temp directory.
    #[must_use]
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Settings in use.
    #[must_use]
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Platform updates are resolved for.
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Compare the latest release with the running version.
    pub async fn check_for_update(&self) -> Result<UpdateCheck> {
        let release = self.fetch_release().await?;
        let available = self.is_newer(&release)?;
        tracing::info!(
            current = %self.config.current_version,
            latest = %release.version,
            available,
            "update check finished"
        );
        Ok(UpdateCheck {
            available,
            latest_version: release.version,
            current_version: self.config.current_version.clone(),
            published_at: release.published_at,
            notes: release.notes,
            page_url: release.page_url,
        })
    }

    /// Download and verify the artifact for this platform.
    ///
    /// The download is kept for [`Updater::install`]. Fails with
    /// [`UpdateError::NoUpdateAvailable`] when the running version is current.
    pub async fn start_update_download<F>(&self, on_progress: F) -> Result<DownloadReport>
    where
        F: FnMut(&DownloadProgress) + Send,
    {
        let mut staged = self.staged.lock().await;

        let release = self.fetch_release().await?;
        if !self.is_newer(&release)? {
            return Err(UpdateError::NoUpdateAvailable {
                current: self.config.current_version.clone(),
                latest: release.version,
            });
        }

        let asset = resolve_asset_for(&release, self.platform)
            .cloned()
            .ok_or_else(|| UpdateError::NoAssetFound {
                platform: self.platform.to_string(),
            })?;
        tracing::info!(
            version = %release.version,
            asset = %asset.filename,
            size = asset.size,
            "downloading update"
        );

        let (dir, private_dir) = match &self.download_dir {
            Some(dir) => (dir.clone(), None),
            None => {
                let dir = private_download_dir(self.paths.temp_directory())?;
                (dir.clone(), Some(dir))
            }
        };
        let result = self
            .downloader
            .download(
                &asset.download_url,
                &dir.join(&asset.filename),
                asset.sha256.as_deref(),
                on_progress,
            )
            .await;
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                if let Some(dir) = &private_dir {
                    remove_private_dir(dir);
                }
                return Err(UpdateError::DownloadFailed(err));
            }
        };

        if let Some(previous) = staged.take() {
            previous.discard(&report.path);
        }
        *staged = Some(StagedUpdate {
            version: release.version,
            asset,
            report: report.clone(),
            private_dir,
        });
        Ok(report)
    }

    /// Launch the platform installer for the staged download.
    ///
    /// The caller must exit soon after this returns `Ok`; the helper waits
    /// for that. On failure the download stays staged for another try.
    pub async fn install(&self) -> Result<InstallPlan> {
        let mut staged = self.staged.lock().await;
        let update = staged.take().ok_or(UpdateError::NothingDownloaded)?;

        let context = InstallContext::new(self.paths.clone(), self.config.app_name.clone());
        let installer = installer_for(self.platform.os, context);
        match installer.install(&update.report.path) {
            Ok(plan) => {
                tracing::info!(
                    version = %update.version,
                    asset = %update.asset.filename,
                    "update handed to installer"
                );
                Ok(plan)
            }
            Err(err) => {
                tracing::warn!(error = %err, "install failed");
                *staged = Some(update);
                Err(UpdateError::InstallFailed(err))
            }
        }
    }

    /// Install the staged download and exit this process.
    ///
    /// Only returns on failure.
    pub async fn install_and_restart(&self) -> Result<Infallible> {
        let plan = self.install().await?;
        tracing::info!(
            parent_pid = plan.parent_pid,
            "exiting so the update helper can proceed"
        );
        std::process::exit(0)
    }

    /// The staged download, if any.
    pub async fn staged_download(&self) -> Option<DownloadReport> {
        self.staged
            .lock()
            .await
            .as_ref()
            .map(|update| update.report.clone())
    }

    async fn fetch_release(&self) -> Result<ReleaseInfo> {
        self.releases
            .latest_release()
            .await
            .map_err(UpdateError::CheckFailed)
    }

    fn is_newer(&self, release: &ReleaseInfo) -> Result<bool> {
        let latest = release.parsed_version().map_err(UpdateError::CheckFailed)?;
        let current: Version = self
            .config
            .current_version
            .parse()
            .map_err(UpdateError::CheckFailed)?;
        Ok(latest > current)
    }
}

pub(crate) fn private_download_dir(base: &Path) -> Result<PathBuf> {
    tempfile::Builder::new()
        .prefix("streamgo-download-")
        .tempdir_in(base)
        .map(tempfile::TempDir::keep)
        .map_err(|e| {
            UpdateError::DownloadFailed(DownloadError::Io {
                path: base.to_path_buf(),
                reason: e.to_string(),
            })
        })
}

pub(crate) fn remove_private_dir(dir: &Path) {
    if let Err(error) = std::fs::remove_dir_all(dir) {
        tracing::warn!(%error, dir = %dir.display(), "could not remove download directory");
    }
}
