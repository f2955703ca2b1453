//! Installing the companion service when no copy is found.
//!
//! The companion ships from its own release channel. Its index is only asked
//! for the latest tag; packages live at `<base>/<tag>/<file>`:
//!
//! - Windows: `StremioServiceSetup.exe`, run elevated.
//! - macOS: `StremioService.dmg`, mounted and copied to `/Applications`.
//! - Linux x86_64: `stremio-service_amd64.deb` or `stremio-service_x86_64.rpm`
//!   depending on the distribution family, installed with the system
//!   package manager through `sudo`.
//!
//! Package managers return before every file is in place on some systems, so
//! success means the executable showed up at one of the system locations
//! within [`CompanionInstallConfig::install_timeout`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use sg_common::{Arch, CompanionLayout, Os, Platform, PlatformPaths, ServiceOrigin};
use tokio::process::Command;
use tokio::time::Instant;

use crate::config::{CompanionInstallConfig, UpdaterConfig};
use crate::download::{DownloadProgress, DownloadReport, Downloader};
use crate::error::{InstallError, Result, UpdateError};
use crate::install::script::ps_quote;
use crate::orchestrator::{private_download_dir, remove_private_dir};
use crate::release::ReleaseClient;

const OS_RELEASE: &str = "/etc/os-release";

/// Exit code of a declined UAC prompt.
const ELEVATION_CANCELLED: i32 = 1223;

const DEBIAN_IDS: [&str; 5] = ["debian", "ubuntu", "linuxmint", "pop", "elementary"];
const REDHAT_IDS: [&str; 5] = ["fedora", "rhel", "centos", "rocky", "almalinux"];

/// Linux package family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinuxDistro {
    /// `.deb` through apt or dpkg.
    Debian,
    /// `.rpm` through dnf, yum or rpm.
    RedHat,
}

impl LinuxDistro {
    /// Family named by an `os-release` file: `ID` first, then `ID_LIKE`.
    #[must_use]
    pub fn from_os_release(contents: &str) -> Option<Self> {
        let mut id = None;
        let mut id_like = None;
        for line in contents.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches(['"', '\'']).to_lowercase();
            match key.trim() {
                "ID" => id = Some(value),
                "ID_LIKE" => id_like = Some(value),
                _ => {}
            }
        }

        if let Some(id) = id.as_deref() {
            if DEBIAN_IDS.contains(&id) {
                return Some(Self::Debian);
            }
            if REDHAT_IDS.contains(&id) || id == "opensuse" || id.starts_with("opensuse-") {
                return Some(Self::RedHat);
            }
        }

        let like = id_like?;
        let names = |markers: &[&str]| {
            like.split_whitespace()
                .any(|word| markers.iter().any(|m| word.contains(m)))
        };
        if names(&["debian", "ubuntu"]) {
            Some(Self::Debian)
        } else if names(&["fedora", "rhel", "suse"]) {
            Some(Self::RedHat)
        } else {
            None
        }
    }

    /// Family of the running system.
    ///
    /// Reads `/etc/os-release`; when that is missing or inconclusive, an
    /// `rpm` without `dpkg` on the search path means Red Hat. Debian is the
    /// default.
    #[must_use]
    pub fn detect(paths: &PlatformPaths) -> Self {
        match std::fs::read_to_string(OS_RELEASE) {
            Ok(contents) => {
                if let Some(distro) = Self::from_os_release(&contents) {
                    return distro;
                }
                tracing::debug!("os-release does not name a known distribution");
            }
            Err(error) => tracing::debug!(%error, "could not read {OS_RELEASE}"),
        }
        Self::from_package_tools(paths)
    }

    fn from_package_tools(paths: &PlatformPaths) -> Self {
        if paths.find_on_path("dpkg").is_none() && paths.find_on_path("rpm").is_some() {
            Self::RedHat
        } else {
            Self::Debian
        }
    }
}

/// Installer package of the companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanionPackage {
    /// Windows setup executable.
    WindowsSetup,
    /// macOS disk image holding the app bundle.
    DiskImage,
    /// Debian package.
    Deb,
    /// RPM package.
    Rpm,
}

impl CompanionPackage {
    /// File name as published.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::WindowsSetup => "StremioServiceSetup.exe",
            Self::DiskImage => "StremioService.dmg",
            Self::Deb => "stremio-service_amd64.deb",
            Self::Rpm => "stremio-service_x86_64.rpm",
        }
    }

    /// Package for `platform`. Linux packages exist for x86_64 only.
    #[must_use]
    pub fn for_platform(platform: Platform, distro: LinuxDistro) -> Option<Self> {
        match (platform.os, platform.arch, distro) {
            (Os::Windows, _, _) => Some(Self::WindowsSetup),
            (Os::MacOs, _, _) => Some(Self::DiskImage),
            (Os::Linux, Arch::X86_64, LinuxDistro::Debian) => Some(Self::Deb),
            (Os::Linux, Arch::X86_64, LinuxDistro::RedHat) => Some(Self::Rpm),
            (Os::Linux, Arch::Aarch64, _) => None,
        }
    }
}

/// Download URL of `package` for the release `tag`.
#[must_use]
pub fn artifact_url(base: &str, tag: &str, package: CompanionPackage) -> String {
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        tag,
        package.file_name()
    )
}

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Program name or path.
    pub program: String,
    /// Arguments, unquoted.
    pub args: Vec<String>,
}

impl CommandLine {
    fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    async fn run(&self) -> std::result::Result<(), InstallError> {
        tracing::info!(command = %self, "running install command");
        let status = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| InstallError::Launch(format!("{self}: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(InstallError::CommandFailed {
                command: self.to_string(),
                status: status.code(),
            })
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// One command of a Linux install strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    /// What to run.
    pub command: CommandLine,
    /// Whether a failure abandons the strategy.
    pub required: bool,
}

impl InstallStep {
    fn required(program: &str, args: &[&str]) -> Self {
        Self {
            command: CommandLine::new(program, args.iter().copied()),
            required: true,
        }
    }

    fn optional(program: &str, args: &[&str]) -> Self {
        Self {
            command: CommandLine::new(program, args.iter().copied()),
            required: false,
        }
    }
}

/// Strategies for installing a Linux package, tried in order until one
/// completes its required steps.
///
/// - `.deb`: `apt install`, then `dpkg -i` followed by `apt install -f` to
///   pull missing dependencies.
/// - `.rpm`: `dnf install` (or `yum` without dnf), then `rpm -i --nodeps`.
#[must_use]
pub fn linux_strategies(
    package: CompanionPackage,
    artifact: &Path,
    has_dnf: bool,
) -> Vec<Vec<InstallStep>> {
    let file = artifact.to_string_lossy();
    let file = file.as_ref();
    match package {
        CompanionPackage::Deb => vec![
            vec![InstallStep::required("sudo", &["apt", "install", "-y", file])],
            vec![
                InstallStep::optional("sudo", &["dpkg", "-i", file]),
                InstallStep::optional("sudo", &["apt", "install", "-f", "-y"]),
            ],
        ],
        CompanionPackage::Rpm => {
            let manager = if has_dnf { "dnf" } else { "yum" };
            vec![
                vec![InstallStep::required("sudo", &[manager, "install", "-y", file])],
                vec![InstallStep::required("sudo", &["rpm", "-i", "--nodeps", file])],
            ]
        }
        CompanionPackage::WindowsSetup | CompanionPackage::DiskImage => Vec::new(),
    }
}

/// Elevated, blocking run of the Windows setup. A declined prompt exits 1223.
#[must_use]
pub fn windows_install_command(setup: &Path) -> CommandLine {
    CommandLine::new(
        "powershell",
        [
            "-NoProfile".to_string(),
            "-ExecutionPolicy".to_string(),
            "Bypass".to_string(),
            "-Command".to_string(),
            format!(
                "try {{ $p = Start-Process -FilePath {} -Verb RunAs -Wait -PassThru; exit $p.ExitCode }} catch {{ exit {ELEVATION_CANCELLED} }}",
                ps_quote(setup)
            ),
        ],
    )
}

/// Attach, copy and detach commands for a disk image holding `bundle`.
#[must_use]
pub fn macos_commands(
    dmg: &Path,
    mount: &Path,
    bundle: &str,
) -> (CommandLine, CommandLine, CommandLine) {
    let dmg = dmg.to_string_lossy().into_owned();
    let mount = mount.to_string_lossy().into_owned();
    let attach = CommandLine::new(
        "hdiutil",
        [
            "attach".to_string(),
            dmg,
            "-nobrowse".to_string(),
            "-readonly".to_string(),
            "-noautoopen".to_string(),
            "-mountpoint".to_string(),
            mount.clone(),
        ],
    );
    let copy = CommandLine::new(
        "ditto",
        [
            Path::new(&mount).join(bundle).to_string_lossy().into_owned(),
            Path::new("/Applications")
                .join(bundle)
                .to_string_lossy()
                .into_owned(),
        ],
    );
    let detach = CommandLine::new(
        "hdiutil",
        ["detach".to_string(), mount, "-quiet".to_string()],
    );
    (attach, copy, detach)
}

/// First of `candidates` that exists as a file, checking every `interval`
/// until `timeout` has passed.
pub async fn wait_for_install(
    candidates: &[PathBuf],
    timeout: Duration,
    interval: Duration,
) -> Option<PathBuf> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(found) = candidates.iter().find(|path| path.is_file()) {
            return Some(found.clone());
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// A downloaded companion package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionDownload {
    /// Release tag the package came from.
    pub tag: String,
    /// Package kind.
    pub package: CompanionPackage,
    /// The verified file.
    pub report: DownloadReport,
    /// Private directory holding the file; removed after a successful install.
    pub dir: PathBuf,
}

/// Downloads and installs the companion service.
#[derive(Debug, Clone)]
pub struct CompanionInstaller {
    config: CompanionInstallConfig,
    layout: CompanionLayout,
    releases: ReleaseClient,
    downloader: Downloader,
    platform: Platform,
    paths: PlatformPaths,
    distro: Option<LinuxDistro>,
}

impl CompanionInstaller {
    /// Installer for the running system.
    ///
    /// Network settings (timeouts, attempts, plausibility floor) come from
    /// `updater`.
    pub fn new(
        updater: &UpdaterConfig,
        config: CompanionInstallConfig,
        layout: CompanionLayout,
    ) -> Result<Self> {
        Self::with_platform(
            updater,
            config,
            layout,
            Platform::current()?,
            PlatformPaths::from_env(),
        )
    }

    /// Installer for an explicit platform and paths.
    pub fn with_platform(
        updater: &UpdaterConfig,
        config: CompanionInstallConfig,
        layout: CompanionLayout,
        platform: Platform,
        paths: PlatformPaths,
    ) -> Result<Self> {
        let index = UpdaterConfig {
            release_index_url: config.release_index_url.clone(),
            ..updater.clone()
        };
        Ok(Self {
            releases: ReleaseClient::new(&index).map_err(UpdateError::CheckFailed)?,
            downloader: Downloader::new(updater).map_err(UpdateError::DownloadFailed)?,
            config,
            layout,
            platform,
            paths,
            distro: None,
        })
    }

    /// Skip distribution detection.
    #[must_use]
    pub fn with_distro(mut self, distro: LinuxDistro) -> Self {
        self.distro = Some(distro);
        self
    }

    /// Package this system needs, or `None` when there is no build for it.
    #[must_use]
    pub fn package(&self) -> Option<CompanionPackage> {
        let distro = self
            .distro
            .unwrap_or_else(|| LinuxDistro::detect(&self.paths));
        CompanionPackage::for_platform(self.platform, distro)
    }

    /// System-installed copy of the companion, if one exists.
    #[must_use]
    pub fn installed_path(&self) -> Option<PathBuf> {
        self.system_candidates().into_iter().find(|p| p.is_file())
    }

    fn system_candidates(&self) -> Vec<PathBuf> {
        self.paths
            .companion_search_paths(self.platform.os, &self.layout)
            .into_iter()
            .filter(|c| c.origin == ServiceOrigin::SystemInstalled)
            .map(|c| c.path)
            .collect()
    }

    /// Fetch the latest companion package into a private directory.
    pub async fn download<F>(&self, on_progress: F) -> Result<CompanionDownload>
    where
        F: FnMut(&DownloadProgress) + Send,
    {
        let package = self.package().ok_or_else(|| UpdateError::NoAssetFound {
            platform: self.platform.to_string(),
        })?;
        let release = self
            .releases
            .latest_release()
            .await
            .map_err(UpdateError::CheckFailed)?;
        let url = artifact_url(&self.config.download_base_url, &release.tag, package);
        tracing::info!(tag = %release.tag, package = package.file_name(), %url, "downloading companion");

        let dir = private_download_dir(self.paths.temp_directory())?;
        match self
            .downloader
            .download(&url, &dir.join(package.file_name()), None, on_progress)
            .await
        {
            Ok(report) => Ok(CompanionDownload {
                tag: release.tag,
                package,
                report,
                dir,
            }),
            Err(err) => {
                remove_private_dir(&dir);
                Err(UpdateError::DownloadFailed(err))
            }
        }
    }

    /// Install a downloaded package and wait for the executable.
    ///
    /// Returns the installed executable. On failure the package is left in
    /// place for a manual install.
    pub async fn install(&self, download: &CompanionDownload) -> Result<PathBuf> {
        let artifact = &download.report.path;
        if let Err(err) = self.run_installer(download.package, artifact, &download.dir).await {
            tracing::warn!(error = %err, artifact = %artifact.display(), "companion install failed");
            return Err(UpdateError::InstallFailed(err));
        }

        let timeout = self.config.install_timeout();
        let Some(installed) =
            wait_for_install(&self.system_candidates(), timeout, self.config.poll_interval()).await
        else {
            tracing::warn!(artifact = %artifact.display(), "companion not found after install");
            return Err(UpdateError::InstallFailed(InstallError::NotDetected {
                waited_secs: timeout.as_secs(),
            }));
        };

        tracing::info!(path = %installed.display(), "companion installed");
        remove_private_dir(&download.dir);
        Ok(installed)
    }

    /// [`download`](Self::download) then [`install`](Self::install).
    pub async fn download_and_install<F>(&self, on_progress: F) -> Result<PathBuf>
    where
        F: FnMut(&DownloadProgress) + Send,
    {
        let download = self.download(on_progress).await?;
        self.install(&download).await
    }

    async fn run_installer(
        &self,
        package: CompanionPackage,
        artifact: &Path,
        dir: &Path,
    ) -> std::result::Result<(), InstallError> {
        match package {
            CompanionPackage::WindowsSetup => {
                match windows_install_command(artifact).run().await {
                    Err(InstallError::CommandFailed {
                        status: Some(ELEVATION_CANCELLED),
                        ..
                    }) => Err(InstallError::Permission(
                        "administrator approval was declined".to_string(),
                    )),
                    other => other,
                }
            }
            CompanionPackage::DiskImage => {
                let mount = dir.join("volume");
                tokio::fs::create_dir_all(&mount)
                    .await
                    .map_err(|e| InstallError::Io {
                        path: mount.clone(),
                        reason: e.to_string(),
                    })?;
                let (attach, copy, detach) =
                    macos_commands(artifact, &mount, &self.layout.macos_bundle);
                attach.run().await?;
                let copied = copy.run().await;
                if let Err(error) = detach.run().await {
                    tracing::warn!(%error, "could not detach companion disk image");
                }
                copied
            }
            CompanionPackage::Deb | CompanionPackage::Rpm => {
                let has_dnf = self.paths.find_on_path("dnf").is_some();
                run_strategies(linux_strategies(package, artifact, has_dnf)).await
            }
        }
    }
}

async fn run_strategies(strategies: Vec<Vec<InstallStep>>) -> std::result::Result<(), InstallError> {
    let mut last_error = None;
    'strategies: for steps in strategies {
        for step in steps {
            match step.command.run().await {
                Ok(()) => {}
                Err(err) if step.required => {
                    tracing::warn!(error = %err, "install strategy failed");
                    last_error = Some(err);
                    continue 'strategies;
                }
                Err(error) => tracing::debug!(%error, "ignoring failed install step"),
            }
        }
        return Ok(());
    }
    Err(last_error.unwrap_or_else(|| InstallError::HelperScript("no install command".to_string())))
}
