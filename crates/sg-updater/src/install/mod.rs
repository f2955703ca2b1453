//! Installing a downloaded artifact over the running application.
//!
//! No mainstream OS lets a process reliably replace the files backing its
//! own running image, Windows least of all. Every platform therefore uses the
//! same escape hatch:
//!
//! 1. validate the artifact and build an [`InstallPlan`];
//! 2. write a helper script into a private temp directory;
//! 3. launch the helper detached;
//! 4. the caller exits.
//!
//! The helper's first step is waiting for the caller's pid to disappear. It
//! then performs the platform-specific replacement, relaunches the
//! application and deletes itself.

mod linux;
mod macos;
pub(crate) mod script;
mod windows;

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use sg_common::{Os, PlatformPaths};

use crate::error::InstallError;

pub use linux::LinuxInstaller;
pub use macos::MacOsInstaller;
pub use windows::WindowsInstaller;

/// Log file helpers append to, under the temp directory.
pub const HELPER_LOG_NAME: &str = "streamgo-update.log";

/// One install attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallPlan {
    /// OS the plan targets.
    pub platform: Os,
    /// The verified download.
    pub artifact_path: PathBuf,
    /// What gets replaced: an executable or an `.app` bundle.
    pub installed_app_path: PathBuf,
    /// Set once the helper has been written.
    pub helper_script_path: Option<PathBuf>,
    /// Process the helper waits for.
    pub parent_pid: u32,
    /// Where the helper appends its output.
    pub log_path: PathBuf,
}

impl InstallPlan {
    /// Directory holding the helper script.
    #[must_use]
    pub fn helper_dir(&self) -> Option<&Path> {
        self.helper_script_path.as_deref().and_then(Path::parent)
    }
}

/// What every installer needs to know about the running application.
#[derive(Debug, Clone)]
pub struct InstallContext {
    /// Locations of the running process.
    pub paths: PlatformPaths,
    /// Application name, for bundle names.
    pub app_name: String,
    /// Pid the helper waits for.
    pub parent_pid: u32,
}

impl InstallContext {
    /// Context for this process.
    #[must_use]
    pub fn new(paths: PlatformPaths, app_name: impl Into<String>) -> Self {
        Self {
            paths,
            app_name: app_name.into(),
            parent_pid: std::process::id(),
        }
    }

    /// Wait for a different pid.
    #[must_use]
    pub fn with_parent_pid(mut self, pid: u32) -> Self {
        self.parent_pid = pid;
        self
    }

    fn log_path(&self) -> PathBuf {
        self.paths.temp_directory().join(HELPER_LOG_NAME)
    }

    fn base_plan(
        &self,
        platform: Os,
        artifact: &Path,
        installed_app_path: PathBuf,
    ) -> InstallPlan {
        InstallPlan {
            platform,
            artifact_path: artifact.to_path_buf(),
            installed_app_path,
            helper_script_path: None,
            parent_pid: self.parent_pid,
            log_path: self.log_path(),
        }
    }
}

/// Platform install procedure.
pub trait PlatformInstaller: Send + Sync {
    /// OS this installer targets.
    fn platform(&self) -> Os;

    /// File name of the helper script.
    fn script_name(&self) -> &'static str;

    /// Temp directory the helper directory is created in.
    fn temp_directory(&self) -> &Path;

    /// Validate `artifact` and decide what will be replaced.
    fn prepare(&self, artifact: &Path) -> Result<InstallPlan, InstallError>;

    /// Helper script source for `plan`.
    fn render_helper(&self, plan: &InstallPlan) -> String;

    /// Command that runs the helper at `script`.
    fn helper_command(&self, script: &Path) -> Command;

    /// Prepare, write the helper, launch it detached and return the plan.
    ///
    /// On success the caller is expected to exit promptly; the helper does
    /// nothing until it has.
    fn install(&self, artifact: &Path) -> Result<InstallPlan, InstallError> {
        let mut plan = self.prepare(artifact)?;

        let dir = script::private_dir(self.temp_directory())?;
        let script_path = dir.join(self.script_name());
        plan.helper_script_path = Some(script_path.clone());
        script::write_script(&script_path, &self.render_helper(&plan))?;

        let pid = sg_common::spawn_detached(self.helper_command(&script_path))
            .map_err(|e| InstallError::Launch(e.to_string()))?;
        tracing::info!(
            helper_pid = pid,
            script = %script_path.display(),
            target = %plan.installed_app_path.display(),
            "update helper launched"
        );
        Ok(plan)
    }
}

/// The installer for `os`.
#[must_use]
pub fn installer_for(os: Os, context: InstallContext) -> Box<dyn PlatformInstaller> {
    match os {
        Os::Windows => Box::new(WindowsInstaller::new(context)),
        Os::MacOs => Box::new(MacOsInstaller::new(context)),
        Os::Linux => Box::new(LinuxInstaller::new(context)),
    }
}

fn expect_extension(artifact: &Path, extension: &str) -> Result<(), InstallError> {
    let matches = artifact
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
    if matches {
        Ok(())
    } else {
        Err(InstallError::UnexpectedArtifact {
            artifact: artifact.to_path_buf(),
            reason: format!("expected a .{extension} file"),
        })
    }
}

fn expect_file(artifact: &Path) -> Result<(), InstallError> {
    if artifact.is_file() {
        Ok(())
    } else {
        Err(InstallError::UnexpectedArtifact {
            artifact: artifact.to_path_buf(),
            reason: "file does not exist".to_string(),
        })
    }
}
