//! Companion service controller.
//!
//! State machine:
//!
//! ```text
//! Unknown --probe--> NotRunning | RunningExternal | RunningOwned
//! NotRunning --start--> RunningOwned --terminate--> NotRunning
//! RunningExternal --force_terminate_all--> NotRunning
//! ```
//!
//! Only a handle with `started_by_us == true` may be killed by
//! [`ServiceController::terminate`]. Being able to see the process running says
//! nothing about who owns it.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sg_common::{CompanionCandidate, Os, PlatformPaths, ServiceOrigin};

use crate::config::CompanionConfig;
use crate::error::{Result, ServiceError};
use crate::probe::{KillOutcome, LaunchCommand, ProcessControl, SystemProcesses};

/// A located and running companion process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHandle {
    /// Executable that runs (or was launched).
    pub executable_path: PathBuf,
    /// Working directory of the process.
    pub working_directory: PathBuf,
    /// Pid when known.
    pub pid: Option<u32>,
    /// Whether this controller spawned the process.
    pub started_by_us: bool,
    /// Bundled copy or system install.
    pub origin: ServiceOrigin,
    /// OS the process runs on.
    pub platform: Os,
}

/// What the controller last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Not probed yet.
    #[default]
    Unknown,
    /// No companion process is running.
    NotRunning,
    /// Running, started by someone else.
    RunningExternal,
    /// Running, started by this controller.
    RunningOwned,
}

/// Why a termination request did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The tracked process was not started by this controller.
    NotOwned,
}

/// Result of [`ServiceController::terminate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The owned process was killed.
    Terminated,
    /// There was nothing to kill.
    NotRunning,
    /// Left running on purpose.
    Skipped(SkipReason),
    /// The kill was attempted and failed; the handle is kept.
    Failed(String),
}

/// Result of [`ServiceController::restart`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "handle", rename_all = "snake_case")]
pub enum RestartOutcome {
    /// A fresh process was started by this controller and passed the
    /// liveness check.
    Restarted(ServiceHandle),
    /// The running companion could not be stopped, either because someone
    /// else started it or because the kill failed, and was kept as is.
    KeptRunning(ServiceHandle),
}

impl RestartOutcome {
    /// The handle of the companion that is running now.
    #[must_use]
    pub fn handle(&self) -> &ServiceHandle {
        match self {
            Self::Restarted(handle) | Self::KeptRunning(handle) => handle,
        }
    }

    /// Whether a new process replaced the old one.
    #[must_use]
    pub fn restarted(&self) -> bool {
        matches!(self, Self::Restarted(_))
    }
}

/// Snapshot for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    /// A companion process is running.
    pub running: bool,
    /// A bundled copy exists on disk.
    pub bundled: bool,
    /// The running process was started by this controller.
    pub started_by_us: bool,
    /// Pid of the running process, when known.
    pub pid: Option<u32>,
}

/// Starts, tracks and stops the companion executable.
#[derive(Debug)]
pub struct ServiceController<C> {
    control: C,
    paths: PlatformPaths,
    config: CompanionConfig,
    os: Os,
    handle: Option<ServiceHandle>,
    state: ServiceState,
}

impl ServiceController<SystemProcesses> {
    /// Controller for the running platform using the OS process tools.
    pub fn system(config: CompanionConfig) -> Result<Self> {
        let os = Os::current()?;
        Ok(Self::new(
            SystemProcesses::new(os),
            PlatformPaths::from_env(),
            config,
            os,
        ))
    }
}

impl<C: ProcessControl> ServiceController<C> {
    /// Create a controller over an explicit process seam.
    pub fn new(control: C, paths: PlatformPaths, config: CompanionConfig, os: Os) -> Self {
        Self {
            control,
            paths,
            config,
            os,
            handle: None,
            state: ServiceState::Unknown,
        }
    }

    /// The process seam.
    pub fn control(&self) -> &C {
        &self.control
    }

    /// The tracked handle, if any.
    pub fn handle(&self) -> Option<&ServiceHandle> {
        self.handle.as_ref()
    }

    /// Last observed state.
    pub fn state(&self) -> ServiceState {
        self.state
    }

    fn executable_name(&self) -> String {
        self.os.executable_name(&self.config.layout.executable)
    }

    fn owns_process(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.started_by_us)
    }

    /// Re-probe the OS and update the observed state.
    pub async fn probe(&mut self) -> ServiceState {
        let running = self.control.is_running(&self.executable_name()).await;
        self.state = match (running, self.owns_process()) {
            (false, _) => ServiceState::NotRunning,
            (true, true) => ServiceState::RunningOwned,
            (true, false) => ServiceState::RunningExternal,
        };
        if !running {
            self.handle = None;
        }
        self.state
    }

    /// First existing candidate in search order.
    pub fn locate(&self) -> Result<CompanionCandidate> {
        let candidates = self
            .paths
            .companion_search_paths(self.os, &self.config.layout);
        if let Some(found) = candidates.iter().find(|c| c.path.is_file()) {
            return Ok(found.clone());
        }
        Err(ServiceError::NotFound {
            searched: candidates.into_iter().map(|c| c.path).collect(),
        })
    }

    /// Start the companion unless one is already running.
    ///
    /// A companion that is already running is never spawned twice: the
    /// returned handle then has `started_by_us == false`, even when this
    /// controller owns the running process.
    pub async fn start(&mut self) -> Result<ServiceHandle> {
        let exe_name = self.executable_name();

        if self.control.is_running(&exe_name).await {
            let handle = self.adopt_running(&exe_name).await;
            tracing::info!(pid = ?handle.pid, "companion already running");
            return Ok(handle);
        }

        let (launch, origin) = self.resolve_launch()?;
        if origin == ServiceOrigin::Bundled && self.os.is_unix() {
            self.ensure_bundle_permissions(&launch.program);
        }

        let pid = self
            .control
            .spawn_detached(&launch)
            .map_err(|e| ServiceError::Spawn {
                path: launch.program.clone(),
                reason: e.to_string(),
            })?;

        let handle = ServiceHandle {
            executable_path: launch.program,
            working_directory: launch.working_dir,
            pid: Some(pid),
            started_by_us: true,
            origin,
            platform: self.os,
        };
        tracing::info!(
            pid,
            path = %handle.executable_path.display(),
            %origin,
            "started companion service"
        );
        self.handle = Some(handle.clone());
        self.state = ServiceState::RunningOwned;
        Ok(handle)
    }

    async fn adopt_running(&mut self, exe_name: &str) -> ServiceHandle {
        if let Some(owned) = self.handle.as_ref().filter(|h| h.started_by_us) {
            self.state = ServiceState::RunningOwned;
            return ServiceHandle {
                started_by_us: false,
                ..owned.clone()
            };
        }

        let pid = self.control.find_pid(exe_name).await;
        let (executable_path, origin) = match self.locate() {
            Ok(found) => (found.path, found.origin),
            Err(_) => (PathBuf::from(exe_name), ServiceOrigin::SystemInstalled),
        };
        let handle = ServiceHandle {
            working_directory: working_dir_of(&executable_path),
            executable_path,
            pid,
            started_by_us: false,
            origin,
            platform: self.os,
        };
        self.handle = Some(handle.clone());
        self.state = ServiceState::RunningExternal;
        handle
    }

    fn resolve_launch(&self) -> Result<(LaunchCommand, ServiceOrigin)> {
        match self.locate() {
            Ok(found) => Ok((
                LaunchCommand {
                    working_dir: working_dir_of(&found.path),
                    program: found.path,
                    args: Vec::new(),
                },
                found.origin,
            )),
            Err(not_found) => self.flatpak_launch().ok_or(not_found),
        }
    }

    fn flatpak_launch(&self) -> Option<(LaunchCommand, ServiceOrigin)> {
        if self.os != Os::Linux {
            return None;
        }
        let app_id = self.config.flatpak_app_id.as_ref()?;
        let flatpak = self.paths.find_on_path("flatpak")?;
        tracing::info!(app_id, "falling back to flatpak companion");
        Some((
            LaunchCommand {
                program: flatpak,
                args: vec!["run".to_string(), app_id.clone()],
                working_dir: self.paths.temp_directory().to_path_buf(),
            },
            ServiceOrigin::SystemInstalled,
        ))
    }

    /// Packaging may drop execute bits on bundled binaries.
    fn ensure_bundle_permissions(&self, executable: &Path) {
        let siblings = executable.parent().into_iter().flat_map(|dir| {
            self.config
                .sibling_binaries
                .iter()
                .map(move |name| dir.join(name))
        });
        for path in std::iter::once(executable.to_path_buf()).chain(siblings) {
            if !path.is_file() {
                continue;
            }
            if let Err(error) = sg_common::ensure_executable(&path) {
                tracing::warn!(%error, path = %path.display(), "could not set executable bit");
            }
        }
    }

    /// Stop the companion if, and only if, this controller started it.
    pub async fn terminate(&mut self) -> TerminationOutcome {
        let Some(handle) = self.handle.as_ref() else {
            return TerminationOutcome::NotRunning;
        };
        if !handle.started_by_us {
            tracing::debug!(pid = ?handle.pid, "companion not started by us, leaving it running");
            return TerminationOutcome::Skipped(SkipReason::NotOwned);
        }

        let outcome = match handle.pid {
            Some(pid) => self.control.kill_pid(pid, true).await,
            None => self.control.kill_by_name(&self.executable_name()).await,
        };

        match outcome {
            KillOutcome::Killed => {
                if self.os == Os::Windows {
                    self.kill_runtime_helpers().await;
                }
                tracing::info!("companion service terminated");
                self.clear(ServiceState::NotRunning);
                TerminationOutcome::Terminated
            }
            KillOutcome::NotFound => {
                self.clear(ServiceState::NotRunning);
                TerminationOutcome::NotRunning
            }
            KillOutcome::Failed(reason) => {
                tracing::warn!(%reason, "failed to terminate companion service");
                TerminationOutcome::Failed(reason)
            }
        }
    }

    async fn kill_runtime_helpers(&self) {
        for helper in &self.config.runtime_helpers {
            let name = self.os.executable_name(helper);
            if let KillOutcome::Failed(reason) = self.control.kill_by_name(&name).await {
                tracing::warn!(%reason, helper = %name, "failed to kill runtime helper");
            }
        }
    }

    /// Kill every process matching the companion's known names, whoever
    /// started them. Meant for full application shutdown.
    pub async fn force_terminate_all(&mut self) {
        let mut patterns = vec![self.executable_name()];
        patterns.extend(
            self.config
                .runtime_helpers
                .iter()
                .map(|helper| self.os.executable_name(helper)),
        );
        if self.os.is_unix() {
            patterns.extend(self.config.extra_kill_patterns.iter().cloned());
        }

        for pattern in &patterns {
            match self.control.kill_by_name(pattern).await {
                KillOutcome::Killed => tracing::info!(pattern, "force-killed processes"),
                KillOutcome::NotFound => {}
                KillOutcome::Failed(reason) => {
                    tracing::warn!(%reason, pattern, "force kill failed");
                }
            }
        }
        self.clear(ServiceState::NotRunning);
    }

    /// Terminate (when ours), wait, start again and confirm it stays up.
    ///
    /// A companion that keeps running because it is not ours is reported as
    /// [`RestartOutcome::KeptRunning`]; nothing was restarted in that case.
    pub async fn restart(&mut self) -> Result<RestartOutcome> {
        let running = self.control.is_running(&self.executable_name()).await;
        if running || self.owns_process() {
            match self.terminate().await {
                TerminationOutcome::Failed(reason) => {
                    tracing::warn!(%reason, "restarting without a clean stop");
                }
                outcome => tracing::debug!(?outcome, "pre-restart termination"),
            }
            tokio::time::sleep(self.config.restart_grace()).await;
        }

        let handle = self.start().await?;
        if !handle.started_by_us {
            tracing::warn!(pid = ?handle.pid, "companion kept running, not restarted");
            return Ok(RestartOutcome::KeptRunning(handle));
        }
        tokio::time::sleep(self.config.verify_delay()).await;

        if !self.control.is_running(&self.executable_name()).await {
            self.clear(ServiceState::NotRunning);
            return Err(ServiceError::NotAlive {
                path: handle.executable_path,
            });
        }
        tracing::info!(pid = ?handle.pid, "companion service restarted");
        Ok(RestartOutcome::Restarted(handle))
    }

    /// Current status for display.
    pub async fn status(&self) -> ServiceStatus {
        let exe_name = self.executable_name();
        let running = self.control.is_running(&exe_name).await;
        let pid = if running {
            match self.handle.as_ref().and_then(|h| h.pid) {
                Some(pid) => Some(pid),
                None => self.control.find_pid(&exe_name).await,
            }
        } else {
            None
        };
        let bundled = self
            .paths
            .companion_search_paths(self.os, &self.config.layout)
            .iter()
            .any(|c| c.origin == ServiceOrigin::Bundled && c.path.is_file());

        ServiceStatus {
            running,
            bundled,
            started_by_us: running && self.owns_process(),
            pid,
        }
    }

    /// Host quit hook: stop the companion if it is ours and forget it.
    pub async fn shutdown(&mut self) -> TerminationOutcome {
        let outcome = self.terminate().await;
        self.clear(ServiceState::Unknown);
        outcome
    }

    fn clear(&mut self, state: ServiceState) {
        self.handle = None;
        self.state = state;
    }
}

fn working_dir_of(executable: &Path) -> PathBuf {
    executable
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}
