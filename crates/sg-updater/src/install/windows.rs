//! Windows: run the setup executable once the app has exited.

use std::path::Path;
use std::process::Command;

use sg_common::Os;

use super::script::{cmd_quote, ps_quote};
use super::{InstallContext, InstallPlan, PlatformInstaller, expect_extension, expect_file};
use crate::error::InstallError;

/// Runs the setup executable silently with elevation, then relaunches.
#[derive(Debug, Clone)]
pub struct WindowsInstaller {
    context: InstallContext,
}

impl WindowsInstaller {
    /// Installer for the given context.
    #[must_use]
    pub fn new(context: InstallContext) -> Self {
        Self { context }
    }
}

impl PlatformInstaller for WindowsInstaller {
    fn platform(&self) -> Os {
        Os::Windows
    }

    fn script_name(&self) -> &'static str {
        "streamgo-update.cmd"
    }

    fn temp_directory(&self) -> &Path {
        self.context.paths.temp_directory()
    }

    fn prepare(&self, artifact: &Path) -> Result<InstallPlan, InstallError> {
        expect_file(artifact)?;
        expect_extension(artifact, "exe")?;
        let installed = self
            .context
            .paths
            .installed_app_path(Os::Windows)
            .ok_or(InstallError::UnknownInstallPath)?;
        Ok(self.context.base_plan(Os::Windows, artifact, installed))
    }

    fn render_helper(&self, plan: &InstallPlan) -> String {
        let pid = plan.parent_pid;
        let log = cmd_quote(&plan.log_path);
        let installer = cmd_quote(&plan.artifact_path);
        let app = cmd_quote(&plan.installed_app_path);
        let elevated = format!(
            "powershell -NoProfile -NonInteractive -Command \"try {{ $p = Start-Process -FilePath {} -ArgumentList '/S' -Verb RunAs -Wait -PassThru; exit $p.ExitCode }} catch {{ exit 1223 }}\"",
            ps_quote(&plan.artifact_path)
        );
        let helper_dir = plan.helper_dir().map(cmd_quote).unwrap_or_default();

        [
            "@echo off".to_string(),
            "setlocal".to_string(),
            format!("echo [%date% %time%] update helper waiting for {pid} >> {log}"),
            ":wait".to_string(),
            format!("tasklist /FI \"PID eq {pid}\" /NH 2>nul | find \"{pid}\" >nul"),
            "if not errorlevel 1 (".to_string(),
            "    timeout /t 1 /nobreak >nul".to_string(),
            "    goto wait".to_string(),
            ")".to_string(),
            format!("echo [%date% %time%] running installer {installer} >> {log}"),
            elevated,
            "set RESULT=%errorlevel%".to_string(),
            format!("echo [%date% %time%] installer exited with %RESULT% >> {log}"),
            format!("del /f /q {installer} >nul 2>&1"),
            "if \"%RESULT%\"==\"0\" (".to_string(),
            format!("    if exist {app} start \"\" {app}"),
            ")".to_string(),
            format!("(goto) 2>nul & del \"%~f0\" & rmdir /q {helper_dir}"),
            String::new(),
        ]
        .join("\r\n")
    }

    fn helper_command(&self, script: &Path) -> Command {
        let mut command = Command::new("cmd");
        command
            .arg("/C")
            .arg(script)
            .current_dir(self.context.paths.temp_directory());
        command
    }
}
