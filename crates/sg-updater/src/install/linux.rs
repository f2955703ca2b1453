//! Linux: replace the running AppImage in place.
//!
//! Only relocatable single-file builds can update themselves. When the app
//! runs from a distribution package the artifact is left for the user.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use sg_common::Os;

use super::script::{sh_quote, sh_wait_for_pid};
use super::{InstallContext, InstallPlan, PlatformInstaller, expect_file};
use crate::error::InstallError;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Swaps the AppImage with a backup, then relaunches it.
#[derive(Debug, Clone)]
pub struct LinuxInstaller {
    context: InstallContext,
}

impl LinuxInstaller {
    /// Installer for the given context.
    #[must_use]
    pub fn new(context: InstallContext) -> Self {
        Self { context }
    }
}

impl PlatformInstaller for LinuxInstaller {
    fn platform(&self) -> Os {
        Os::Linux
    }

    fn script_name(&self) -> &'static str {
        "streamgo-update.sh"
    }

    fn temp_directory(&self) -> &Path {
        self.context.paths.temp_directory()
    }

    fn prepare(&self, artifact: &Path) -> Result<InstallPlan, InstallError> {
        let Some(target) = self.context.paths.relocatable_executable() else {
            tracing::info!(
                artifact = %artifact.display(),
                "not running from an AppImage, leaving the download for manual install"
            );
            return Err(InstallError::ManualInstallRequired {
                artifact: artifact.to_path_buf(),
            });
        };

        expect_file(artifact)?;
        check_elf(artifact)?;
        sg_common::ensure_executable(artifact).map_err(|e| InstallError::NotExecutable {
            path: artifact.to_path_buf(),
            reason: e.to_string(),
        })?;
        check_writable(target)?;

        Ok(self
            .context
            .base_plan(Os::Linux, artifact, target.to_path_buf()))
    }

    fn render_helper(&self, plan: &InstallPlan) -> String {
        let helper_dir = plan
            .helper_dir()
            .map_or_else(|| self.temp_directory().to_path_buf(), Path::to_path_buf);

        let mut script = String::from("#!/bin/sh\n");
        script.push_str(&format!("exec >>{} 2>&1\n", sh_quote(&plan.log_path)));
        script.push_str(&format!("NEW={}\n", sh_quote(&plan.artifact_path)));
        script.push_str(&format!("TARGET={}\n", sh_quote(&plan.installed_app_path)));
        script.push_str(&format!("HELPER_DIR={}\n", sh_quote(&helper_dir)));
        script.push_str("BACKUP=\"$TARGET.backup\"\n");
        script.push_str("STAGED=\"$TARGET.new\"\n");
        script.push_str("echo \"[$(date)] update helper started\"\n");
        script.push_str(&sh_wait_for_pid(plan.parent_pid));
        script.push_str(
            r#"
finish() {
    rm -f "$NEW" "$STAGED"
    rm -f "$0"
    rmdir "$HELPER_DIR" 2>/dev/null
}

if ! cp "$NEW" "$STAGED" || ! chmod 755 "$STAGED"; then
    echo "cannot stage $NEW next to $TARGET"
    finish
    exit 1
fi

cp -p "$TARGET" "$BACKUP"

if ! mv -f "$STAGED" "$TARGET"; then
    echo "replace failed"
    [ -e "$TARGET" ] || mv -f "$BACKUP" "$TARGET"
    finish
    exit 1
fi

chmod 755 "$TARGET"
echo "[$(date)] installed, relaunching"
nohup "$TARGET" >/dev/null 2>&1 &
rm -f "$BACKUP"
finish
"#,
        );
        script
    }

    fn helper_command(&self, script: &Path) -> Command {
        let mut command = Command::new("/bin/sh");
        command.arg(script).current_dir(self.temp_directory());
        command
    }
}

fn check_elf(artifact: &Path) -> Result<(), InstallError> {
    let mut file = std::fs::File::open(artifact).map_err(|e| InstallError::Io {
        path: artifact.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut magic = [0u8; 4];
    let is_elf = file.read_exact(&mut magic).is_ok() && magic == ELF_MAGIC;
    if is_elf {
        Ok(())
    } else {
        Err(InstallError::UnexpectedArtifact {
            artifact: artifact.to_path_buf(),
            reason: "not an ELF executable".to_string(),
        })
    }
}

fn check_writable(target: &Path) -> Result<(), InstallError> {
    let dir = target
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    tempfile::NamedTempFile::new_in(&dir)
        .map(drop)
        .map_err(|e| InstallError::Permission(format!("{} is not writable: {e}", dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_common::PlatformPaths;

    fn write_elf(path: &Path) {
        let mut bytes = ELF_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 60]);
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_package_install_requires_manual_step() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("StreamGo-linux-x86_64.AppImage");
        write_elf(&artifact);

        let paths = PlatformPaths::new(dir.path()).with_current_exe("/usr/bin/streamgo");
        let installer = LinuxInstaller::new(InstallContext::new(paths, "StreamGo"));
        match installer.prepare(&artifact) {
            Err(InstallError::ManualInstallRequired { artifact: left }) => {
                assert_eq!(left, artifact);
            }
            other => panic!("expected ManualInstallRequired, got {other:?}"),
        }
    }

    #[test]
    fn test_prepare_rejects_non_elf() {
        let dir = tempfile::tempdir().unwrap();
        let running = dir.path().join("StreamGo.AppImage");
        write_elf(&running);
        let artifact = dir.path().join("download.AppImage");
        std::fs::write(&artifact, b"<html>rate limited</html>").unwrap();

        let paths = PlatformPaths::new(dir.path()).with_appimage(&running);
        let installer = LinuxInstaller::new(InstallContext::new(paths, "StreamGo"));
        assert!(matches!(
            installer.prepare(&artifact),
            Err(InstallError::UnexpectedArtifact { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_prepare_marks_artifact_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let running = dir.path().join("StreamGo.AppImage");
        write_elf(&running);
        let artifact = dir.path().join("download.AppImage");
        write_elf(&artifact);
        std::fs::set_permissions(&artifact, std::fs::Permissions::from_mode(0o644)).unwrap();

        let paths = PlatformPaths::new(dir.path()).with_appimage(&running);
        let installer =
            LinuxInstaller::new(InstallContext::new(paths, "StreamGo").with_parent_pid(99));
        let plan = installer.prepare(&artifact).unwrap();

        assert_eq!(plan.installed_app_path, running);
        assert_eq!(plan.parent_pid, 99);
        let mode = std::fs::metadata(&artifact).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_helper_backs_up_before_replacing() {
        let paths = PlatformPaths::new("/tmp").with_appimage("/home/me/Apps/StreamGo.AppImage");
        let installer = LinuxInstaller::new(InstallContext::new(paths, "StreamGo"));
        let plan = InstallPlan {
            platform: Os::Linux,
            artifact_path: PathBuf::from("/tmp/dl/StreamGo-linux-x86_64.AppImage"),
            installed_app_path: PathBuf::from("/home/me/Apps/StreamGo.AppImage"),
            helper_script_path: Some(PathBuf::from("/tmp/streamgo-update-q/streamgo-update.sh")),
            parent_pid: 5150,
            log_path: PathBuf::from("/tmp/streamgo-update.log"),
        };
        let script = installer.render_helper(&plan);

        assert!(script.contains("TARGET='/home/me/Apps/StreamGo.AppImage'"));
        let wait = script.find("kill -0 5150").unwrap();
        let backup = script.find("cp -p \"$TARGET\" \"$BACKUP\"").unwrap();
        let swap = script.find("mv -f \"$STAGED\" \"$TARGET\"").unwrap();
        let relaunch = script.find("nohup \"$TARGET\"").unwrap();
        let drop_backup = script.find("rm -f \"$BACKUP\"").unwrap();
        assert!(wait < backup && backup < swap && swap < relaunch);
        assert!(relaunch < drop_backup);
        assert!(script.contains("rm -f \"$0\""));
    }
}
