//! macOS: swap the `.app` bundle from a mounted disk image.

use std::path::{Path, PathBuf};
use std::process::Command;

use sg_common::Os;

use super::script::{sh_quote, sh_wait_for_pid};
use super::{InstallContext, InstallPlan, PlatformInstaller, expect_extension, expect_file};
use crate::error::InstallError;

/// Mounts the disk image, replaces the bundle with a backup and rollback,
/// clears quarantine and reopens the app.
#[derive(Debug, Clone)]
pub struct MacOsInstaller {
    context: InstallContext,
}

impl MacOsInstaller {
    /// Installer for the given context.
    #[must_use]
    pub fn new(context: InstallContext) -> Self {
        Self { context }
    }

    fn target_bundle(&self) -> PathBuf {
        self.context
            .paths
            .installed_app_path(Os::MacOs)
            .unwrap_or_else(|| {
                PathBuf::from("/Applications").join(format!("{}.app", self.context.app_name))
            })
    }
}

impl PlatformInstaller for MacOsInstaller {
    fn platform(&self) -> Os {
        Os::MacOs
    }

    fn script_name(&self) -> &'static str {
        "streamgo-update.sh"
    }

    fn temp_directory(&self) -> &Path {
        self.context.paths.temp_directory()
    }

    fn prepare(&self, artifact: &Path) -> Result<InstallPlan, InstallError> {
        expect_file(artifact)?;
        expect_extension(artifact, "dmg")?;
        Ok(self
            .context
            .base_plan(Os::MacOs, artifact, self.target_bundle()))
    }

    fn render_helper(&self, plan: &InstallPlan) -> String {
        let helper_dir = plan
            .helper_dir()
            .map_or_else(|| self.temp_directory().to_path_buf(), Path::to_path_buf);
        let mount = helper_dir.join("mnt");

        let mut script = String::from("#!/bin/sh\n");
        script.push_str(&format!("exec >>{} 2>&1\n", sh_quote(&plan.log_path)));
        script.push_str(&format!("DMG={}\n", sh_quote(&plan.artifact_path)));
        script.push_str(&format!("TARGET={}\n", sh_quote(&plan.installed_app_path)));
        script.push_str(&format!("MOUNT={}\n", sh_quote(&mount)));
        script.push_str(&format!("HELPER_DIR={}\n", sh_quote(&helper_dir)));
        script.push_str("BACKUP=\"$TARGET.backup\"\n");
        script.push_str("echo \"[$(date)] update helper started\"\n");
        script.push_str(&sh_wait_for_pid(plan.parent_pid));
        script.push_str(
            r#"
cleanup() {
    hdiutil detach "$MOUNT" -quiet || hdiutil detach "$MOUNT" -force -quiet
    rm -f "$DMG"
    rm -f "$0"
    rmdir "$MOUNT" "$HELPER_DIR" 2>/dev/null
}

mkdir -p "$MOUNT"
if ! hdiutil attach "$DMG" -nobrowse -readonly -noautoopen -mountpoint "$MOUNT"; then
    echo "failed to mount $DMG"
    rm -f "$0"
    exit 1
fi

SOURCE=$(find "$MOUNT" -maxdepth 1 -name '*.app' -print | head -n 1)
if [ -z "$SOURCE" ]; then
    echo "no application bundle inside $DMG"
    cleanup
    exit 1
fi

rm -rf "$BACKUP"
if [ -e "$TARGET" ] && ! mv "$TARGET" "$BACKUP"; then
    echo "cannot move $TARGET aside"
    cleanup
    exit 1
fi

if ! ditto "$SOURCE" "$TARGET"; then
    echo "copy failed, restoring previous version"
    rm -rf "$TARGET"
    [ -e "$BACKUP" ] && mv "$BACKUP" "$TARGET"
    cleanup
    open "$TARGET"
    exit 1
fi

rm -rf "$BACKUP"
xattr -dr com.apple.quarantine "$TARGET" 2>/dev/null
cleanup
echo "[$(date)] installed, relaunching"
open "$TARGET"
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

#[cfg(test)]
mod tests {
    use super::*;
    use sg_common::PlatformPaths;

    fn installer(exe: Option<&str>) -> MacOsInstaller {
        let mut paths = PlatformPaths::new("/private/tmp");
        if let Some(exe) = exe {
            paths = paths.with_current_exe(exe);
        }
        MacOsInstaller::new(InstallContext::new(paths, "StreamGo").with_parent_pid(311))
    }

    #[test]
    fn test_target_is_enclosing_bundle() {
        let installer = installer(Some("/Users/me/Apps/StreamGo.app/Contents/MacOS/StreamGo"));
        assert_eq!(
            installer.target_bundle(),
            PathBuf::from("/Users/me/Apps/StreamGo.app")
        );
    }

    #[test]
    fn test_target_falls_back_to_applications() {
        assert_eq!(
            installer(Some("/usr/local/bin/streamgo")).target_bundle(),
            PathBuf::from("/Applications/StreamGo.app")
        );
        assert_eq!(
            installer(None).target_bundle(),
            PathBuf::from("/Applications/StreamGo.app")
        );
    }

    #[test]
    fn test_helper_order() {
        let plan = InstallPlan {
            platform: Os::MacOs,
            artifact_path: PathBuf::from("/private/tmp/dl/StreamGo-macos-arm64.dmg"),
            installed_app_path: PathBuf::from("/Applications/StreamGo.app"),
            helper_script_path: Some(PathBuf::from(
                "/private/tmp/streamgo-update-ab/streamgo-update.sh",
            )),
            parent_pid: 311,
            log_path: PathBuf::from("/private/tmp/streamgo-update.log"),
        };
        let script = installer(None).render_helper(&plan);

        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("MOUNT='/private/tmp/streamgo-update-ab/mnt'"));
        let wait = script.find("kill -0 311").unwrap();
        let attach = script.find("hdiutil attach").unwrap();
        let backup = script.find("mv \"$TARGET\" \"$BACKUP\"").unwrap();
        let copy = script.find("ditto \"$SOURCE\" \"$TARGET\"").unwrap();
        let unquarantine = script.find("com.apple.quarantine").unwrap();
        let relaunch = script.rfind("open \"$TARGET\"").unwrap();
        assert!(wait < attach && attach < backup && backup < copy);
        assert!(copy < unquarantine && unquarantine < relaunch);
        assert!(script.contains("rm -f \"$0\""));
    }

    #[test]
    fn test_prepare_requires_dmg() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("StreamGo.zip");
        std::fs::write(&artifact, b"PK").unwrap();
        assert!(matches!(
            installer(None).prepare(&artifact),
            Err(InstallError::UnexpectedArtifact { .. })
        ));

        let dmg = dir.path().join("StreamGo.dmg");
        std::fs::write(&dmg, b"koly").unwrap();
        let plan = installer(None).prepare(&dmg).unwrap();
        assert_eq!(plan.platform, Os::MacOs);
        assert_eq!(plan.parent_pid, 311);
    }
}
