//! Helper script plumbing: quoting, private directories, writing.

use std::path::{Path, PathBuf};

use crate::error::InstallError;

/// Polls `kill -0` every 100 ms, for up to 30 seconds.
pub(crate) fn sh_wait_for_pid(pid: u32) -> String {
    format!(
        "i=0\n\
         while kill -0 {pid} 2>/dev/null; do\n\
         \x20   i=$((i + 1))\n\
         \x20   if [ \"$i\" -ge 300 ]; then\n\
         \x20       echo \"parent {pid} still running, continuing\"\n\
         \x20       break\n\
         \x20   fi\n\
         \x20   sleep 0.1\n\
         done\n"
    )
}

/// Single-quote for POSIX `sh`.
pub(crate) fn sh_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

/// Double-quote for `cmd.exe`, escaping `%` expansion.
pub(crate) fn cmd_quote(path: &Path) -> String {
    format!("\"{}\"", path.to_string_lossy().replace('%', "%%"))
}

/// Single-quote for PowerShell.
pub(crate) fn ps_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "''"))
}

/// Create a directory only this user can read, under `base`. It outlives the
/// process; the helper removes it.
pub(crate) fn private_dir(base: &Path) -> Result<PathBuf, InstallError> {
    let dir = tempfile::Builder::new()
        .prefix("streamgo-update-")
        .tempdir_in(base)
        .map_err(|e| InstallError::HelperScript(format!("temp dir in {}: {e}", base.display())))?;
    Ok(dir.keep())
}

/// Write `contents` to `path`, executable by the owner only on Unix.
pub(crate) fn write_script(path: &Path, contents: &str) -> Result<(), InstallError> {
    std::fs::write(path, contents)
        .map_err(|e| InstallError::HelperScript(format!("{}: {e}", path.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| InstallError::HelperScript(format!("{}: {e}", path.display())))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sh_quote() {
        assert_eq!(sh_quote(Path::new("/tmp/a b")), "'/tmp/a b'");
        assert_eq!(sh_quote(Path::new("/tmp/it's")), r"'/tmp/it'\''s'");
    }

    #[test]
    fn test_cmd_and_ps_quote() {
        assert_eq!(
            cmd_quote(Path::new(r"C:\Users\100%\setup.exe")),
            r#""C:\Users\100%%\setup.exe""#
        );
        assert_eq!(ps_quote(Path::new(r"C:\O'Brien\setup.exe")), r"'C:\O''Brien\setup.exe'");
    }

    #[test]
    fn test_wait_loop_polls_parent() {
        let script = sh_wait_for_pid(4242);
        assert!(script.contains("kill -0 4242"));
        assert!(script.contains("sleep 0.1"));
    }

    #[test]
    fn test_private_dir_is_created_and_kept() {
        let base = tempfile::tempdir().unwrap();
        let dir = private_dir(base.path()).unwrap();
        assert!(dir.is_dir());
        assert!(dir.starts_with(base.path()));
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("streamgo-update-"));
    }
}
