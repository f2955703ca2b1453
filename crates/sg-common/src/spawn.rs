//! Fire-and-forget process spawning.
//!
//! A detached child outlives the caller. Once [`spawn_detached`] returns, the
//! caller holds nothing that needs cleanup: stdio is closed and on Unix a
//! background thread reaps the child when it exits.

use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

/// Spawn `command` detached from this process and return its pid.
pub fn spawn_detached(mut command: Command) -> io::Result<u32> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;

        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        // Own process group so terminal signals aimed at us do not reach it.
        command.process_group(0);
    }

    let mut child = command.spawn()?;
    let pid = child.id();
    tracing::debug!(pid, program = ?command.get_program(), "spawned detached process");

    #[cfg(unix)]
    std::thread::spawn(move || {
        let _ = child.wait();
    });
    #[cfg(not(unix))]
    drop(child);

    Ok(pid)
}

/// Set mode `0o755` on `path` unless every execute bit is already set.
///
/// Returns `true` when the mode was changed. A no-op on non-Unix targets.
pub fn ensure_executable(path: &Path) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = std::fs::metadata(path)?.permissions();
        if perms.mode() & 0o111 == 0o111 {
            return Ok(false);
        }
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms)?;
        tracing::debug!(path = %path.display(), "set executable permission");
        Ok(true)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(false)
    }
}
