//! OS process queries and control.
//!
//! [`ProcessProbe`] answers "is it running" and never fails: when the OS tool
//! cannot be invoked the answer is `false`/`None` and a warning is logged.
//! [`ProcessControl`] adds the side-effecting operations the controller needs.
//!
//! | OS      | list                           | kill pid              | kill by name            |
//! |---------|--------------------------------|-----------------------|-------------------------|
//! | Windows | `tasklist /FI "IMAGENAME eq"`  | `taskkill /F /T /PID` | `taskkill /F /T /IM`    |
//! | Unix    | `pgrep -f`                     | `kill -TERM`          | `pkill -9 -f`           |

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Output;

use sg_common::Os;
use tokio::process::Command;

/// Liveness queries by executable name.
pub trait ProcessProbe: Send + Sync {
    /// Whether a process matching `name` is running.
    fn is_running(&self, name: &str) -> impl Future<Output = bool> + Send;

    /// Pid of the first process matching `name`.
    fn find_pid(&self, name: &str) -> impl Future<Output = Option<u32>> + Send;
}

/// Result of a kill request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    /// At least one process was signalled.
    Killed,
    /// Nothing matched.
    NotFound,
    /// The OS tool reported an error.
    Failed(String),
}

/// A process to start detached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments, empty for the companion itself.
    pub args: Vec<String>,
    /// Working directory of the child.
    pub working_dir: PathBuf,
}

/// Spawning and killing processes, on top of [`ProcessProbe`].
pub trait ProcessControl: ProcessProbe {
    /// Start `launch` detached and return its pid.
    fn spawn_detached(&self, launch: &LaunchCommand) -> io::Result<u32>;

    /// Kill one process; `tree` also kills its descendants.
    fn kill_pid(&self, pid: u32, tree: bool) -> impl Future<Output = KillOutcome> + Send;

    /// Forcefully kill every process matching `pattern`, with descendants.
    fn kill_by_name(&self, pattern: &str) -> impl Future<Output = KillOutcome> + Send;
}

/// [`ProcessControl`] backed by the OS process tools.
#[derive(Debug, Clone, Copy)]
pub struct SystemProcesses {
    os: Os,
}

impl SystemProcesses {
    /// Process control for the given OS.
    #[must_use]
    pub const fn new(os: Os) -> Self {
        Self { os }
    }

    /// The OS whose tools are invoked.
    #[must_use]
    pub const fn os(&self) -> Os {
        self.os
    }

    async fn list(&self, name: &str) -> Option<Vec<u32>> {
        let output = match self.os {
            Os::Windows => {
                let filter = format!("IMAGENAME eq {name}");
                run_tool("tasklist", &["/FI", filter.as_str(), "/FO", "CSV", "/NH"]).await
            }
            Os::MacOs | Os::Linux => run_tool("pgrep", &["-f", name]).await,
        };

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                Some(match self.os {
                    Os::Windows => parse_tasklist_pids(&stdout, name),
                    Os::MacOs | Os::Linux => parse_pgrep_pids(&stdout),
                })
            }
            Err(error) => {
                tracing::warn!(%error, name, "process listing unavailable");
                None
            }
        }
    }
}

impl ProcessProbe for SystemProcesses {
    async fn is_running(&self, name: &str) -> bool {
        self.list(name).await.is_some_and(|pids| !pids.is_empty())
    }

    async fn find_pid(&self, name: &str) -> Option<u32> {
        self.list(name).await.and_then(|pids| pids.first().copied())
    }
}

impl ProcessControl for SystemProcesses {
    fn spawn_detached(&self, launch: &LaunchCommand) -> io::Result<u32> {
        let mut command = std::process::Command::new(&launch.program);
        command.args(&launch.args).current_dir(&launch.working_dir);
        sg_common::spawn_detached(command)
    }

    async fn kill_pid(&self, pid: u32, tree: bool) -> KillOutcome {
        let pid_arg = pid.to_string();
        let result = match self.os {
            Os::Windows => {
                let mut args = vec!["/F"];
                if tree {
                    args.push("/T");
                }
                args.extend(["/PID", pid_arg.as_str()]);
                run_tool("taskkill", &args).await
            }
            Os::MacOs | Os::Linux => {
                // Detached children lead their own process group.
                let group = format!("-{pid}");
                let target = if tree { group.as_str() } else { pid_arg.as_str() };
                run_tool("kill", &["-TERM", "--", target]).await
            }
        };
        kill_outcome(result)
    }

    async fn kill_by_name(&self, pattern: &str) -> KillOutcome {
        let result = match self.os {
            Os::Windows => run_tool("taskkill", &["/F", "/T", "/IM", pattern]).await,
            Os::MacOs | Os::Linux => run_tool("pkill", &["-9", "-f", pattern]).await,
        };
        kill_outcome(result)
    }
}

async fn run_tool(program: &str, args: &[&str]) -> io::Result<Output> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    command.output().await
}

fn kill_outcome(result: io::Result<Output>) -> KillOutcome {
    let output = match result {
        Ok(output) => output,
        Err(error) => return KillOutcome::Failed(error.to_string()),
    };
    if output.status.success() {
        return KillOutcome::Killed;
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let lowered = stderr.to_lowercase();
    // pkill exits 1 on no match; taskkill exits 128 when the image is unknown.
    let no_match = matches!(output.status.code(), Some(1) if stderr.is_empty())
        || output.status.code() == Some(128)
        || lowered.contains("no such process")
        || lowered.contains("not found");
    if no_match {
        KillOutcome::NotFound
    } else {
        KillOutcome::Failed(stderr)
    }
}

/// Pids from `tasklist /FO CSV /NH` output.
fn parse_tasklist_pids(stdout: &str, image: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut columns = line.split("\",\"");
            let name = columns.next()?.trim_start_matches('"');
            if !name.eq_ignore_ascii_case(image) {
                return None;
            }
            columns.next()?.trim_matches('"').parse().ok()
        })
        .collect()
}

/// Pids from `pgrep` output, one per line.
fn parse_pgrep_pids(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tasklist() {
        let stdout = "\"stremio-service.exe\",\"4242\",\"Console\",\"1\",\"52,104 K\"\r\n\
                      \"stremio-service.exe\",\"4300\",\"Console\",\"1\",\"1,024 K\"\r\n";
        assert_eq!(
            parse_tasklist_pids(stdout, "stremio-service.exe"),
            vec![4242, 4300]
        );
    }

    #[test]
    fn test_parse_tasklist_no_match_message() {
        let stdout = "INFO: No tasks are running which match the specified criteria.\r\n";
        assert!(parse_tasklist_pids(stdout, "stremio-service.exe").is_empty());
    }

    #[test]
    fn test_parse_pgrep() {
        assert_eq!(parse_pgrep_pids("123\n456\n\n"), vec![123, 456]);
        assert!(parse_pgrep_pids("").is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_process_is_not_running() {
        let probe = SystemProcesses::new(Os::current().unwrap());
        assert!(!probe.is_running("sg-companion-test-no-such-process-7f3a").await);
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_outcome_classification() {
        use std::os::unix::process::ExitStatusExt;

        let no_match = Output {
            status: std::process::ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: Vec::new(),
        };
        assert_eq!(kill_outcome(Ok(no_match)), KillOutcome::NotFound);

        let denied = Output {
            status: std::process::ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: b"kill: (1) - Operation not permitted".to_vec(),
        };
        assert!(matches!(kill_outcome(Ok(denied)), KillOutcome::Failed(_)));
    }
}
