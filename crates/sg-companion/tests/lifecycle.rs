//! Companion lifecycle tests against an in-memory process table.

use std::future::{Future, ready};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use sg_common::{Os, PlatformPaths, ServiceOrigin};
use sg_companion::{
    CompanionConfig, KillOutcome, LaunchCommand, ProcessControl, ProcessProbe, RestartOutcome,
    ServiceController, ServiceError, ServiceState, SkipReason, TerminationOutcome,
};

#[derive(Debug, Clone)]
struct FakeProcess {
    pid: u32,
    name: String,
    parent: Option<u32>,
}

#[derive(Debug, Default)]
struct FakeState {
    next_pid: u32,
    processes: Vec<FakeProcess>,
    spawns: Vec<LaunchCommand>,
    kills: Vec<String>,
    child_on_spawn: Option<String>,
    exit_immediately: bool,
    refuse_spawn: bool,
}

/// Process table with parent links. Every kill and spawn is recorded.
#[derive(Debug, Default)]
struct FakeProcesses {
    state: Mutex<FakeState>,
}

impl FakeProcesses {
    fn new() -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().next_pid = 1000;
        fake
    }

    fn with_external(self, name: &str) -> Self {
        self.add(name, None);
        self
    }

    fn add(&self, name: &str, parent: Option<u32>) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.next_pid += 1;
        let pid = state.next_pid;
        state.processes.push(FakeProcess {
            pid,
            name: name.to_string(),
            parent,
        });
        pid
    }

    fn count(&self, pattern: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .processes
            .iter()
            .filter(|p| p.name.contains(pattern))
            .count()
    }

    fn kills(&self) -> Vec<String> {
        self.state.lock().unwrap().kills.clone()
    }

    fn spawns(&self) -> Vec<LaunchCommand> {
        self.state.lock().unwrap().spawns.clone()
    }

    fn set(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock().unwrap());
    }

    fn remove_with_descendants(state: &mut FakeState, roots: Vec<u32>) -> usize {
        let mut doomed = roots;
        let mut index = 0;
        while index < doomed.len() {
            let parent = doomed[index];
            doomed.extend(
                state
                    .processes
                    .iter()
                    .filter(|p| p.parent == Some(parent))
                    .map(|p| p.pid),
            );
            index += 1;
        }
        let before = state.processes.len();
        state.processes.retain(|p| !doomed.contains(&p.pid));
        before - state.processes.len()
    }
}

impl ProcessProbe for FakeProcesses {
    fn is_running(&self, name: &str) -> impl Future<Output = bool> + Send {
        ready(self.count(name) > 0)
    }

    fn find_pid(&self, name: &str) -> impl Future<Output = Option<u32>> + Send {
        let state = self.state.lock().unwrap();
        ready(
            state
                .processes
                .iter()
                .find(|p| p.name.contains(name))
                .map(|p| p.pid),
        )
    }
}

impl ProcessControl for FakeProcesses {
    fn spawn_detached(&self, launch: &LaunchCommand) -> io::Result<u32> {
        let (refuse, exit_immediately, child) = {
            let mut state = self.state.lock().unwrap();
            state.spawns.push(launch.clone());
            (
                state.refuse_spawn,
                state.exit_immediately,
                state.child_on_spawn.clone(),
            )
        };
        if refuse {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        }
        let name = launch
            .program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if exit_immediately {
            let mut state = self.state.lock().unwrap();
            state.next_pid += 1;
            return Ok(state.next_pid);
        }
        let pid = self.add(&name, None);
        if let Some(child) = child {
            self.add(&child, Some(pid));
        }
        Ok(pid)
    }

    fn kill_pid(&self, pid: u32, tree: bool) -> impl Future<Output = KillOutcome> + Send {
        let mut state = self.state.lock().unwrap();
        state.kills.push(format!("pid:{pid}"));
        let removed = if tree {
            FakeProcesses::remove_with_descendants(&mut state, vec![pid])
        } else {
            let before = state.processes.len();
            state.processes.retain(|p| p.pid != pid);
            before - state.processes.len()
        };
        ready(if removed > 0 {
            KillOutcome::Killed
        } else {
            KillOutcome::NotFound
        })
    }

    fn kill_by_name(&self, pattern: &str) -> impl Future<Output = KillOutcome> + Send {
        let mut state = self.state.lock().unwrap();
        state.kills.push(format!("name:{pattern}"));
        let roots = state
            .processes
            .iter()
            .filter(|p| p.name.contains(pattern))
            .map(|p| p.pid)
            .collect();
        let removed = FakeProcesses::remove_with_descendants(&mut state, roots);
        ready(if removed > 0 {
            KillOutcome::Killed
        } else {
            KillOutcome::NotFound
        })
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    resources: PathBuf,
    paths: PlatformPaths,
}

impl Fixture {
    /// A resources directory holding a bundled companion.
    fn bundled() -> Self {
        let fixture = Self::empty();
        let dir = fixture.resources.join("stremio-service");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stremio-service"), b"#!/bin/sh\n").unwrap();
        fixture
    }

    fn empty() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let resources = dir.path().join("resources");
        std::fs::create_dir_all(&resources).unwrap();
        let paths = PlatformPaths::new(dir.path())
            .with_resources_dir(&resources)
            .with_search_path(Vec::new());
        Self {
            resources,
            paths,
            _dir: dir,
        }
    }

    fn bundled_executable(&self) -> PathBuf {
        self.resources.join("stremio-service").join("stremio-service")
    }
}

fn config() -> CompanionConfig {
    let mut config = CompanionConfig::default()
        .with_delays(Duration::ZERO, Duration::ZERO)
        .without_flatpak();
    // Keep the search inside the fixture.
    config.layout.linux_system_dirs = vec![PathBuf::from("/nonexistent/sg-companion-test")];
    config
}

fn controller(fake: FakeProcesses, paths: PlatformPaths) -> ServiceController<FakeProcesses> {
    ServiceController::new(fake, paths, config(), Os::Linux)
}

#[tokio::test]
async fn test_start_twice_spawns_one_process() {
    let fixture = Fixture::bundled();
    let mut controller = controller(FakeProcesses::new(), fixture.paths.clone());

    let first = controller.start().await.unwrap();
    let second = controller.start().await.unwrap();

    assert!(first.started_by_us);
    assert!(!second.started_by_us);
    assert_eq!(first.pid, second.pid);
    assert_eq!(controller.control().spawns().len(), 1);
    assert_eq!(controller.control().count("stremio-service"), 1);
    assert_eq!(controller.state(), ServiceState::RunningOwned);
    assert!(controller.handle().unwrap().started_by_us);
}

#[tokio::test]
async fn test_started_process_is_detached_from_its_directory() {
    let fixture = Fixture::bundled();
    let mut controller = controller(FakeProcesses::new(), fixture.paths.clone());

    let handle = controller.start().await.unwrap();
    let spawn = &controller.control().spawns()[0];

    assert_eq!(handle.origin, ServiceOrigin::Bundled);
    assert_eq!(spawn.program, fixture.bundled_executable());
    assert!(spawn.args.is_empty());
    assert_eq!(
        spawn.working_dir,
        fixture.resources.join("stremio-service")
    );
    assert_eq!(handle.working_directory, spawn.working_dir);
}

#[tokio::test]
async fn test_terminate_not_owned_never_kills() {
    let fixture = Fixture::bundled();
    let fake = FakeProcesses::new().with_external("stremio-service");
    let mut controller = controller(fake, fixture.paths.clone());

    let handle = controller.start().await.unwrap();
    assert!(!handle.started_by_us);
    assert_eq!(controller.state(), ServiceState::RunningExternal);

    let outcome = controller.terminate().await;

    assert_eq!(outcome, TerminationOutcome::Skipped(SkipReason::NotOwned));
    assert!(controller.control().kills().is_empty());
    assert!(controller.control().spawns().is_empty());
    assert_eq!(controller.control().count("stremio-service"), 1);
}

#[tokio::test]
async fn test_terminate_owned_kills_process_tree() {
    let fixture = Fixture::bundled();
    let fake = FakeProcesses::new();
    fake.set(|s| s.child_on_spawn = Some("stremio-runtime".to_string()));
    let mut controller = controller(fake, fixture.paths.clone());

    let handle = controller.start().await.unwrap();
    let pid = handle.pid.unwrap();

    assert_eq!(controller.terminate().await, TerminationOutcome::Terminated);
    assert_eq!(controller.control().kills(), vec![format!("pid:{pid}")]);
    assert_eq!(controller.control().count("stremio"), 0);
    assert!(controller.handle().is_none());
    assert_eq!(controller.state(), ServiceState::NotRunning);
}

#[tokio::test]
async fn test_terminate_without_handle_is_not_running() {
    let mut controller = controller(FakeProcesses::new(), Fixture::empty().paths);
    assert_eq!(controller.terminate().await, TerminationOutcome::NotRunning);
    assert!(controller.control().kills().is_empty());
}

#[tokio::test]
async fn test_start_without_executable_is_not_found() {
    let fixture = Fixture::empty();
    let mut controller = controller(FakeProcesses::new(), fixture.paths.clone());

    let err = controller.start().await.unwrap_err();

    match err {
        ServiceError::NotFound { searched } => {
            assert_eq!(searched.len(), 3);
            assert!(searched[0].starts_with(&fixture.resources));
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(controller.control().spawns().is_empty());
}

#[tokio::test]
async fn test_spawn_refusal_is_spawn_error() {
    let fixture = Fixture::bundled();
    let fake = FakeProcesses::new();
    fake.set(|s| s.refuse_spawn = true);
    let mut controller = controller(fake, fixture.paths.clone());

    let err = controller.start().await.unwrap_err();

    assert!(matches!(err, ServiceError::Spawn { .. }));
    assert!(err.is_retryable());
    assert!(controller.handle().is_none());
}

#[tokio::test]
async fn test_force_terminate_all_kills_parent_and_child() {
    let fixture = Fixture::empty();
    let fake = FakeProcesses::new();
    let parent = fake.add("stremio-service", None);
    fake.add("stremio-runtime", Some(parent));
    let mut controller = controller(fake, fixture.paths.clone());

    assert_eq!(controller.probe().await, ServiceState::RunningExternal);
    controller.force_terminate_all().await;

    assert_eq!(controller.control().count("stremio-service"), 0);
    assert_eq!(controller.control().count("stremio-runtime"), 0);
    assert_eq!(controller.state(), ServiceState::NotRunning);
    assert!(
        controller
            .control()
            .kills()
            .contains(&"name:server.js".to_string())
    );
}

#[tokio::test]
async fn test_force_terminate_all_on_windows_uses_image_names() {
    let fixture = Fixture::empty();
    let fake = FakeProcesses::new();
    let parent = fake.add("stremio-service.exe", None);
    fake.add("stremio-runtime.exe", Some(parent));
    let mut controller = ServiceController::new(fake, fixture.paths.clone(), config(), Os::Windows);

    controller.force_terminate_all().await;

    assert_eq!(controller.control().count("stremio"), 0);
    assert_eq!(
        controller.control().kills(),
        vec![
            "name:stremio-service.exe".to_string(),
            "name:stremio-runtime.exe".to_string()
        ]
    );
}

#[tokio::test]
async fn test_restart_owned_replaces_process() {
    let fixture = Fixture::bundled();
    let mut controller = controller(FakeProcesses::new(), fixture.paths.clone());

    let first = controller.start().await.unwrap();
    let outcome = controller.restart().await.unwrap();

    assert!(outcome.restarted());
    let second = outcome.handle();
    assert!(second.started_by_us);
    assert_ne!(first.pid, second.pid);
    assert_eq!(
        controller.control().kills(),
        vec![format!("pid:{}", first.pid.unwrap())]
    );
    assert_eq!(controller.control().count("stremio-service"), 1);
}

#[tokio::test]
async fn test_restart_external_leaves_it_running() {
    let fixture = Fixture::bundled();
    let fake = FakeProcesses::new().with_external("stremio-service");
    let mut controller = controller(fake, fixture.paths.clone());

    let outcome = controller.restart().await.unwrap();

    let RestartOutcome::KeptRunning(handle) = &outcome else {
        panic!("expected the external companion to be kept, got {outcome:?}");
    };
    assert!(!handle.started_by_us);
    assert!(!outcome.restarted());
    assert!(controller.control().kills().is_empty());
    assert!(controller.control().spawns().is_empty());
}

#[tokio::test]
async fn test_restart_fails_when_process_exits_immediately() {
    let fixture = Fixture::bundled();
    let fake = FakeProcesses::new();
    fake.set(|s| s.exit_immediately = true);
    let mut controller = controller(fake, fixture.paths.clone());

    let err = controller.restart().await.unwrap_err();

    assert!(matches!(err, ServiceError::NotAlive { .. }));
    assert!(controller.handle().is_none());
}

#[tokio::test]
async fn test_status_reports_ownership() {
    let fixture = Fixture::bundled();
    let mut controller = controller(FakeProcesses::new(), fixture.paths.clone());

    let before = controller.status().await;
    assert!(!before.running);
    assert!(before.bundled);
    assert!(!before.started_by_us);

    let handle = controller.start().await.unwrap();
    let after = controller.status().await;
    assert!(after.running);
    assert!(after.started_by_us);
    assert_eq!(after.pid, handle.pid);
}

#[tokio::test]
async fn test_shutdown_only_stops_owned() {
    let fixture = Fixture::bundled();
    let fake = FakeProcesses::new().with_external("stremio-service");
    let mut controller = controller(fake, fixture.paths.clone());
    controller.start().await.unwrap();

    let outcome = controller.shutdown().await;

    assert_eq!(outcome, TerminationOutcome::Skipped(SkipReason::NotOwned));
    assert_eq!(controller.state(), ServiceState::Unknown);
    assert!(controller.handle().is_none());
    assert_eq!(controller.control().count("stremio-service"), 1);
}

#[tokio::test]
async fn test_flatpak_fallback_when_nothing_installed() {
    let fixture = Fixture::empty();
    let bin = fixture.resources.join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    std::fs::write(bin.join("flatpak"), b"").unwrap();
    let paths = fixture.paths.clone().with_search_path(vec![bin.clone()]);
    let mut config = config();
    config.flatpak_app_id = Some("com.stremio.Service".to_string());
    let mut controller = ServiceController::new(FakeProcesses::new(), paths, config, Os::Linux);

    let handle = controller.start().await.unwrap();
    let spawn = &controller.control().spawns()[0];

    assert_eq!(handle.origin, ServiceOrigin::SystemInstalled);
    assert_eq!(spawn.program, bin.join("flatpak"));
    assert_eq!(spawn.args, vec!["run", "com.stremio.Service"]);
}

#[cfg(unix)]
#[tokio::test]
async fn test_bundled_binaries_made_executable() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::bundled();
    let exe = fixture.bundled_executable();
    let ffmpeg = exe.with_file_name("ffmpeg");
    std::fs::write(&ffmpeg, b"").unwrap();
    for path in [&exe, &ffmpeg] {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)).unwrap();
    }
    let mut controller = controller(FakeProcesses::new(), fixture.paths.clone());

    controller.start().await.unwrap();

    for path in [&exe, &ffmpeg] {
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
    assert!(!exe.with_file_name("ffprobe").exists());
}
