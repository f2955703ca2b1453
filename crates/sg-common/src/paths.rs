//! Platform filesystem locations.
//!
//! [`PlatformPaths`] is a snapshot of the environment taken once (see
//! [`PlatformPaths::from_env`]). Every lookup after that is a pure function of
//! the snapshot, so tests build one by hand with the `with_*` methods.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::platform::Os;

/// Where a companion executable came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOrigin {
    /// Shipped inside the application package.
    Bundled,
    /// Installed separately at a platform-conventional location.
    SystemInstalled,
}

impl fmt::Display for ServiceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundled => f.write_str("bundled"),
            Self::SystemInstalled => f.write_str("system"),
        }
    }
}

/// A location that may hold the companion executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionCandidate {
    /// Full path of the executable.
    pub path: PathBuf,
    /// Whether the path is the bundled copy or a system install.
    pub origin: ServiceOrigin,
}

/// Naming conventions of the companion executable on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionLayout {
    /// Executable base name, without any `.exe` suffix.
    pub executable: String,
    /// Directory under the application resources holding the bundled copy.
    pub resource_dir: String,
    /// Directory name under `Program Files` style roots on Windows.
    pub windows_install_dir: String,
    /// Bundle name under `/Applications` on macOS.
    pub macos_bundle: String,
    /// Directories searched on Linux, in order.
    pub linux_system_dirs: Vec<PathBuf>,
}

impl Default for CompanionLayout {
    fn default() -> Self {
        Self {
            executable: "stremio-service".to_string(),
            resource_dir: "stremio-service".to_string(),
            windows_install_dir: "StremioService".to_string(),
            macos_bundle: "StremioService.app".to_string(),
            linux_system_dirs: vec![
                PathBuf::from("/usr/bin"),
                PathBuf::from("/usr/local/bin"),
                PathBuf::from("/opt/stremio-service"),
                PathBuf::from("/usr/lib/stremio-service"),
            ],
        }
    }
}

/// Snapshot of the directories the lifecycle code needs.
#[derive(Debug, Clone, Default)]
pub struct PlatformPaths {
    current_exe: Option<PathBuf>,
    resources_dir: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    temp_dir: PathBuf,
    local_app_data: Option<PathBuf>,
    program_files: Option<PathBuf>,
    program_files_x86: Option<PathBuf>,
    appimage: Option<PathBuf>,
    search_path: Vec<PathBuf>,
}

impl PlatformPaths {
    /// Capture the locations of the running process.
    #[must_use]
    pub fn from_env() -> Self {
        let current_exe = std::env::current_exe().ok();
        let resources_dir = current_exe.as_deref().and_then(resources_dir_for);

        Self {
            current_exe,
            resources_dir,
            working_dir: std::env::current_dir().ok(),
            temp_dir: std::env::temp_dir(),
            local_app_data: env_path("LOCALAPPDATA"),
            program_files: env_path("ProgramFiles"),
            program_files_x86: env_path("ProgramFiles(x86)"),
            appimage: env_path("APPIMAGE"),
            search_path: std::env::var_os("PATH")
                .map(|path| std::env::split_paths(&path).collect())
                .unwrap_or_default(),
        }
    }

    /// An empty snapshot rooted at the given temp directory.
    #[must_use]
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            ..Self::default()
        }
    }

    /// Set the running executable.
    #[must_use]
    pub fn with_current_exe(mut self, path: impl Into<PathBuf>) -> Self {
        self.current_exe = Some(path.into());
        self
    }

    /// Set the directory that holds bundled resources.
    #[must_use]
    pub fn with_resources_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.resources_dir = Some(path.into());
        self
    }

    /// Set the process working directory.
    #[must_use]
    pub fn with_working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    /// Set `%LOCALAPPDATA%`.
    #[must_use]
    pub fn with_local_app_data(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_app_data = Some(path.into());
        self
    }

    /// Set `%ProgramFiles%` and `%ProgramFiles(x86)%`.
    #[must_use]
    pub fn with_program_files(
        mut self,
        program_files: impl Into<PathBuf>,
        program_files_x86: Option<PathBuf>,
    ) -> Self {
        self.program_files = Some(program_files.into());
        self.program_files_x86 = program_files_x86;
        self
    }

    /// Set the path of the relocatable single-file executable.
    #[must_use]
    pub fn with_appimage(mut self, path: impl Into<PathBuf>) -> Self {
        self.appimage = Some(path.into());
        self
    }

    /// Set the directories searched for programs, as in `PATH`.
    #[must_use]
    pub fn with_search_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_path = dirs;
        self
    }

    /// First regular file named `program` in the search path.
    #[must_use]
    pub fn find_on_path(&self, program: &str) -> Option<PathBuf> {
        self.search_path
            .iter()
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }

    /// The running executable, if known.
    #[must_use]
    pub fn current_exe(&self) -> Option<&Path> {
        self.current_exe.as_deref()
    }

    /// Candidate companion locations, bundled copies first.
    #[must_use]
    pub fn companion_search_paths(
        &self,
        os: Os,
        layout: &CompanionLayout,
    ) -> Vec<CompanionCandidate> {
        let exe = os.executable_name(&layout.executable);
        let mut candidates = Vec::new();

        if let Some(resources) = &self.resources_dir {
            let root = resources.join(&layout.resource_dir);
            let per_os = root.join(format!("{}-{}", layout.resource_dir, os.slug()));
            for dir in [root, per_os] {
                candidates.push(CompanionCandidate {
                    path: dir.join(&exe),
                    origin: ServiceOrigin::Bundled,
                });
            }
        }

        let system_dirs: Vec<PathBuf> = match os {
            Os::Windows => {
                let mut dirs = Vec::new();
                if let Some(local) = &self.local_app_data {
                    dirs.push(local.join("Programs").join(&layout.windows_install_dir));
                }
                for root in [&self.program_files, &self.program_files_x86]
                    .into_iter()
                    .flatten()
                {
                    dirs.push(root.join(&layout.windows_install_dir));
                }
                if let Some(cwd) = &self.working_dir {
                    dirs.push(cwd.clone());
                }
                dirs
            }
            Os::MacOs => vec![
                Path::new("/Applications")
                    .join(&layout.macos_bundle)
                    .join("Contents")
                    .join("MacOS"),
            ],
            Os::Linux => layout.linux_system_dirs.clone(),
        };

        candidates.extend(system_dirs.into_iter().map(|dir| CompanionCandidate {
            path: dir.join(&exe),
            origin: ServiceOrigin::SystemInstalled,
        }));
        candidates
    }

    /// Base directory for downloads and helper scripts.
    #[must_use]
    pub fn temp_directory(&self) -> &Path {
        &self.temp_dir
    }

    /// Path the running application is installed at.
    ///
    /// - Windows: the running executable.
    /// - macOS: the enclosing `.app` bundle.
    /// - Linux: the relocatable executable when there is one, else the
    ///   running executable.
    #[must_use]
    pub fn installed_app_path(&self, os: Os) -> Option<PathBuf> {
        match os {
            Os::Windows => self.current_exe.clone(),
            Os::MacOs => self.current_exe.as_deref().and_then(enclosing_app_bundle),
            Os::Linux => self
                .relocatable_executable()
                .map(Path::to_path_buf)
                .or_else(|| self.current_exe.clone()),
        }
    }

    /// The single-file relocatable executable this process runs from, if any.
    #[must_use]
    pub fn relocatable_executable(&self) -> Option<&Path> {
        if let Some(appimage) = &self.appimage {
            return Some(appimage);
        }
        self.current_exe.as_deref().filter(|exe| {
            exe.extension()
                .and_then(OsStr::to_str)
                .is_some_and(|ext| ext.eq_ignore_ascii_case("appimage"))
        })
    }

    /// Per-user configuration directory for the application.
    #[must_use]
    pub fn user_config_dir(app_name: &str) -> Option<PathBuf> {
        ProjectDirs::from("com", app_name, app_name).map(|dirs| dirs.config_dir().to_path_buf())
    }
}

/// Walk up from `path` to the nearest `.app` bundle.
#[must_use]
pub fn enclosing_app_bundle(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| p.extension().is_some_and(|ext| ext == "app"))
        .map(Path::to_path_buf)
}

fn resources_dir_for(exe: &Path) -> Option<PathBuf> {
    let exe_dir = exe.parent()?;
    let in_bundle = exe_dir.file_name().is_some_and(|n| n == "MacOS")
        && exe_dir
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|n| n == "Contents");
    if in_bundle {
        exe_dir.parent().map(|contents| contents.join("Resources"))
    } else {
        Some(exe_dir.join("resources"))
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(candidates: &[CompanionCandidate]) -> Vec<PathBuf> {
        candidates.iter().map(|c| c.path.clone()).collect()
    }

    #[test]
    fn test_windows_search_order() {
        let platform_paths = PlatformPaths::new("/tmp")
            .with_resources_dir(r"C:\App\resources")
            .with_local_app_data(r"C:\Users\me\AppData\Local")
            .with_program_files(r"C:\Program Files", Some(PathBuf::from(r"C:\Program Files (x86)")))
            .with_working_dir(r"C:\cwd");

        let candidates =
            platform_paths.companion_search_paths(Os::Windows, &CompanionLayout::default());

        assert_eq!(candidates.len(), 6);
        assert_eq!(candidates[0].origin, ServiceOrigin::Bundled);
        assert_eq!(candidates[1].origin, ServiceOrigin::Bundled);
        assert!(
            candidates[2..]
                .iter()
                .all(|c| c.origin == ServiceOrigin::SystemInstalled)
        );
        assert!(candidates[2].path.ends_with("stremio-service.exe"));
        assert!(
            candidates[2]
                .path
                .to_string_lossy()
                .contains("Programs")
        );
        assert!(candidates[5].path.starts_with(r"C:\cwd"));
    }

    #[test]
    fn test_linux_search_order_without_resources() {
        let platform_paths = PlatformPaths::new("/tmp");
        let candidates =
            platform_paths.companion_search_paths(Os::Linux, &CompanionLayout::default());
        assert_eq!(
            paths(&candidates),
            vec![
                PathBuf::from("/usr/bin/stremio-service"),
                PathBuf::from("/usr/local/bin/stremio-service"),
                PathBuf::from("/opt/stremio-service/stremio-service"),
                PathBuf::from("/usr/lib/stremio-service/stremio-service"),
            ]
        );
    }

    #[test]
    fn test_bundled_per_os_subdirectory() {
        let platform_paths = PlatformPaths::new("/tmp").with_resources_dir("/opt/StreamGo/resources");
        let candidates =
            platform_paths.companion_search_paths(Os::Linux, &CompanionLayout::default());
        assert_eq!(
            candidates[1].path,
            PathBuf::from(
                "/opt/StreamGo/resources/stremio-service/stremio-service-linux/stremio-service"
            )
        );
    }

    #[test]
    fn test_macos_system_path() {
        let candidates = PlatformPaths::new("/tmp")
            .companion_search_paths(Os::MacOs, &CompanionLayout::default());
        assert_eq!(
            candidates[0].path,
            PathBuf::from("/Applications/StremioService.app/Contents/MacOS/stremio-service")
        );
    }

    #[test]
    fn test_relocatable_detection() {
        let from_env = PlatformPaths::new("/tmp")
            .with_current_exe("/tmp/.mount_xyz/usr/bin/streamgo")
            .with_appimage("/home/me/StreamGo.AppImage");
        assert_eq!(
            from_env.relocatable_executable(),
            Some(Path::new("/home/me/StreamGo.AppImage"))
        );

        let by_suffix = PlatformPaths::new("/tmp").with_current_exe("/home/me/StreamGo.appimage");
        assert!(by_suffix.relocatable_executable().is_some());

        let packaged = PlatformPaths::new("/tmp").with_current_exe("/usr/bin/streamgo");
        assert!(packaged.relocatable_executable().is_none());
        assert_eq!(
            packaged.installed_app_path(Os::Linux),
            Some(PathBuf::from("/usr/bin/streamgo"))
        );
    }

    #[test]
    fn test_macos_installed_bundle() {
        let platform_paths = PlatformPaths::new("/tmp")
            .with_current_exe("/Applications/StreamGo.app/Contents/MacOS/StreamGo");
        assert_eq!(
            platform_paths.installed_app_path(Os::MacOs),
            Some(PathBuf::from("/Applications/StreamGo.app"))
        );
    }

    #[test]
    fn test_resources_dir_inside_bundle() {
        let dir = resources_dir_for(Path::new("/Applications/StreamGo.app/Contents/MacOS/StreamGo"));
        assert_eq!(
            dir,
            Some(PathBuf::from("/Applications/StreamGo.app/Contents/Resources"))
        );
        let dir = resources_dir_for(Path::new("/opt/streamgo/streamgo"));
        assert_eq!(dir, Some(PathBuf::from("/opt/streamgo/resources")));
    }
}
