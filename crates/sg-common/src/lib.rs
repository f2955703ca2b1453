//! Shared platform plumbing for the StreamGo lifecycle crates.
//!
//! - [`platform`]: detection of the running OS and CPU architecture.
//! - [`paths`]: pure lookup of install, resource and temp locations.
//! - [`spawn`]: fire-and-forget process spawning and executable bits.

#![warn(missing_docs)]

pub mod paths;
pub mod platform;
pub mod spawn;

pub use paths::{CompanionCandidate, CompanionLayout, PlatformPaths, ServiceOrigin};
pub use platform::{Arch, Os, Platform, UnsupportedPlatform};
pub use spawn::{ensure_executable, spawn_detached};

/// Application name used for per-user directories and installed bundles.
pub const APP_NAME: &str = "StreamGo";
