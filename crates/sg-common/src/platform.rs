//! Platform detection.
//!
//! The lifecycle code branches on a small closed set of targets. Anything
//! outside that set is reported as [`UnsupportedPlatform`] instead of being
//! silently mapped onto a neighbour.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The running OS or CPU is not one the lifecycle manager supports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported platform: {os}/{arch}")]
pub struct UnsupportedPlatform {
    /// OS identifier as reported by the standard library.
    pub os: String,
    /// Architecture identifier as reported by the standard library.
    pub arch: String,
}

impl UnsupportedPlatform {
    fn detect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Supported operating systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    /// Microsoft Windows.
    Windows,
    /// macOS / Darwin.
    #[serde(rename = "macos")]
    MacOs,
    /// Linux.
    Linux,
}

impl Os {
    /// Detect the current operating system.
    pub fn current() -> Result<Self, UnsupportedPlatform> {
        Self::from_identifier(std::env::consts::OS).ok_or_else(UnsupportedPlatform::detect)
    }

    /// Map a `std::env::consts::OS` style identifier.
    #[must_use]
    pub fn from_identifier(id: &str) -> Option<Self> {
        match id {
            "windows" => Some(Self::Windows),
            "macos" => Some(Self::MacOs),
            "linux" => Some(Self::Linux),
            _ => None,
        }
    }

    /// Lowercase identifier used in file and directory names.
    #[must_use]
    pub const fn slug(&self) -> &'static str {
        match self {
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Linux => "linux",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::MacOs => "macOS",
            Self::Linux => "Linux",
        }
    }

    /// File name of an executable with the given base name on this OS.
    #[must_use]
    pub fn executable_name(&self, base: &str) -> String {
        match self {
            Self::Windows => format!("{base}.exe"),
            Self::MacOs | Self::Linux => base.to_string(),
        }
    }

    /// Whether POSIX permission bits apply.
    #[must_use]
    pub const fn is_unix(&self) -> bool {
        matches!(self, Self::MacOs | Self::Linux)
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Supported CPU architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    /// x86_64 / AMD64 / Intel 64-bit.
    X86_64,
    /// ARM64 / AArch64 / Apple Silicon.
    Aarch64,
}

impl Arch {
    /// Detect the current architecture.
    pub fn current() -> Result<Self, UnsupportedPlatform> {
        Self::from_identifier(std::env::consts::ARCH).ok_or_else(UnsupportedPlatform::detect)
    }

    /// Map a `std::env::consts::ARCH` style identifier.
    #[must_use]
    pub fn from_identifier(id: &str) -> Option<Self> {
        match id {
            "x86_64" => Some(Self::X86_64),
            "aarch64" => Some(Self::Aarch64),
            _ => None,
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "ARM64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Operating system and architecture pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// The operating system.
    pub os: Os,
    /// The CPU architecture.
    pub arch: Arch,
}

impl Platform {
    /// Create a platform from its parts.
    #[must_use]
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// Detect the platform this process runs on.
    pub fn current() -> Result<Self, UnsupportedPlatform> {
        Ok(Self {
            os: Os::current()?,
            arch: Arch::current()?,
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.os, self.arch)
    }
}
