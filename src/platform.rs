// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Host platform detection.
//!
//! Figure out which operating system family dotstrap runs on, and whether the
//! package manager is already installed. Probing is read-only and cannot
//! fail: a missing tool is a perfectly normal answer.

use crate::{exec::CommandRunner, search_path::SearchPath};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Known Homebrew installation paths, in lookup order.
///
/// 1. macOS on Apple Silicon.
/// 2. macOS on Intel.
/// 3. Linux and WSL.
pub const HOMEBREW_CANDIDATES: [&str; 3] = [
    "/opt/homebrew/bin/brew",
    "/usr/local/bin/brew",
    "/home/linuxbrew/.linuxbrew/bin/brew",
];

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    MacOs,
    Linux { wsl: bool },
    Unknown,
}

impl OsFamily {
    /// Detect family of the running host.
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "macos" => Self::MacOs,
            "linux" => {
                let version = fs::read_to_string("/proc/version").unwrap_or_default();
                Self::Linux {
                    wsl: is_wsl_kernel(&version),
                }
            }
            _ => Self::Unknown,
        }
    }

    pub fn is_linux(&self) -> bool {
        matches!(self, Self::Linux { .. })
    }
}

impl Display for OsFamily {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::MacOs => fmt.write_str("macOS"),
            Self::Linux { wsl: false } => fmt.write_str("Linux"),
            Self::Linux { wsl: true } => fmt.write_str("WSL"),
            Self::Unknown => fmt.write_str("unknown platform"),
        }
    }
}

/// Check if kernel version string belongs to Windows Subsystem for Linux.
pub fn is_wsl_kernel(version: &str) -> bool {
    version.to_lowercase().contains("microsoft")
}

/// What dotstrap knows about the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub os: OsFamily,
    pub package_manager: Option<PathBuf>,
}

impl PlatformInfo {
    /// Probe the running host.
    pub fn detect(runner: &impl CommandRunner, search_path: &SearchPath) -> Self {
        Self::probe(OsFamily::detect(), HOMEBREW_CANDIDATES, runner, search_path)
    }

    /// Probe with explicit operating system family and package manager
    /// candidate locations.
    ///
    /// Known locations win over the search path, because a fresh Homebrew
    /// install is not on the search path until it gets activated.
    pub fn probe(
        os: OsFamily,
        candidates: impl IntoIterator<Item = impl AsRef<Path>>,
        runner: &impl CommandRunner,
        search_path: &SearchPath,
    ) -> Self {
        let package_manager = find_package_manager(candidates)
            .or_else(|| runner.locate("brew", search_path));
        debug!("platform {os}, package manager at {package_manager:?}");

        Self {
            os,
            package_manager,
        }
    }

    pub fn package_manager_present(&self) -> bool {
        self.package_manager.is_some()
    }
}

/// First existing package manager executable out of given candidates.
pub fn find_package_manager(
    candidates: impl IntoIterator<Item = impl AsRef<Path>>,
) -> Option<PathBuf> {
    candidates
        .into_iter()
        .map(|candidate| candidate.as_ref().to_path_buf())
        .find(|candidate| candidate.exists())
}
