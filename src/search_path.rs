// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Executable search path.
//!
//! Freshly installed tools usually land in directories that are not on the
//! caller's `PATH` yet. Instead of editing the process environment, dotstrap
//! carries a [`SearchPath`] value through provisioning and hands it to every
//! child process and executable lookup explicitly. Nothing in this crate ever
//! calls [`std::env::set_var`].

use std::{
    env,
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// Ordered list of directories to search for executables.
///
/// # Invariant
///
/// - No duplicate directories.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    /// Construct search path from a listing of directories.
    ///
    /// Later duplicates are dropped.
    pub fn new(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        let mut path = Self::default();
        for dir in dirs {
            path.append(dir);
        }
        path
    }

    /// Capture the `PATH` of the current process.
    pub fn from_env() -> Self {
        match env::var_os("PATH") {
            Some(value) => Self::new(env::split_paths(&value)),
            None => Self::default(),
        }
    }

    /// Put directory in front of the search path.
    ///
    /// Returns `false` without touching anything if the directory is already
    /// listed, so activating the same tool twice never grows the path.
    pub fn prepend(&mut self, dir: impl Into<PathBuf>) -> bool {
        let dir = dir.into();
        if self.contains(&dir) {
            return false;
        }

        self.dirs.insert(0, dir);
        true
    }

    fn append(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.contains(&dir) {
            self.dirs.push(dir);
        }
    }

    /// Check if directory is already listed.
    pub fn contains(&self, dir: impl AsRef<Path>) -> bool {
        self.dirs.iter().any(|entry| entry == dir.as_ref())
    }

    /// Iterate over listed directories in lookup order.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(PathBuf::as_path)
    }

    /// Join into a value suitable for the `PATH` variable of a child process.
    ///
    /// Directories containing the platform separator cannot be represented
    /// and are left out.
    pub fn to_os_string(&self) -> OsString {
        let usable = self
            .dirs
            .iter()
            .filter(|dir| env::join_paths([dir.as_path()]).is_ok());
        env::join_paths(usable).unwrap_or_default()
    }
}

impl Display for SearchPath {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.to_os_string().to_string_lossy().as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[test]
    fn prepend_never_duplicates() {
        let mut path = SearchPath::new(["/usr/bin", "/bin"]);

        assert!(path.prepend("/opt/homebrew/bin"));
        assert!(!path.prepend("/opt/homebrew/bin"));
        assert!(!path.prepend("/bin"));

        let result = path.iter().collect::<Vec<_>>();
        let expect = vec![
            Path::new("/opt/homebrew/bin"),
            Path::new("/usr/bin"),
            Path::new("/bin"),
        ];
        assert_eq!(result, expect);
    }

    #[test]
    fn new_drops_later_duplicates() {
        let path = SearchPath::new(["/usr/bin", "/bin", "/usr/bin"]);
        assert_eq!(path.to_string(), "/usr/bin:/bin");
    }

    #[sealed_test(env = [("PATH", "/usr/local/bin:/usr/bin:/usr/local/bin")])]
    fn from_env_reads_process_path() {
        let path = SearchPath::from_env();
        assert_eq!(path.to_string(), "/usr/local/bin:/usr/bin");
    }
}
