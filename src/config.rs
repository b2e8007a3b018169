// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the optional `dotstrap.toml` file at the top-level
//! of the dotfiles repository. Without it, dotstrap falls back to the
//! built-in [`Layout::default`]. Only [`Layout::load`] touches the file
//! system.

use crate::{
    link::ManagedFile,
    path::resolve_against,
};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

/// Name of layout file at the top-level of the dotfiles repository.
pub const LAYOUT_FILE: &str = "dotstrap.toml";

/// Dotfiles repository layout.
///
/// # General Layout
///
/// A layout is composed of two basic parts: settings and links. The settings
/// section tells dotstrap which interpreter the shell configuration expects,
/// where the package manifest lives, and where to persist the user's
/// identity. The links section is the ordered listing of managed files to
/// reconcile against the home directory.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Layout {
    /// Settings for the installer.
    #[serde(default)]
    pub settings: Settings,

    /// Ordered listing of managed files.
    #[serde(rename = "link", default)]
    pub links: Vec<LinkEntry>,
}

impl Layout {
    /// Load layout of target dotfiles repository.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if layout file exists but cannot be
    ///   read.
    /// - Return [`ConfigError::Deserialize`] if layout file is malformed.
    pub fn load(dotfiles_dir: impl AsRef<Path>) -> Result<Self> {
        let path = dotfiles_dir.as_ref().join(LAYOUT_FILE);
        match read_to_string(&path) {
            Ok(data) => {
                debug!("load layout from {:?}", path.display());
                data.parse()
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no {LAYOUT_FILE} found, use built-in layout");
                Ok(Self::default())
            }
            Err(err) => Err(ConfigError::Read { source: err, path }),
        }
    }

    /// Resolve link entries into managed files.
    ///
    /// Sources resolve against the dotfiles repository, targets against the
    /// home directory.
    pub fn managed_files(
        &self,
        dotfiles_dir: impl AsRef<Path>,
        home_dir: impl AsRef<Path>,
    ) -> Vec<ManagedFile> {
        self.links
            .iter()
            .map(|entry| ManagedFile {
                name: entry.name.clone(),
                source: resolve_against(dotfiles_dir.as_ref(), &entry.source),
                destination: resolve_against(home_dir.as_ref(), &entry.target),
                executable: entry.executable,
            })
            .collect()
    }
}

impl Default for Layout {
    fn default() -> Self {
        let mut links = Vec::new();

        for name in ["zshrc", "gitconfig", "vimrc"] {
            links.push(LinkEntry::new(
                name,
                format!("src/assets/{name}"),
                format!(".{name}"),
            ));
        }

        let agent_files = [
            ("codex-agents", "AGENTS.md", ".codex/AGENTS.md"),
            ("claude-agents", "AGENTS.md", ".claude/CLAUDE.md"),
            ("asana-skill", "asana-skill.md", ".claude/skills/asana.md"),
            ("commit-command", "claude/commands/commit.md", ".claude/commands/commit.md"),
            (
                "optimize-query-command",
                "claude/commands/optimize-query.md",
                ".claude/commands/optimize-query.md",
            ),
            ("claude-settings", "claude/settings.json", ".claude/settings.json"),
        ];
        for (name, source, target) in agent_files {
            links.push(LinkEntry::new(name, format!("src/agents/{source}"), target));
        }

        links.push(LinkEntry::new(
            "starship.toml",
            "src/assets/config/starship.toml",
            ".config/starship.toml",
        ));

        let mut script = LinkEntry::new(
            "git_log_hyperlinks.py",
            "src/scripts/git_log_hyperlinks.py",
            "bin/git_log_hyperlinks.py",
        );
        script.executable = true;
        links.push(script);

        Self {
            settings: Settings::default(),
            links,
        }
    }
}

impl FromStr for Layout {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut layout: Layout = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        layout.settings.brewfile = expand(&layout.settings.brewfile)?;
        layout.settings.env_file = expand(&layout.settings.env_file)?;
        for entry in &mut layout.links {
            entry.source = expand(&entry.source)?;
            entry.target = expand(&entry.target)?;
        }

        Ok(layout)
    }
}

impl Display for Layout {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Installer settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Interpreter the shell configuration is written for.
    pub shell: String,

    /// Package manifest handed to `brew bundle`, relative to the dotfiles
    /// repository.
    pub brewfile: PathBuf,

    /// Environment override file holding the user's identity, relative to
    /// the home directory.
    pub env_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shell: "zsh".into(),
            brewfile: "src/assets/Brewfile".into(),
            env_file: ".dotfiles.local".into(),
        }
    }
}

/// Managed file entry.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LinkEntry {
    /// Logical name of managed file.
    pub name: String,

    /// Path to source inside dotfiles repository.
    pub source: PathBuf,

    /// Path to destination symlink, relative to home directory.
    pub target: PathBuf,

    /// Mark source executable after linking.
    #[serde(default, skip_serializing_if = "is_false")]
    pub executable: bool,
}

impl LinkEntry {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            target: target.into(),
            executable: false,
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Layout file exists but cannot be read.
    #[error("failed to read layout file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
