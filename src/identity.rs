// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! User identity capture.
//!
//! The managed shell configuration greets the user by name. That name is
//! asked for once per run, and persisted as an `export` line in a small
//! environment override file that the shell configuration sources. The file
//! is never rewritten unless the user hands over a new, non-empty name.

use crate::prompt::{PromptError, Prompter};

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Variable exported by the environment override file.
pub const NAME_VARIABLE: &str = "DOTFILES_NAME";

/// Captured display name, and whether it has to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Stored name stays as-is.
    Keep(String),

    /// New name to write.
    Update(String),
}

impl Identity {
    pub fn name(&self) -> &str {
        match self {
            Self::Keep(name) | Self::Update(name) => name,
        }
    }

    /// Capture identity for this run.
    ///
    /// A `preset` name, e.g., from the command line, skips the prompt. A
    /// blank answer keeps the stored name, or falls back to `fallback` when
    /// there is none.
    ///
    /// # Errors
    ///
    /// - Return [`IdentityError::Prompt`] if user cannot be asked.
    pub fn capture(
        prompter: &impl Prompter,
        stored: Option<&str>,
        preset: Option<&str>,
        fallback: &str,
    ) -> Result<Self> {
        let answer = match preset {
            Some(name) => name.trim().to_string(),
            None => prompter.ask_name(stored.unwrap_or(fallback))?.trim().to_string(),
        };

        let identity = match (stored, answer.is_empty()) {
            (Some(stored), true) => Self::Keep(stored.to_string()),
            (Some(stored), false) if stored == answer => Self::Keep(answer),
            (None, true) => Self::Update(fallback.to_string()),
            (_, false) => Self::Update(answer),
        };
        debug!("captured identity {identity:?}");

        Ok(identity)
    }
}

/// Environment override file holding the display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityFile {
    path: PathBuf,
}

impl IdentityFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read stored display name, if any.
    ///
    /// # Errors
    ///
    /// - Return [`IdentityError::Read`] if file exists but cannot be read.
    pub fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.lines().rev().find_map(parse_export)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(IdentityError::Read {
                source: err,
                path: self.path.clone(),
            }),
        }
    }

    /// Persist identity.
    ///
    /// Does nothing for [`Identity::Keep`]. Other lines of the file are
    /// preserved, and an existing export line is replaced in place.
    ///
    /// # Errors
    ///
    /// - Return [`IdentityError::Read`] if existing file cannot be read.
    /// - Return [`IdentityError::Write`] if file cannot be written.
    pub fn write(&self, identity: &Identity) -> Result<()> {
        let name = match identity {
            Identity::Keep(_) => return Ok(()),
            Identity::Update(name) => name,
        };

        let existing = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => {
                return Err(IdentityError::Read {
                    source: err,
                    path: self.path.clone(),
                })
            }
        };

        let export = render_export(name);
        let mut replaced = false;
        let mut lines = Vec::new();
        for line in existing.lines() {
            if parse_export(line).is_some() {
                if !replaced {
                    lines.push(export.clone());
                    replaced = true;
                }
            } else {
                lines.push(line.to_string());
            }
        }
        if !replaced {
            lines.push(export);
        }

        let mut content = lines.join("\n");
        content.push('\n');

        if let Some(parent) = self.path.parent() {
            mkdirp::mkdirp(parent).map_err(|err| IdentityError::Write {
                source: err,
                path: self.path.clone(),
            })?;
        }
        fs::write(&self.path, content).map_err(|err| IdentityError::Write {
            source: err,
            path: self.path.clone(),
        })?;
        info!("saved name to {:?}", self.path.display());

        Ok(())
    }
}

fn render_export(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len());
    for ch in name.chars() {
        if matches!(ch, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(ch);
    }

    format!("export {NAME_VARIABLE}=\"{quoted}\"")
}

fn parse_export(line: &str) -> Option<String> {
    let value = line
        .trim()
        .strip_prefix("export ")?
        .trim_start()
        .strip_prefix(NAME_VARIABLE)?
        .strip_prefix('=')?;

    let value = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => {
            let mut unquoted = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(ch) = chars.next() {
                match (ch, chars.clone().next()) {
                    ('\\', Some(next)) if matches!(next, '"' | '\\' | '$' | '`') => {
                        unquoted.push(next);
                        chars.next();
                    }
                    _ => unquoted.push(ch),
                }
            }
            unquoted
        }
        None => value.trim_matches('\'').to_string(),
    };

    Some(value)
}

/// Identity capture error types.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Environment override file cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Environment override file cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// User cannot be asked for a name.
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Friendly result alias :3
pub type Result<T, E = IdentityError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Result as PromptResult;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    struct Answer(&'static str);

    impl Prompter for Answer {
        fn ask_name(&self, default: &str) -> PromptResult<String> {
            if self.0.is_empty() {
                Ok(default.into())
            } else {
                Ok(self.0.into())
            }
        }

        fn confirm_backup(&self, _: &Path, _: &Path) -> PromptResult<bool> {
            unreachable!("identity never asks about backups")
        }
    }

    #[test_case(Some("Ada"), "", Identity::Keep("Ada".into()); "blank answer keeps stored name")]
    #[test_case(Some("Ada"), "Ada", Identity::Keep("Ada".into()); "same answer keeps stored name")]
    #[test_case(Some("Ada"), "Grace", Identity::Update("Grace".into()); "new answer replaces stored name")]
    #[test_case(None, "", Identity::Update("user".into()); "blank answer without stored name uses fallback")]
    #[test_case(None, "Grace", Identity::Update("Grace".into()); "first answer is stored")]
    #[test]
    fn capture_decides_what_to_persist(stored: Option<&str>, answer: &'static str, expect: Identity) {
        let result = Identity::capture(&Answer(answer), stored, None, "user");
        pretty_assertions::assert_eq!(result.ok(), Some(expect));
    }

    #[test]
    fn preset_name_skips_prompt() -> anyhow::Result<()> {
        struct NoPrompt;
        impl Prompter for NoPrompt {
            fn ask_name(&self, _: &str) -> PromptResult<String> {
                unreachable!("preset names are never asked for")
            }

            fn confirm_backup(&self, _: &Path, _: &Path) -> PromptResult<bool> {
                unreachable!("identity never asks about backups")
            }
        }

        let identity = Identity::capture(&NoPrompt, Some("Ada"), Some(" Grace "), "user")?;
        assert_eq!(identity, Identity::Update("Grace".into()));
        Ok(())
    }

    #[test]
    fn write_replaces_export_and_keeps_other_lines() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let file = IdentityFile::new(home.path().join(".dotfiles.local"));
        fs::write(
            file.path(),
            indoc! {r#"
                export EDITOR=vim
                export DOTFILES_NAME="Ada"
                alias k=kubectl
            "#},
        )?;

        assert_eq!(file.read()?, Some("Ada".into()));
        file.write(&Identity::Update("Grace \"Hopper\"".into()))?;

        let expect = indoc! {r#"
            export EDITOR=vim
            export DOTFILES_NAME="Grace \"Hopper\""
            alias k=kubectl
        "#};
        assert_eq!(fs::read_to_string(file.path())?, expect);
        assert_eq!(file.read()?, Some("Grace \"Hopper\"".into()));
        Ok(())
    }

    #[test]
    fn keep_never_touches_file() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let file = IdentityFile::new(home.path().join(".dotfiles.local"));

        file.write(&Identity::Keep("Ada".into()))?;

        assert!(!file.path().exists());
        assert_eq!(file.read()?, None);
        Ok(())
    }

    #[test]
    fn write_creates_missing_file() -> anyhow::Result<()> {
        let home = tempfile::tempdir()?;
        let file = IdentityFile::new(home.path().join(".dotfiles.local"));

        file.write(&Identity::Update("Ada $USER".into()))?;

        assert_eq!(
            fs::read_to_string(file.path())?,
            "export DOTFILES_NAME=\"Ada \\$USER\"\n"
        );
        assert_eq!(file.read()?, Some("Ada $USER".into()));
        Ok(())
    }
}
