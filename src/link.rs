// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Managed file reconciliation.
//!
//! A __managed file__ is a configuration file owned by the dotfiles
//! repository that must show up at a fixed location under the user's home
//! directory as a symlink. Reconciliation computes what currently occupies
//! that location, and drives it toward the desired state.
//!
//! # Destination States
//!
//! | State | Action |
//! |---|---|
//! | [`LinkState::Absent`] | create symlink |
//! | [`LinkState::CorrectSymlink`] | refresh symlink |
//! | [`LinkState::ForeignSymlink`] | ask, then back up and replace, or skip |
//! | [`LinkState::RegularFile`] | ask, then back up and replace, or skip |
//!
//! A backup is always a single `rename` of the destination to
//! `<destination>.bak`, so the original content is never copied and never
//! exists twice. Only one generation of backups is kept.
//!
//! Each managed file is reconciled on its own. A failure for one file is
//! recorded in its [`LinkReport`] and the next file is processed anyway.

use crate::{
    path::with_suffix,
    prompt::{PromptError, Prompter},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, Permissions},
    io::ErrorKind,
    os::unix::fs::{symlink, PermissionsExt},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Suffix of single-generation backups.
pub const BACKUP_SUFFIX: &str = ".bak";

const REFRESH_SUFFIX: &str = ".dotstrap-new";

/// Configuration file owned by the dotfiles repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedFile {
    /// Logical name, e.g., "zshrc".
    pub name: String,

    /// Absolute path of the source inside the dotfiles repository.
    pub source: PathBuf,

    /// Absolute path of the destination symlink.
    pub destination: PathBuf,

    /// Make source executable after linking.
    pub executable: bool,
}

impl ManagedFile {
    /// Path the destination gets moved to when backed up.
    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.destination, BACKUP_SUFFIX)
    }

    /// Compute current state of destination.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::SourceMissing`] if source does not exist.
    /// - Return [`LinkError::Inspect`] if source or destination cannot be
    ///   inspected.
    pub fn state(&self) -> Result<LinkState> {
        let source = self.canonical_source()?;
        LinkState::inspect(&self.destination, &source)
    }

    fn canonical_source(&self) -> Result<PathBuf> {
        fs::canonicalize(&self.source).map_err(|err| match err.kind() {
            ErrorKind::NotFound => LinkError::SourceMissing {
                source_path: self.source.clone(),
            },
            _ => LinkError::Inspect {
                source: err,
                path: self.source.clone(),
            },
        })
    }
}

/// What currently occupies the destination of a managed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing at destination.
    Absent,

    /// Symlink that already resolves to the expected source.
    CorrectSymlink,

    /// Symlink pointing somewhere else, possibly dangling.
    ForeignSymlink(PathBuf),

    /// File or directory that is not a symlink.
    RegularFile,
}

impl LinkState {
    /// Compute state of `destination` relative to a canonical `source`.
    ///
    /// # Errors
    ///
    /// - Return [`LinkError::Inspect`] if destination cannot be inspected.
    pub fn inspect(destination: &Path, source: &Path) -> Result<Self> {
        let metadata = match fs::symlink_metadata(destination) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::Absent),
            Err(err) => {
                return Err(LinkError::Inspect {
                    source: err,
                    path: destination.to_path_buf(),
                })
            }
        };

        if !metadata.file_type().is_symlink() {
            // INVARIANT: A linked parent directory may already lead to the
            //   source, e.g., `~/.claude` pointing into the repository.
            return match fs::canonicalize(destination) {
                Ok(resolved) if resolved == source => Ok(Self::CorrectSymlink),
                _ => Ok(Self::RegularFile),
            };
        }

        let target = fs::read_link(destination).map_err(|err| LinkError::Inspect {
            source: err,
            path: destination.to_path_buf(),
        })?;

        // INVARIANT: Links that resolve to the source through another link
        //   are correct too, a refresh just makes them direct.
        let resolved = fs::canonicalize(destination).ok();
        if target == source || resolved.as_deref() == Some(source) {
            Ok(Self::CorrectSymlink)
        } else {
            Ok(Self::ForeignSymlink(target))
        }
    }

    /// Check if destination has to be negotiated with the user.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ForeignSymlink(_) | Self::RegularFile)
    }
}

impl Display for LinkState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Absent => fmt.write_str("absent"),
            Self::CorrectSymlink => fmt.write_str("linked"),
            Self::ForeignSymlink(target) => write!(fmt, "foreign symlink to {}", target.display()),
            Self::RegularFile => fmt.write_str("regular file"),
        }
    }
}

/// Terminal result of reconciling one managed file.
#[derive(Debug)]
pub enum LinkOutcome {
    /// Symlink created where nothing was.
    Created,

    /// Existing correct symlink was recreated.
    Refreshed,

    /// Destination already is the source through a linked parent directory.
    LinkedThroughParent,

    /// Conflicting destination moved aside, then replaced.
    Replaced { backup: PathBuf },

    /// User declined to replace conflicting destination.
    Skipped,

    /// Reconciliation failed for this file only.
    Failed(LinkError),
}

impl LinkOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl Display for LinkOutcome {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Created => fmt.write_str("linked"),
            Self::Refreshed => fmt.write_str("already linked, refreshed"),
            Self::LinkedThroughParent => fmt.write_str("already linked through parent directory"),
            Self::Replaced { backup } => write!(fmt, "replaced, original kept at {}", backup.display()),
            Self::Skipped => fmt.write_str("skipped, left untouched"),
            Self::Failed(error) => write!(fmt, "failed: {error}"),
        }
    }
}

/// Reconciliation result for one managed file.
#[derive(Debug)]
pub struct LinkReport {
    pub name: String,
    pub destination: PathBuf,
    pub outcome: LinkOutcome,
}

impl Display for LinkReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} ({}): {}", self.name, self.destination.display(), self.outcome)
    }
}

/// Reconcile managed files against their destinations.
#[derive(Debug)]
pub struct Reconciler<'p, P>
where
    P: Prompter,
{
    prompter: &'p P,
}

impl<'p, P> Reconciler<'p, P>
where
    P: Prompter,
{
    /// Construct new reconciler asking questions through `prompter`.
    pub fn new(prompter: &'p P) -> Self {
        Self { prompter }
    }

    /// Reconcile every managed file in declared order.
    ///
    /// Never stops early: each file gets its own report.
    pub fn reconcile_all<'f>(
        &self,
        files: impl IntoIterator<Item = &'f ManagedFile>,
    ) -> Vec<LinkReport> {
        files
            .into_iter()
            .map(|file| {
                let outcome = self.reconcile(file);
                debug!("{}: {outcome}", file.name);

                LinkReport {
                    name: file.name.clone(),
                    destination: file.destination.clone(),
                    outcome,
                }
            })
            .collect()
    }

    /// Reconcile one managed file.
    #[instrument(skip(self, file), fields(name = %file.name), level = "debug")]
    pub fn reconcile(&self, file: &ManagedFile) -> LinkOutcome {
        match self.try_reconcile(file) {
            Ok(outcome) => outcome,
            Err(error) => LinkOutcome::Failed(error),
        }
    }

    fn try_reconcile(&self, file: &ManagedFile) -> Result<LinkOutcome> {
        let source = file.canonical_source()?;
        let state = LinkState::inspect(&file.destination, &source)?;
        debug!("{} is {state}", file.destination.display());

        let outcome = match state {
            LinkState::Absent => {
                create_parent(&file.destination)?;
                create_symlink(&source, &file.destination)?;
                LinkOutcome::Created
            }
            LinkState::CorrectSymlink if is_symlink(&file.destination) => {
                refresh_symlink(&source, &file.destination)?;
                LinkOutcome::Refreshed
            }
            LinkState::CorrectSymlink => LinkOutcome::LinkedThroughParent,
            LinkState::ForeignSymlink(_) | LinkState::RegularFile => {
                let backup = file.backup_path();
                if !self.prompter.confirm_backup(&file.destination, &backup)? {
                    return Ok(LinkOutcome::Skipped);
                }

                replace_with_symlink(&source, &file.destination, &backup, create_symlink)?;
                LinkOutcome::Replaced { backup }
            }
        };

        if file.executable {
            make_executable(&source)?;
        }

        Ok(outcome)
    }
}

fn create_parent(destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        mkdirp::mkdirp(parent).map_err(|err| LinkError::CreateParent {
            source: err,
            path: parent.to_path_buf(),
        })?;
    }

    Ok(())
}

fn create_symlink(source: &Path, destination: &Path) -> Result<()> {
    symlink(source, destination).map_err(|err| LinkError::Symlink {
        source: err,
        destination: destination.to_path_buf(),
    })
}

// INVARIANT: Build new link beside destination, then rename over it, so the
//   destination never disappears in between.
fn refresh_symlink(source: &Path, destination: &Path) -> Result<()> {
    let staging = with_suffix(destination, REFRESH_SUFFIX);
    remove_entry(&staging)?;
    create_symlink(source, &staging)?;
    fs::rename(&staging, destination).map_err(|err| LinkError::Symlink {
        source: err,
        destination: destination.to_path_buf(),
    })
}

// INVARIANT: Original is moved, never copied. Restore it if the new link
//   cannot be created.
fn replace_with_symlink(
    source: &Path,
    destination: &Path,
    backup: &Path,
    link: impl FnOnce(&Path, &Path) -> Result<()>,
) -> Result<()> {
    remove_entry(backup)?;
    fs::rename(destination, backup).map_err(|err| LinkError::Backup {
        source: err,
        destination: destination.to_path_buf(),
        backup: backup.to_path_buf(),
    })?;
    debug!("moved {} to {}", destination.display(), backup.display());

    if let Err(error) = link(source, destination) {
        warn!("restore {} from {}", destination.display(), backup.display());
        if let Err(restore) = fs::rename(backup, destination) {
            warn!("cannot restore {}: {restore}", destination.display());
        }
        return Err(error);
    }

    Ok(())
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|metadata| metadata.file_type().is_symlink())
}

// Remove file, symlink, or directory tree if present.
fn remove_entry(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => Err(err),
    };

    result.map_err(|err| LinkError::Remove {
        source: err,
        path: path.to_path_buf(),
    })
}

fn make_executable(source: &Path) -> Result<()> {
    fs::set_permissions(source, Permissions::from_mode(0o755)).map_err(|err| {
        LinkError::Permissions {
            source: err,
            path: source.to_path_buf(),
        }
    })
}

/// Managed file reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Source is missing from the dotfiles repository.
    #[error("source file not found at {:?}", source_path.display())]
    SourceMissing { source_path: PathBuf },

    /// Source or destination cannot be inspected.
    #[error("failed to inspect {:?}", path.display())]
    Inspect {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Parent directory of destination cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateParent {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Stale entry cannot be removed.
    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Destination cannot be moved to its backup path.
    #[error("failed to move {:?} to {:?}", destination.display(), backup.display())]
    Backup {
        #[source]
        source: std::io::Error,
        destination: PathBuf,
        backup: PathBuf,
    },

    /// Symlink cannot be created.
    #[error("failed to create symlink at {:?}", destination.display())]
    Symlink {
        #[source]
        source: std::io::Error,
        destination: PathBuf,
    },

    /// Source cannot be made executable.
    #[error("failed to make {:?} executable", path.display())]
    Permissions {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// User could not be asked about a conflict.
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Friendly result alias :3
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Result as PromptResult;
    use pretty_assertions::assert_eq;
    use std::{cell::RefCell, collections::VecDeque, fs::write};
    use tempfile::TempDir;

    #[derive(Default)]
    struct ScriptedPrompter {
        answers: RefCell<VecDeque<bool>>,
        asked: RefCell<Vec<PathBuf>>,
    }

    impl ScriptedPrompter {
        fn answering(answers: impl IntoIterator<Item = bool>) -> Self {
            Self {
                answers: RefCell::new(answers.into_iter().collect()),
                asked: RefCell::default(),
            }
        }
    }

    impl Prompter for ScriptedPrompter {
        fn ask_name(&self, default: &str) -> PromptResult<String> {
            Ok(default.into())
        }

        fn confirm_backup(&self, destination: &Path, _: &Path) -> PromptResult<bool> {
            self.asked.borrow_mut().push(destination.to_path_buf());
            Ok(self
                .answers
                .borrow_mut()
                .pop_front()
                .expect("unexpected backup prompt"))
        }
    }

    struct Sandbox {
        dots: TempDir,
        home: TempDir,
    }

    impl Sandbox {
        fn new() -> anyhow::Result<Self> {
            Ok(Self {
                dots: tempfile::tempdir()?,
                home: tempfile::tempdir()?,
            })
        }

        fn managed(&self, name: &str, contents: Option<&str>) -> anyhow::Result<ManagedFile> {
            let source = self.dots.path().join(name);
            if let Some(contents) = contents {
                write(&source, contents)?;
            }

            Ok(ManagedFile {
                name: name.into(),
                source,
                destination: self.home.path().join(format!(".{name}")),
                executable: false,
            })
        }
    }

    #[test]
    fn absent_destination_gets_linked() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let zshrc = sandbox.managed("zshrc", Some("export EDITOR=vim\n"))?;
        let prompter = ScriptedPrompter::default();

        let outcome = Reconciler::new(&prompter).reconcile(&zshrc);

        assert!(matches!(outcome, LinkOutcome::Created));
        assert_eq!(fs::read_link(&zshrc.destination)?, fs::canonicalize(&zshrc.source)?);
        assert!(prompter.asked.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn missing_parent_directories_are_created() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let mut starship = sandbox.managed("starship.toml", Some("add_newline = false\n"))?;
        starship.destination = sandbox.home.path().join(".config/starship.toml");
        let prompter = ScriptedPrompter::default();

        let outcome = Reconciler::new(&prompter).reconcile(&starship);

        assert!(matches!(outcome, LinkOutcome::Created));
        assert_eq!(read(&starship.destination)?, "add_newline = false\n");
        Ok(())
    }

    #[test]
    fn second_pass_refreshes_without_prompting() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let vimrc = sandbox.managed("vimrc", Some("set number\n"))?;
        let prompter = ScriptedPrompter::default();
        let reconciler = Reconciler::new(&prompter);

        assert!(matches!(reconciler.reconcile(&vimrc), LinkOutcome::Created));
        assert_eq!(vimrc.state()?, LinkState::CorrectSymlink);
        assert!(matches!(reconciler.reconcile(&vimrc), LinkOutcome::Refreshed));
        assert_eq!(vimrc.state()?, LinkState::CorrectSymlink);

        assert!(prompter.asked.borrow().is_empty());
        assert!(!with_suffix(&vimrc.destination, REFRESH_SUFFIX).exists());
        assert!(!vimrc.backup_path().exists());
        Ok(())
    }

    #[test]
    fn accepted_conflict_is_backed_up_then_replaced() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let gitconfig = sandbox.managed("gitconfig", Some("[user]\n\tname = Repo\n"))?;
        write(&gitconfig.destination, "X")?;
        let prompter = ScriptedPrompter::answering([true]);

        let outcome = Reconciler::new(&prompter).reconcile(&gitconfig);

        assert!(matches!(outcome, LinkOutcome::Replaced { ref backup } if *backup == gitconfig.backup_path()));
        assert_eq!(read(gitconfig.backup_path())?, "X");
        assert_eq!(read(&gitconfig.destination)?, "[user]\n\tname = Repo\n");
        assert_eq!(gitconfig.state()?, LinkState::CorrectSymlink);
        Ok(())
    }

    #[test]
    fn declined_conflict_is_left_untouched() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let zshrc = sandbox.managed("zshrc", Some("repo\n"))?;
        write(&zshrc.destination, "mine\n")?;
        let prompter = ScriptedPrompter::answering([false]);

        let outcome = Reconciler::new(&prompter).reconcile(&zshrc);

        assert!(matches!(outcome, LinkOutcome::Skipped));
        assert_eq!(read(&zshrc.destination)?, "mine\n");
        assert_eq!(zshrc.state()?, LinkState::RegularFile);
        assert!(!zshrc.backup_path().exists());
        Ok(())
    }

    #[test]
    fn foreign_symlink_is_negotiated() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let zshrc = sandbox.managed("zshrc", Some("repo\n"))?;
        let elsewhere = sandbox.home.path().join("old-zshrc");
        write(&elsewhere, "old\n")?;
        symlink(&elsewhere, &zshrc.destination)?;

        assert_eq!(zshrc.state()?, LinkState::ForeignSymlink(elsewhere.clone()));

        let prompter = ScriptedPrompter::answering([true]);
        let outcome = Reconciler::new(&prompter).reconcile(&zshrc);

        assert!(matches!(outcome, LinkOutcome::Replaced { .. }));
        assert_eq!(fs::read_link(zshrc.backup_path())?, elsewhere);
        assert_eq!(read(&zshrc.destination)?, "repo\n");
        Ok(())
    }

    #[test]
    fn dangling_symlink_is_foreign() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let vimrc = sandbox.managed("vimrc", Some("syntax on\n"))?;
        let gone = sandbox.home.path().join("gone");
        symlink(&gone, &vimrc.destination)?;

        assert_eq!(vimrc.state()?, LinkState::ForeignSymlink(gone));
        Ok(())
    }

    #[test]
    fn stale_backup_is_replaced_silently() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let vimrc = sandbox.managed("vimrc", Some("repo\n"))?;
        write(&vimrc.destination, "second\n")?;
        mkdirp::mkdirp(vimrc.backup_path().join("leftover"))?;
        let prompter = ScriptedPrompter::answering([true]);

        let outcome = Reconciler::new(&prompter).reconcile(&vimrc);

        assert!(matches!(outcome, LinkOutcome::Replaced { .. }));
        assert_eq!(read(vimrc.backup_path())?, "second\n");
        Ok(())
    }

    #[test]
    fn missing_source_fails_only_that_file() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let broken = sandbox.managed("gitconfig", None)?;
        let fine = sandbox.managed("zshrc", Some("repo\n"))?;
        let prompter = ScriptedPrompter::default();

        let reports = Reconciler::new(&prompter).reconcile_all([&broken, &fine]);

        assert_eq!(reports.len(), 2);
        assert!(matches!(
            reports[0].outcome,
            LinkOutcome::Failed(LinkError::SourceMissing { .. })
        ));
        assert!(matches!(reports[1].outcome, LinkOutcome::Created));
        assert!(fs::symlink_metadata(&broken.destination).is_err());
        assert_eq!(fine.state()?, LinkState::CorrectSymlink);
        Ok(())
    }

    #[test]
    fn executable_source_gets_mode_755() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let mut script = sandbox.managed("lo.py", Some("#!/usr/bin/env python3\n"))?;
        script.executable = true;
        let prompter = ScriptedPrompter::default();

        let outcome = Reconciler::new(&prompter).reconcile(&script);

        assert!(matches!(outcome, LinkOutcome::Created));
        let mode = fs::metadata(&script.source)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        Ok(())
    }

    #[test]
    fn failed_link_restores_backed_up_original() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let gitconfig = sandbox.managed("gitconfig", Some("repo\n"))?;
        write(&gitconfig.destination, "X")?;
        let source = fs::canonicalize(&gitconfig.source)?;

        let result = replace_with_symlink(
            &source,
            &gitconfig.destination,
            &gitconfig.backup_path(),
            |_, destination| {
                Err(LinkError::Symlink {
                    source: std::io::Error::other("disk full"),
                    destination: destination.to_path_buf(),
                })
            },
        );

        assert!(matches!(result, Err(LinkError::Symlink { .. })));
        assert_eq!(read(&gitconfig.destination)?, "X");
        assert_eq!(gitconfig.state()?, LinkState::RegularFile);
        assert!(!gitconfig.backup_path().exists());
        Ok(())
    }

    #[test]
    fn linked_parent_directory_counts_as_linked() -> anyhow::Result<()> {
        let sandbox = Sandbox::new()?;
        let agents = sandbox.dots.path().join("claude");
        mkdirp::mkdirp(&agents)?;
        write(agents.join("settings.json"), "{}\n")?;
        symlink(&agents, sandbox.home.path().join(".claude"))?;
        let settings = ManagedFile {
            name: "claude-settings".into(),
            source: agents.join("settings.json"),
            destination: sandbox.home.path().join(".claude/settings.json"),
            executable: false,
        };
        let prompter = ScriptedPrompter::default();

        assert_eq!(settings.state()?, LinkState::CorrectSymlink);
        let outcome = Reconciler::new(&prompter).reconcile(&settings);

        assert!(matches!(outcome, LinkOutcome::LinkedThroughParent));
        assert!(prompter.asked.borrow().is_empty());
        assert_eq!(read(&settings.source)?, "{}\n");
        assert!(fs::symlink_metadata(&settings.source)?.is_file());
        assert!(!settings.backup_path().exists());
        Ok(())
    }

    fn read(path: impl AsRef<Path>) -> std::io::Result<String> {
        fs::read_to_string(path)
    }
}
