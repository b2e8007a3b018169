// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use dotstrap::{
    config::{Layout, LinkEntry},
    exec::{program_name, CommandRunner, ExecError, Result as ExecResult, Step},
    install::Context,
    platform::{OsFamily, PlatformInfo},
    prompt::{Prompter, Result as PromptResult},
    search_path::SearchPath,
};

use anyhow::Result;
use std::{
    cell::RefCell,
    collections::{HashSet, VecDeque},
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

/// Dotfiles repository plus empty home directory to bootstrap into.
pub(crate) struct DotfilesFixture {
    pub(crate) dotfiles: TempDir,
    pub(crate) home: TempDir,
    links: Vec<LinkEntry>,
}

impl DotfilesFixture {
    pub(crate) fn new() -> Result<Self> {
        let fixture = Self {
            dotfiles: tempfile::tempdir()?,
            home: tempfile::tempdir()?,
            links: Vec::new(),
        };
        fs::write(fixture.dotfiles.path().join("Brewfile"), "brew \"starship\"\n")?;
        Ok(fixture)
    }

    /// Add managed file whose source holds `contents`.
    pub(crate) fn with_managed(mut self, name: &str, target: &str, contents: &str) -> Result<Self> {
        let source = format!("src/{name}");
        let path = self.dotfiles.path().join(&source);
        if let Some(parent) = path.parent() {
            mkdirp::mkdirp(parent)?;
        }
        fs::write(path, contents)?;
        self.links.push(LinkEntry::new(name, source, target));
        Ok(self)
    }

    /// Add managed file whose source does not exist.
    pub(crate) fn with_missing(mut self, name: &str, target: &str) -> Self {
        self.links
            .push(LinkEntry::new(name, format!("src/{name}"), target));
        self
    }

    pub(crate) fn home_file(&self, path: impl AsRef<Path>) -> PathBuf {
        self.home.path().join(path)
    }

    pub(crate) fn source(&self, name: &str) -> PathBuf {
        self.dotfiles.path().join("src").join(name)
    }

    pub(crate) fn write_home(&self, path: &str, contents: &str) -> Result<()> {
        let path = self.home_file(path);
        if let Some(parent) = path.parent() {
            mkdirp::mkdirp(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    pub(crate) fn home_is_empty(&self) -> Result<bool> {
        Ok(fs::read_dir(self.home.path())?.next().is_none())
    }

    pub(crate) fn context(&self) -> Context {
        let mut layout = Layout {
            links: self.links.clone(),
            ..Layout::default()
        };
        layout.settings.brewfile = "Brewfile".into();

        Context {
            dotfiles_dir: self.dotfiles.path().into(),
            home_dir: self.home.path().into(),
            layout,
            platform: PlatformInfo {
                os: OsFamily::Linux { wsl: false },
                package_manager: None,
            },
            search_path: SearchPath::new(["/usr/bin", "/bin"]),
            relaunched: Vec::new(),
            fallback_name: "tester".into(),
            executable: "/opt/dotstrap/bin/dotstrap".into(),
            args: Vec::new(),
        }
    }
}

/// Host where tools appear once their installer ran.
#[derive(Default)]
pub(crate) struct FakeHost {
    installed: RefCell<HashSet<String>>,
    installers: Vec<(String, String)>,
    failing: HashSet<String>,
    ran: RefCell<Vec<String>>,
}

impl FakeHost {
    pub(crate) fn with_tools(tools: &[&str]) -> Self {
        Self {
            installed: RefCell::new(tools.iter().map(ToString::to_string).collect()),
            ..Self::default()
        }
    }

    pub(crate) fn installs(mut self, program: &str, tool: &str) -> Self {
        self.installers.push((program.into(), tool.into()));
        self
    }

    pub(crate) fn fails(mut self, program: &str) -> Self {
        self.failing.insert(program.into());
        self
    }

    pub(crate) fn ran(&self) -> Vec<String> {
        self.ran.borrow().clone()
    }
}

impl CommandRunner for FakeHost {
    fn locate(&self, program: &str, _: &SearchPath) -> Option<PathBuf> {
        self.installed
            .borrow()
            .contains(program)
            .then(|| PathBuf::from("/usr/bin").join(program))
    }

    fn run(&self, step: &Step, _: &SearchPath) -> ExecResult<()> {
        let program = program_name(step.program());
        self.ran.borrow_mut().push(step.to_string());
        if self.failing.contains(&program) {
            return Err(ExecError::Status {
                step: step.to_string(),
                code: Some(1),
                message: "stderr: simulated failure".into(),
            });
        }

        for (installer, tool) in &self.installers {
            if *installer == program {
                self.installed.borrow_mut().insert(tool.clone());
            }
        }
        Ok(())
    }

    fn capture(&self, _: &Step, _: &SearchPath) -> ExecResult<String> {
        Ok("-zsh".into())
    }
}

/// Prompter replaying canned answers, counting every question.
pub(crate) struct ScriptedPrompter {
    name: String,
    answers: RefCell<VecDeque<bool>>,
    asked: RefCell<Vec<PathBuf>>,
}

impl ScriptedPrompter {
    pub(crate) fn new(name: &str, answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            name: name.into(),
            answers: RefCell::new(answers.into_iter().collect()),
            asked: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn asked(&self) -> Vec<PathBuf> {
        self.asked.borrow().clone()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask_name(&self, _: &str) -> PromptResult<String> {
        Ok(self.name.clone())
    }

    fn confirm_backup(&self, destination: &Path, _: &Path) -> PromptResult<bool> {
        self.asked.borrow_mut().push(destination.into());
        Ok(self.answers.borrow_mut().pop_front().unwrap_or(false))
    }
}
