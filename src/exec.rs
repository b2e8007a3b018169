// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process invocation.
//!
//! Every installer, package manager, and shell that dotstrap touches is an
//! opaque external process. They all go through the [`CommandRunner`] seam so
//! provisioning logic can be exercised without touching the host.

use crate::search_path::SearchPath;

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};
use tracing::{debug, instrument};

/// Shell used to interpret piped installer one-liners.
pub const SCRIPT_SHELL: &str = "/bin/bash";

/// One external command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    program: OsString,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    interactive: bool,
}

impl Step {
    /// Construct new step for target program.
    ///
    /// Steps are non-interactive by default: output is captured and only
    /// shown when the step fails.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            interactive: false,
        }
    }

    /// Construct step that runs a shell one-liner through [`SCRIPT_SHELL`].
    pub fn script(script: impl Into<OsString>) -> Self {
        Self::new(SCRIPT_SHELL).arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Hand the terminal to the child process.
    ///
    /// Needed for anything that may ask for a password, e.g., `sudo`.
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Variables set for the child on top of the inherited environment.
    pub fn environment(&self) -> &[(OsString, OsString)] {
        &self.env
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn command(&self, search_path: &SearchPath) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("PATH", search_path.to_os_string())
            .envs(self.env.iter().cloned());
        command
    }
}

impl Display for Step {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.program.to_string_lossy().as_ref())?;
        for arg in &self.args {
            write!(fmt, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Layer of indirection for external process access.
pub trait CommandRunner {
    /// Find executable by name through given search path.
    fn locate(&self, program: &str, search_path: &SearchPath) -> Option<PathBuf>;

    /// Run step to completion.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::Spawn`] if the process cannot be started.
    /// - Return [`ExecError::Status`] if it exits unsuccessfully.
    fn run(&self, step: &Step, search_path: &SearchPath) -> Result<()>;

    /// Run step and collect its standard output.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::Spawn`] if the process cannot be started.
    /// - Return [`ExecError::Status`] if it exits unsuccessfully.
    fn capture(&self, step: &Step, search_path: &SearchPath) -> Result<String>;
}

/// Command runner backed by [`std::process::Command`].
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn locate(&self, program: &str, search_path: &SearchPath) -> Option<PathBuf> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        which::which_in(program, Some(search_path.to_os_string()), cwd).ok()
    }

    #[instrument(skip(self, step, search_path), fields(step = %step), level = "debug")]
    fn run(&self, step: &Step, search_path: &SearchPath) -> Result<()> {
        if step.is_interactive() {
            syscall_interactive(step, search_path)
        } else {
            let bar = spinner(step)?;
            let result = syscall_non_interactive(step, search_path);
            bar.finish_and_clear();
            result.map(|output| debug!("{output}"))
        }
    }

    fn capture(&self, step: &Step, search_path: &SearchPath) -> Result<String> {
        syscall_non_interactive(step, search_path)
    }
}

fn spinner(step: &Step) -> Result<ProgressBar> {
    let style = ProgressStyle::with_template("{spinner:.yellow} {elapsed_precise:.green}  {msg}")?;
    let bar = ProgressBar::new_spinner();
    bar.set_style(style);
    bar.set_message(step.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

fn syscall_interactive(step: &Step, search_path: &SearchPath) -> Result<()> {
    let status = step
        .command(search_path)
        .spawn()
        .map_err(|err| ExecError::Spawn {
            source: err,
            program: step.program.clone(),
        })?
        .wait()
        .map_err(|err| ExecError::Spawn {
            source: err,
            program: step.program.clone(),
        })?;

    if !status.success() {
        return Err(ExecError::Status {
            step: step.to_string(),
            code: status.code(),
            message: String::new(),
        });
    }

    Ok(())
}

fn syscall_non_interactive(step: &Step, search_path: &SearchPath) -> Result<String> {
    let output = step
        .command(search_path)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| ExecError::Spawn {
            source: err,
            program: step.program.clone(),
        })?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

    if !output.status.success() {
        let mut message = String::new();
        if !stdout.is_empty() {
            message.push_str(format!("stdout: {stdout}").as_str());
        }

        if !stderr.is_empty() {
            message.push_str(format!("stderr: {stderr}").as_str());
        }

        return Err(ExecError::Status {
            step: step.to_string(),
            code: output.status.code(),
            message: chomp(message),
        });
    }

    Ok(chomp(stdout))
}

/// Hand the terminal over to step until it exits.
///
/// Used to relaunch dotstrap or to open a shell: the caller is expected to
/// exit with the returned code right after.
///
/// # Errors
///
/// - Return [`ExecError::Spawn`] if the process cannot be started.
pub fn hand_over(step: &Step, search_path: &SearchPath) -> Result<i32> {
    let status = step
        .command(search_path)
        .status()
        .map_err(|err| ExecError::Spawn {
            source: err,
            program: step.program.clone(),
        })?;

    // INVARIANT: Death by signal is still a failure.
    Ok(status.code().unwrap_or(1))
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: String) -> String {
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message)
}

/// Name of an executable without its directory, e.g., `-zsh` for a login zsh.
pub fn program_name(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// External process error types.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Process could not be started at all.
    #[error("failed to run {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: OsString,
    },

    /// Process ran but exited unsuccessfully.
    #[error("command `{step}` failed with exit code {}{}", fmt_code(.code), fmt_message(.message))]
    Status {
        step: String,
        code: Option<i32>,
        message: String,
    },

    /// Style template cannot be set for progress spinner.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

fn fmt_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "<signal>".into(), |code| code.to_string())
}

fn fmt_message(message: &str) -> String {
    if message.is_empty() {
        String::new()
    } else {
        format!(":\n{message}")
    }
}

/// Friendly result alias :3
pub type Result<T, E = ExecError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn script_step_runs_through_bash() {
        let step = Step::script("curl -fsSL https://example.org/install.sh | sh");
        assert_eq!(
            step.to_string(),
            "/bin/bash -c curl -fsSL https://example.org/install.sh | sh"
        );
        assert!(!step.is_interactive());
    }

    #[test]
    fn chomp_strips_one_trailing_newline() {
        assert_eq!(chomp("zsh\n".into()), "zsh");
        assert_eq!(chomp("zsh\r\n".into()), "zsh");
        assert_eq!(chomp("zsh".into()), "zsh");
    }

    #[test]
    fn status_error_reports_step_and_code() {
        let error = ExecError::Status {
            step: "brew bundle".into(),
            code: Some(3),
            message: "stderr: boom".into(),
        };
        assert_eq!(
            error.to_string(),
            "command `brew bundle` failed with exit code 3:\nstderr: boom"
        );
    }

    #[test]
    fn system_runner_reports_nonzero_exit() {
        let runner = SystemRunner::new();
        let path = SearchPath::from_env();
        let result = runner.capture(&Step::script("echo nope >&2; exit 4"), &path);
        match result {
            Err(ExecError::Status { code, message, .. }) => {
                assert_eq!(code, Some(4));
                assert_eq!(message, "stderr: nope");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn system_runner_captures_stdout() -> anyhow::Result<()> {
        let runner = SystemRunner::new();
        let path = SearchPath::from_env();
        let output = runner.capture(&Step::script("echo hello"), &path)?;
        assert_eq!(output, "hello");
        Ok(())
    }
}
