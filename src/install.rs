// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Installation orchestration.
//!
//! A full install runs these steps in order:
//!
//! 1. Capture the user's display name.
//! 2. Make sure the run happens under the expected interpreter, relaunching
//!    under it if needed.
//! 3. Provision prerequisites, stopping at the first failure.
//! 4. Install the package manifest through `brew bundle`.
//! 5. Reconcile managed files, where failures stay local to each file.
//! 6. Persist the display name.
//! 7. Reload into a fresh shell session.
//!
//! Nothing under the home directory is touched before step 5. So when a
//! prerequisite fails, the home directory looks exactly like it did before.
//!
//! # Relaunching
//!
//! Restarting under another interpreter is not a jump back to the top of the
//! program. The orchestrator returns [`Transition::RestartUnderInterpreter`]
//! and the binary runs it as an ordinary child process, exiting with its
//! exit code. The child learns why it was started through
//! [`RELAUNCH_VARIABLE`], which is how a relaunch that asks to be relaunched
//! again for the same reason is caught.

use crate::{
    config::{ConfigError, Layout},
    exec::{hand_over, program_name, CommandRunner, ExecError, Step},
    identity::{Identity, IdentityError, IdentityFile},
    link::{LinkError, LinkOutcome, LinkReport, LinkState, ManagedFile, Reconciler},
    path::{home_dir, resolve_against, NoWayHome},
    platform::PlatformInfo,
    prompt::Prompter,
    provision::{
        catalog::default_prerequisites, Prerequisite, PrerequisiteReport, ProvisionError,
        Provisioned, Provisioner,
    },
    search_path::SearchPath,
};

use std::{
    env,
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// Lists why the current process was relaunched, comma separated.
pub const RELAUNCH_VARIABLE: &str = "DOTSTRAP_RELAUNCHED";

/// Carries the captured display name into a relaunched run.
pub const NAME_VARIABLE: &str = "DOTSTRAP_NAME";

/// Carries the dotfiles directory into a relaunched run.
pub const DIR_VARIABLE: &str = "DOTSTRAP_DIR";

const INTERPRETER_REASON: &str = "interpreter";

/// Everything dotstrap knows about this run before doing anything.
#[derive(Debug, Clone)]
pub struct Context {
    pub dotfiles_dir: PathBuf,
    pub home_dir: PathBuf,
    pub layout: Layout,
    pub platform: PlatformInfo,
    pub search_path: SearchPath,

    /// Reasons this process was relaunched for.
    pub relaunched: Vec<String>,

    /// Name offered when nothing is stored yet.
    pub fallback_name: String,

    /// Path of the running dotstrap executable.
    pub executable: PathBuf,

    /// Arguments this process was started with, minus the program name.
    pub args: Vec<OsString>,
}

impl Context {
    /// Gather context from the running process.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::Home`] if home directory cannot be
    ///   determined.
    /// - Return [`InstallError::Config`] if layout file is broken.
    /// - Return [`InstallError::CurrentExe`] if own executable cannot be
    ///   found.
    pub fn from_env(dotfiles_dir: impl Into<PathBuf>, runner: &impl CommandRunner) -> Result<Self> {
        let dotfiles_dir = dotfiles_dir.into();
        let search_path = SearchPath::from_env();
        let relaunched = env::var(RELAUNCH_VARIABLE)
            .map(|value| parse_reasons(&value))
            .unwrap_or_default();

        Ok(Self {
            layout: Layout::load(&dotfiles_dir)?,
            home_dir: home_dir()?,
            platform: PlatformInfo::detect(runner, &search_path),
            fallback_name: env::var("USER").unwrap_or_else(|_| "friend".into()),
            executable: env::current_exe().map_err(InstallError::CurrentExe)?,
            args: env::args_os().skip(1).collect(),
            dotfiles_dir,
            search_path,
            relaunched,
        })
    }

    /// Managed files of the layout, resolved for this run.
    pub fn managed_files(&self) -> Vec<ManagedFile> {
        self.layout.managed_files(&self.dotfiles_dir, &self.home_dir)
    }

    fn was_relaunched_for(&self, reason: &str) -> bool {
        self.relaunched.iter().any(|entry| entry == reason)
    }
}

fn parse_reasons(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Knobs for a full install.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    /// Display name to use instead of asking.
    pub name: Option<String>,

    /// Do not install the package manifest.
    pub skip_bundle: bool,

    /// Open a fresh shell session when done.
    pub reload: bool,
}

/// Where the orchestrator left off.
#[derive(Debug)]
pub enum Transition {
    /// Whole run has to start over under another interpreter.
    RestartUnderInterpreter(Relaunch),

    /// Run is done.
    Complete {
        report: Report,
        reload: Option<Reload>,
    },
}

/// Start dotstrap over under an interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relaunch {
    step: Step,
    search_path: SearchPath,
}

impl Relaunch {
    /// Command that performs the relaunch.
    pub fn step(&self) -> &Step {
        &self.step
    }

    /// Run relaunched dotstrap to completion.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::Handover`] if interpreter cannot be started.
    pub fn execute(&self) -> Result<i32> {
        info!("relaunch through {}", self.step.program().to_string_lossy());
        Ok(hand_over(&self.step, &self.search_path)?)
    }
}

/// Fresh interactive shell session that picks up every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reload {
    step: Step,
    search_path: SearchPath,
}

impl Reload {
    pub fn step(&self) -> &Step {
        &self.step
    }

    /// Run shell session to completion.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::Handover`] if shell cannot be started.
    pub fn execute(&self) -> Result<i32> {
        info!("reload shell to apply all changes");
        Ok(hand_over(&self.step, &self.search_path)?)
    }
}

/// Consolidated result of a run.
#[derive(Debug)]
pub struct Report {
    pub prerequisites: Vec<PrerequisiteReport>,
    pub links: Vec<LinkReport>,
    pub identity: Option<Identity>,
}

impl Report {
    /// Count managed files that could not be reconciled.
    pub fn failures(&self) -> usize {
        self.links
            .iter()
            .filter(|report| report.outcome.is_failure())
            .count()
    }

    /// Count managed files the user chose to leave alone.
    pub fn skips(&self) -> usize {
        self.links
            .iter()
            .filter(|report| matches!(report.outcome, LinkOutcome::Skipped))
            .count()
    }

    /// Log every outcome of the run, followed by a summary.
    pub fn log(&self) {
        for prerequisite in &self.prerequisites {
            info!("{}: {}", prerequisite.name, prerequisite.outcome);
        }

        for link in &self.links {
            if link.outcome.is_failure() {
                warn!("{link}, needs manual attention");
            } else {
                info!("{link}");
            }
        }

        if let Some(identity) = &self.identity {
            info!("greeting name: {}", identity.name());
        }

        match (self.failures(), self.skips()) {
            (0, 0) => info!("installation complete"),
            (0, skips) => info!("installation complete, {skips} file(s) left untouched"),
            (failures, skips) => warn!(
                "installation complete with {failures} failed and {skips} skipped file(s)"
            ),
        }
    }
}

/// Drive a full install.
#[derive(Debug)]
pub struct Installer<'a, R, P>
where
    R: CommandRunner,
    P: Prompter,
{
    runner: &'a R,
    prompter: &'a P,
    context: Context,
    prerequisites: Vec<Prerequisite>,
}

impl<'a, R, P> Installer<'a, R, P>
where
    R: CommandRunner,
    P: Prompter,
{
    /// Construct new installer using the built-in prerequisites.
    pub fn new(runner: &'a R, prompter: &'a P, context: Context) -> Self {
        let prerequisites =
            default_prerequisites(&context.home_dir, &context.layout.settings.shell);
        Self {
            runner,
            prompter,
            context,
            prerequisites,
        }
    }

    /// Replace prerequisites to provision.
    pub fn with_prerequisites(mut self, prerequisites: Vec<Prerequisite>) -> Self {
        self.prerequisites = prerequisites;
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Run a full install.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::Identity`] if display name cannot be
    ///   captured.
    /// - Return [`InstallError::InterpreterMissing`] if the expected
    ///   interpreter cannot be found.
    /// - Return [`InstallError::Provision`] if a prerequisite fails.
    /// - Return [`InstallError::RestartLoop`] if a relaunched run asks for
    ///   the same relaunch again.
    /// - Return [`InstallError::ManifestMissing`] or [`InstallError::Bundle`]
    ///   if the package manifest cannot be installed.
    #[instrument(skip(self, options), level = "debug")]
    pub fn run(&self, options: &InstallOptions) -> Result<Transition> {
        let identity_file = self.identity_file();
        let stored = identity_file.read()?;
        let identity = Identity::capture(
            self.prompter,
            stored.as_deref(),
            options.name.as_deref(),
            &self.context.fallback_name,
        )?;

        if let Some(relaunch) = self.check_interpreter(&identity)? {
            return Ok(Transition::RestartUnderInterpreter(relaunch));
        }

        let mut provisioner = Provisioner::new(
            self.runner,
            self.context.platform.clone(),
            self.context.search_path.clone(),
        );
        let prerequisites = provisioner.provision_all(&self.prerequisites)?;

        if let Some(report) = prerequisites
            .last()
            .filter(|report| report.outcome == Provisioned::RestartRequired)
        {
            let relaunch = self.restart_for(&report.name, &identity, provisioner.search_path())?;
            return Ok(Transition::RestartUnderInterpreter(relaunch));
        }

        let package_manager = provisioner.platform().package_manager.clone();
        let search_path = provisioner.into_search_path();
        if options.skip_bundle {
            info!("skip package manifest");
        } else {
            self.install_bundle(package_manager, &search_path)?;
        }

        let links = self.reconcile();
        identity_file.write(&identity)?;

        let report = Report {
            prerequisites,
            links,
            identity: Some(identity),
        };
        report.log();

        let reload = if options.reload {
            self.reload(search_path)
        } else {
            None
        };

        Ok(Transition::Complete { report, reload })
    }

    /// Reconcile managed files only.
    pub fn link(&self) -> Report {
        let report = Report {
            prerequisites: Vec::new(),
            links: self.reconcile(),
            identity: None,
        };
        report.log();
        report
    }

    /// Compute state of every managed file without changing anything.
    pub fn status(&self) -> Vec<(ManagedFile, Result<LinkState, LinkError>)> {
        self.context
            .managed_files()
            .into_iter()
            .map(|file| {
                let state = file.state();
                (file, state)
            })
            .collect()
    }

    fn reconcile(&self) -> Vec<LinkReport> {
        info!("set up configuration files");
        let files = self.context.managed_files();
        Reconciler::new(self.prompter).reconcile_all(&files)
    }

    fn identity_file(&self) -> IdentityFile {
        IdentityFile::new(resolve_against(
            &self.context.home_dir,
            &self.context.layout.settings.env_file,
        ))
    }

    fn shell(&self) -> &str {
        &self.context.layout.settings.shell
    }

    fn check_interpreter(&self, identity: &Identity) -> Result<Option<Relaunch>> {
        if self.context.was_relaunched_for(INTERPRETER_REASON) {
            return Ok(None);
        }

        if let Some(parent) = self.parent_process() {
            if program_name(&parent).trim_start_matches('-') == self.shell() {
                return Ok(None);
            }
        }

        let interpreter = self.locate_shell(&self.context.search_path)?;
        warn!("dotstrap has to run under {}, relaunching", self.shell());
        Ok(Some(self.relaunch(
            &interpreter,
            INTERPRETER_REASON,
            identity,
            &self.context.search_path,
        )))
    }

    fn restart_for(
        &self,
        reason: &str,
        identity: &Identity,
        search_path: &SearchPath,
    ) -> Result<Relaunch> {
        if self.context.was_relaunched_for(reason) {
            return Err(InstallError::RestartLoop {
                name: reason.to_string(),
            });
        }

        let interpreter = self.locate_shell(search_path)?;
        Ok(self.relaunch(&interpreter, reason, identity, search_path))
    }

    fn relaunch(
        &self,
        interpreter: &Path,
        reason: &str,
        identity: &Identity,
        search_path: &SearchPath,
    ) -> Relaunch {
        // INVARIANT: Every relaunch runs under the interpreter, even when it
        //   was requested for another reason.
        let mut reasons = self.context.relaunched.clone();
        for reason in [reason, INTERPRETER_REASON] {
            if !reasons.iter().any(|entry| entry == reason) {
                reasons.push(reason.to_string());
            }
        }

        // INVARIANT: `$0` is the executable, `$@` the original arguments.
        let step = Step::new(interpreter)
            .arg("-c")
            .arg("exec \"$0\" \"$@\"")
            .arg(&self.context.executable)
            .args(&self.context.args)
            .env(RELAUNCH_VARIABLE, reasons.join(","))
            .env(NAME_VARIABLE, identity.name())
            .env(DIR_VARIABLE, &self.context.dotfiles_dir)
            .interactive();

        Relaunch {
            step,
            search_path: search_path.clone(),
        }
    }

    fn reload(&self, search_path: SearchPath) -> Option<Reload> {
        match self.locate_shell(&search_path) {
            Ok(shell) => Some(Reload {
                step: Step::new(shell).interactive(),
                search_path,
            }),
            Err(error) => {
                warn!("cannot reload shell: {error}");
                None
            }
        }
    }

    fn locate_shell(&self, search_path: &SearchPath) -> Result<PathBuf> {
        self.runner
            .locate(self.shell(), search_path)
            .ok_or_else(|| InstallError::InterpreterMissing {
                shell: self.shell().to_string(),
            })
    }

    fn parent_process(&self) -> Option<String> {
        let ppid = std::os::unix::process::parent_id();
        let step = Step::new("ps")
            .arg("-p")
            .arg(ppid.to_string())
            .args(["-o", "comm="]);
        self.runner
            .capture(&step, &self.context.search_path)
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    fn install_bundle(
        &self,
        package_manager: Option<PathBuf>,
        search_path: &SearchPath,
    ) -> Result<()> {
        info!("install packages from manifest");
        let brewfile = resolve_against(
            &self.context.dotfiles_dir,
            &self.context.layout.settings.brewfile,
        );
        if !brewfile.exists() {
            return Err(InstallError::ManifestMissing { path: brewfile });
        }

        let brew = package_manager
            .or_else(|| self.runner.locate("brew", search_path))
            .unwrap_or_else(|| PathBuf::from("brew"));
        let mut file_arg = OsString::from("--file=");
        file_arg.push(&brewfile);
        let step = Step::new(brew).arg("bundle").arg(file_arg).interactive();

        self.runner
            .run(&step, search_path)
            .map_err(|err| InstallError::Bundle { source: err })?;
        info!("packages from {:?} installed", brewfile.display());

        Ok(())
    }
}

impl Display for Report {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for prerequisite in &self.prerequisites {
            writeln!(fmt, "{}: {}", prerequisite.name, prerequisite.outcome)?;
        }
        for link in &self.links {
            writeln!(fmt, "{link}")?;
        }
        if let Some(identity) = &self.identity {
            writeln!(fmt, "greeting name: {}", identity.name())?;
        }
        Ok(())
    }
}

/// Installation error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Home directory cannot be determined.
    #[error(transparent)]
    Home(#[from] NoWayHome),

    /// Layout file is broken.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Own executable cannot be found for relaunching.
    #[error("cannot determine path to dotstrap executable")]
    CurrentExe(#[source] std::io::Error),

    /// Display name cannot be captured or persisted.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Expected interpreter is not installed.
    #[error("{shell} is not installed, install {shell} first")]
    InterpreterMissing { shell: String },

    /// Prerequisite cannot be satisfied.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// Relaunched run asked for the same relaunch.
    #[error("{name} still not in effect after relaunching, open a new terminal and run dotstrap again")]
    RestartLoop { name: String },

    /// Package manifest is missing from the dotfiles repository.
    #[error("package manifest not found at {:?}", path.display())]
    ManifestMissing { path: PathBuf },

    /// Package manifest installation failed.
    #[error("failed to install package manifest")]
    Bundle {
        #[source]
        source: ExecError,
    },

    /// Relaunch or reload could not be started.
    #[error(transparent)]
    Handover(#[from] ExecError),
}

/// Friendly result alias :3
pub type Result<T, E = InstallError> = std::result::Result<T, E>;
