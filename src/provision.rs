// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Prerequisite provisioning.
//!
//! A __prerequisite__ is an external tool that later steps need, e.g., the
//! package manager that installs the package manifest. Each prerequisite is
//! driven through a small state machine:
//!
//! ```text
//! Unchecked -> Satisfied
//!           -> Missing -> Installing -> Satisfied
//!                                    -> Failed
//!                                    -> AwaitingRestart
//!                      -> Failed
//! ```
//!
//! A prerequisite only counts as satisfied when its detection predicate
//! holds. After installing, detection always runs again: an installer that
//! exits zero proves nothing on its own.
//!
//! # Activation
//!
//! Fresh installs tend to land outside of the current search path. An
//! [`Activation`] adds the right directory to the provisioner's
//! [`SearchPath`] so that the rest of the run can use the tool right away.
//! The search path is handed over to the caller afterwards, it is never
//! exported into the process environment.

pub mod catalog;

use crate::{
    exec::{program_name, CommandRunner, ExecError, Step},
    platform::{find_package_manager, OsFamily, PlatformInfo, HOMEBREW_CANDIDATES},
    search_path::SearchPath,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};
use tracing::{debug, info, instrument, warn};

/// External tool that must be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prerequisite {
    /// Name reported to the user.
    pub name: String,

    /// Presence check.
    pub detection: Detection,

    /// How to install it on each platform.
    pub procedure: Procedure,

    /// How to make a fresh install usable for the rest of the run.
    pub activation: Activation,

    /// Provisioned first when missing on Linux or WSL.
    pub requires: Option<Box<Prerequisite>>,

    /// Install only takes effect in a fresh session.
    pub restart_after_install: bool,
}

impl Prerequisite {
    /// Construct new prerequisite without activation, sub-prerequisite, or
    /// restart.
    pub fn new(name: impl Into<String>, detection: Detection, procedure: Procedure) -> Self {
        Self {
            name: name.into(),
            detection,
            procedure,
            activation: Activation::None,
            requires: None,
            restart_after_install: false,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_requirement(mut self, requirement: Prerequisite) -> Self {
        self.requires = Some(Box::new(requirement));
        self
    }

    pub fn with_restart(mut self) -> Self {
        self.restart_after_install = true;
        self
    }
}

/// Presence check for a prerequisite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Executable can be found on the search path.
    Command(String),

    /// Executable cannot be found on the search path.
    Unavailable(String),

    /// File exists.
    File(PathBuf),

    /// Login shell recorded in the account database is the named
    /// interpreter.
    LoginShell(String),

    /// Every nested check holds.
    All(Vec<Detection>),

    /// At least one nested check holds.
    Any(Vec<Detection>),
}

/// Platform dependent install procedure.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub macos: Option<Vec<Step>>,
    pub linux: Option<Vec<Step>>,
}

impl Procedure {
    /// Same steps on every supported platform.
    pub fn everywhere(steps: impl IntoIterator<Item = Step>) -> Self {
        let steps = steps.into_iter().collect::<Vec<_>>();
        Self {
            macos: Some(steps.clone()),
            linux: Some(steps),
        }
    }

    /// Steps for Linux and WSL only.
    pub fn linux_only(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            macos: None,
            linux: Some(steps.into_iter().collect()),
        }
    }

    /// Select steps for target platform.
    pub fn for_os(&self, os: OsFamily) -> Option<&[Step]> {
        match os {
            OsFamily::MacOs => self.macos.as_deref(),
            OsFamily::Linux { .. } => self.linux.as_deref(),
            OsFamily::Unknown => None,
        }
    }
}

/// Make a freshly installed tool usable for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    None,

    /// Put fixed directory on the search path.
    PrependDir(PathBuf),

    /// Put directory of the detected package manager on the search path.
    PackageManagerBin,
}

/// Where a prerequisite currently stands.
#[derive(Debug)]
pub enum ProvisionState {
    Unchecked,
    Missing,
    Installing(Vec<Step>),
    Satisfied { installed: bool },
    AwaitingRestart,
    Failed(FailureReason),
}

/// Final word on a prerequisite that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// Present before dotstrap did anything.
    AlreadyPresent,

    /// Installed and verified during this run.
    Installed,

    /// Installed, but only usable from a fresh session.
    RestartRequired,
}

impl Display for Provisioned {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::AlreadyPresent => fmt.write_str("already installed"),
            Self::Installed => fmt.write_str("installed"),
            Self::RestartRequired => fmt.write_str("installed, restart required"),
        }
    }
}

/// Provisioning result for one prerequisite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteReport {
    pub name: String,
    pub outcome: Provisioned,
}

/// Drive prerequisites to satisfaction.
#[derive(Debug)]
pub struct Provisioner<'r, R>
where
    R: CommandRunner,
{
    runner: &'r R,
    platform: PlatformInfo,
    search_path: SearchPath,
    package_manager_candidates: Vec<PathBuf>,
}

impl<'r, R> Provisioner<'r, R>
where
    R: CommandRunner,
{
    /// Construct new provisioner.
    pub fn new(runner: &'r R, platform: PlatformInfo, search_path: SearchPath) -> Self {
        Self {
            runner,
            platform,
            search_path,
            package_manager_candidates: HOMEBREW_CANDIDATES.iter().map(PathBuf::from).collect(),
        }
    }

    /// Replace known package manager locations used by activation.
    pub fn with_package_manager_candidates(
        mut self,
        candidates: impl IntoIterator<Item = impl Into<PathBuf>>,
    ) -> Self {
        self.package_manager_candidates = candidates.into_iter().map(Into::into).collect();
        self
    }

    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    /// Give up the provisioner, keeping the search path it built.
    pub fn into_search_path(self) -> SearchPath {
        self.search_path
    }

    /// Provision listing of prerequisites in order.
    ///
    /// Stops at the first failure. Also stops right after a prerequisite that
    /// requires a restart, since the remaining ones will be provisioned again
    /// by the restarted run.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Failed`] for the first prerequisite that
    ///   cannot be satisfied.
    pub fn provision_all<'p>(
        &mut self,
        prerequisites: impl IntoIterator<Item = &'p Prerequisite>,
    ) -> Result<Vec<PrerequisiteReport>> {
        let mut reports = Vec::new();
        for prerequisite in prerequisites {
            let outcome = self.provision(prerequisite)?;
            reports.push(PrerequisiteReport {
                name: prerequisite.name.clone(),
                outcome,
            });

            if outcome == Provisioned::RestartRequired {
                break;
            }
        }

        Ok(reports)
    }

    /// Provision one prerequisite.
    ///
    /// # Errors
    ///
    /// - Return [`ProvisionError::Failed`] if prerequisite cannot be
    ///   satisfied.
    #[instrument(skip(self, prerequisite), fields(name = %prerequisite.name), level = "debug")]
    pub fn provision(&mut self, prerequisite: &Prerequisite) -> Result<Provisioned> {
        let name = &prerequisite.name;
        let mut state = ProvisionState::Unchecked;

        loop {
            debug!("{name}: {state:?}");
            state = match state {
                ProvisionState::Unchecked => {
                    if self.detect(&prerequisite.detection) || self.adopt(prerequisite) {
                        ProvisionState::Satisfied { installed: false }
                    } else {
                        ProvisionState::Missing
                    }
                }
                ProvisionState::Missing => self.plan(prerequisite),
                ProvisionState::Installing(steps) => self.install(prerequisite, &steps),
                ProvisionState::Satisfied { installed: false } => {
                    debug!("{name} is already installed");
                    return Ok(Provisioned::AlreadyPresent);
                }
                ProvisionState::Satisfied { installed: true } => {
                    debug!("{name} installed successfully");
                    return Ok(Provisioned::Installed);
                }
                ProvisionState::AwaitingRestart => {
                    warn!("{name} takes effect in a new session");
                    return Ok(Provisioned::RestartRequired);
                }
                ProvisionState::Failed(reason) => {
                    return Err(ProvisionError::Failed {
                        name: name.clone(),
                        reason,
                    });
                }
            };
        }
    }

    // Missing -> Installing | Failed
    fn plan(&mut self, prerequisite: &Prerequisite) -> ProvisionState {
        info!("{} not found, installing", prerequisite.name);

        // INVARIANT: Sub-prerequisites exist for Linux only, and never nest
        //   any further.
        if self.platform.os.is_linux() {
            if let Some(requirement) = &prerequisite.requires {
                if let Err(ProvisionError::Failed { name, reason }) = self.provision(requirement) {
                    return ProvisionState::Failed(FailureReason::Requirement {
                        name,
                        reason: Box::new(reason),
                    });
                }
            }
        }

        match prerequisite.procedure.for_os(self.platform.os) {
            Some(steps) => ProvisionState::Installing(steps.to_vec()),
            None => ProvisionState::Failed(FailureReason::NoInstallPath(self.platform.os)),
        }
    }

    // Installing -> Satisfied | AwaitingRestart | Failed
    fn install(&mut self, prerequisite: &Prerequisite, steps: &[Step]) -> ProvisionState {
        for step in steps {
            info!("run {step}");
            if let Err(error) = self.runner.run(step, &self.search_path) {
                return ProvisionState::Failed(FailureReason::Step(error));
            }
        }

        if prerequisite.restart_after_install {
            return ProvisionState::AwaitingRestart;
        }

        if let Err(reason) = self.activate(&prerequisite.activation) {
            return ProvisionState::Failed(reason);
        }

        if self.detect(&prerequisite.detection) {
            ProvisionState::Satisfied { installed: true }
        } else {
            ProvisionState::Failed(FailureReason::StillMissing)
        }
    }

    // Tool installed by an earlier run, but outside of the search path.
    fn adopt(&mut self, prerequisite: &Prerequisite) -> bool {
        let Detection::Command(program) = &prerequisite.detection else {
            return false;
        };

        let found = match &prerequisite.activation {
            Activation::None => None,
            Activation::PrependDir(dir) => Some(dir.join(program)),
            Activation::PackageManagerBin => {
                if !self.platform.package_manager_present() {
                    self.platform.package_manager =
                        find_package_manager(&self.package_manager_candidates);
                }
                self.platform.package_manager.clone()
            }
        };

        let Some(dir) = found
            .filter(|path| path.is_file())
            .and_then(|path| path.parent().map(PathBuf::from))
        else {
            return false;
        };

        if self.search_path.prepend(&dir) {
            info!("found {} in {}, add it to search path", prerequisite.name, dir.display());
        }

        true
    }

    fn activate(&mut self, activation: &Activation) -> Result<(), FailureReason> {
        let dir = match activation {
            Activation::None => return Ok(()),
            Activation::PrependDir(dir) => dir.clone(),
            Activation::PackageManagerBin => {
                let found = find_package_manager(&self.package_manager_candidates)
                    .or_else(|| self.runner.locate("brew", &self.search_path))
                    .ok_or(FailureReason::ActivationFailed)?;
                self.platform.package_manager = Some(found.clone());
                found
                    .parent()
                    .map(PathBuf::from)
                    .ok_or(FailureReason::ActivationFailed)?
            }
        };

        if self.search_path.prepend(&dir) {
            info!("add {} to search path", dir.display());
        }

        Ok(())
    }

    fn detect(&self, detection: &Detection) -> bool {
        match detection {
            Detection::Command(program) => self.runner.locate(program, &self.search_path).is_some(),
            Detection::Unavailable(program) => {
                self.runner.locate(program, &self.search_path).is_none()
            }
            Detection::File(path) => path.exists(),
            Detection::LoginShell(shell) => self
                .login_shell()
                .is_some_and(|login| program_name(login) == *shell),
            Detection::All(checks) => checks.iter().all(|check| self.detect(check)),
            Detection::Any(checks) => checks.iter().any(|check| self.detect(check)),
        }
    }

    fn login_shell(&self) -> Option<PathBuf> {
        let (query, parse): (&str, fn(&str) -> Option<&str>) = match self.platform.os {
            OsFamily::MacOs => (
                "dscl . -read \"/Users/$(id -un)\" UserShell",
                parse_dscl_shell,
            ),
            OsFamily::Linux { .. } => ("getent passwd \"$(id -un)\"", parse_passwd_shell),
            OsFamily::Unknown => return None,
        };

        let output = self
            .runner
            .capture(&Step::script(query), &self.search_path)
            .ok()?;
        parse(&output).map(PathBuf::from)
    }
}

// INVARIANT: Shell is the seventh field of a passwd entry.
fn parse_passwd_shell(output: &str) -> Option<&str> {
    output
        .lines()
        .next()?
        .split(':')
        .nth(6)
        .map(str::trim)
        .filter(|shell| !shell.is_empty())
}

fn parse_dscl_shell(output: &str) -> Option<&str> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("UserShell:"))
        .map(str::trim)
        .filter(|shell| !shell.is_empty())
}

/// Why a prerequisite could not be satisfied.
#[derive(Debug, thiserror::Error)]
pub enum FailureReason {
    /// Platform has no install procedure.
    #[error("no known installation path for {0}")]
    NoInstallPath(OsFamily),

    /// Install step failed.
    #[error(transparent)]
    Step(#[from] ExecError),

    /// Sub-prerequisite failed.
    #[error("required {name} could not be provisioned: {reason}")]
    Requirement {
        name: String,
        reason: Box<FailureReason>,
    },

    /// Install location of fresh tool cannot be found.
    #[error("installation path not found, restart your terminal and run dotstrap again")]
    ActivationFailed,

    /// Still not detected after install.
    #[error("still not found after installing")]
    StillMissing,
}

/// Provisioning error types.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Prerequisite cannot be satisfied.
    #[error("failed to provision {name}")]
    Failed {
        name: String,
        #[source]
        reason: FailureReason,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
