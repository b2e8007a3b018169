// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dotstrap::{
    exec::SystemRunner,
    install::{Context, InstallOptions, Installer, Transition, DIR_VARIABLE, NAME_VARIABLE},
    link::LinkState,
    path::default_dotfiles_dir,
    prompt::InquirePrompter,
};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::{env, path::PathBuf, process::exit};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "dotstrap [options] [<command>]",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to dotfiles repository.
    #[arg(short, long, global = true, env = DIR_VARIABLE, value_name = "path")]
    pub dotfiles: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    fn run(self) -> Result<i32> {
        let dotfiles = self.dotfiles.unwrap_or_else(default_dotfiles_dir);
        // INVARIANT: Bare invocation honors the same environment as `install`.
        let fallback = || {
            Command::Install(InstallArgs {
                name: env::var(NAME_VARIABLE).ok(),
                ..InstallArgs::default()
            })
        };

        match self.command.unwrap_or_else(fallback) {
            Command::Install(opts) => run_install(dotfiles, opts),
            Command::Link => run_link(dotfiles),
            Command::Status => run_status(dotfiles),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Bootstrap the whole environment (default).
    #[command(override_usage = "dotstrap install [options]")]
    Install(InstallArgs),

    /// Only link managed files into home directory.
    #[command(override_usage = "dotstrap link [options]")]
    Link,

    /// Show state of every managed file without changing anything.
    #[command(override_usage = "dotstrap status [options]")]
    Status,
}

#[derive(Args, Clone, Debug, Default)]
struct InstallArgs {
    /// Name the shell greets you with, skips the prompt.
    #[arg(short, long, env = NAME_VARIABLE, value_name = "name")]
    pub name: Option<String>,

    /// Do not open a fresh shell session when done.
    #[arg(long)]
    pub no_reload: bool,

    /// Do not install the package manifest.
    #[arg(long)]
    pub skip_bundle: bool,
}

impl From<InstallArgs> for InstallOptions {
    fn from(args: InstallArgs) -> Self {
        Self {
            name: args.name,
            skip_bundle: args.skip_bundle,
            reload: !args.no_reload,
        }
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match run() {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

fn run() -> Result<i32> {
    Cli::parse().run()
}

fn run_install(dotfiles: PathBuf, opts: InstallArgs) -> Result<i32> {
    let runner = SystemRunner::new();
    let prompter = InquirePrompter::new();
    let context = Context::from_env(dotfiles, &runner)?;
    let installer = Installer::new(&runner, &prompter, context);

    let code = match installer.run(&opts.into())? {
        Transition::RestartUnderInterpreter(relaunch) => relaunch.execute()?,
        Transition::Complete {
            reload: Some(reload),
            ..
        } => reload.execute()?,
        Transition::Complete { reload: None, .. } => 0,
    };

    Ok(code)
}

fn run_link(dotfiles: PathBuf) -> Result<i32> {
    let runner = SystemRunner::new();
    let prompter = InquirePrompter::new();
    let context = Context::from_env(dotfiles, &runner)?;
    let report = Installer::new(&runner, &prompter, context).link();

    Ok(if report.failures() == 0 { 0 } else { 1 })
}

fn run_status(dotfiles: PathBuf) -> Result<i32> {
    let runner = SystemRunner::new();
    let prompter = InquirePrompter::new();
    let context = Context::from_env(dotfiles, &runner)?;
    let installer = Installer::new(&runner, &prompter, context);

    let platform = &installer.context().platform;
    println!("platform: {}", platform.os);
    match &platform.package_manager {
        Some(brew) => println!("package manager: {}", brew.display()),
        None => println!("package manager: not installed"),
    }

    for (file, state) in installer.status() {
        match state {
            Ok(LinkState::CorrectSymlink) => println!("  ok  {}", file.destination.display()),
            Ok(state) if state.is_conflict() => {
                println!("  !!  {} ({state}, needs confirmation)", file.destination.display())
            }
            Ok(state) => println!("  --  {} ({state})", file.destination.display()),
            Err(error) => println!("  !!  {} ({error})", file.destination.display()),
        }
    }

    Ok(0)
}
