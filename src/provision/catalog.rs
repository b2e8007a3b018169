// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Built-in prerequisites.
//!
//! Installers are invoked through their documented one-liners. Anything that
//! may ask for a password gets the terminal. Installers that would edit shell
//! startup files are told not to, since those files are managed files
//! themselves.

use crate::{
    exec::Step,
    provision::{Activation, Detection, Prerequisite, Procedure},
};

use std::path::Path;

/// Ordered listing of prerequisites for a full install.
///
/// `shell` is the interpreter the managed shell configuration expects.
pub fn default_prerequisites(home_dir: impl AsRef<Path>, shell: &str) -> Vec<Prerequisite> {
    let home = home_dir.as_ref();
    vec![
        login_shell(shell),
        homebrew(),
        rust(home),
        nvm(home),
        uv(home),
        claude(home),
    ]
}

/// Make `shell` the user's login shell.
///
/// Only a new session picks up a changed login shell, so this one requests
/// a restart instead of being verified in-process.
pub fn login_shell(shell: &str) -> Prerequisite {
    let change = Step::script(format!("chsh -s \"$(command -v {shell})\"")).interactive();
    Prerequisite::new(
        "login-shell",
        Detection::LoginShell(shell.into()),
        Procedure::everywhere([change]),
    )
    .with_restart()
}

/// Homebrew, the package manager.
pub fn homebrew() -> Prerequisite {
    let install = Step::script(
        "/bin/bash -c \"$(curl -fsSL https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh)\"",
    )
    .interactive();

    Prerequisite::new(
        "homebrew",
        Detection::Command("brew".into()),
        Procedure::everywhere([install]),
    )
    .with_activation(Activation::PackageManagerBin)
    .with_requirement(build_toolchain())
}

/// Compiler toolchain Homebrew needs on Linux.
///
/// Installed through apt. Distributions without apt are left alone, and
/// Homebrew's own installer reports what it is missing.
pub fn build_toolchain() -> Prerequisite {
    let update = Step::new("sudo").args(["apt-get", "update"]).interactive();
    let install = Step::new("sudo")
        .args(["apt-get", "install", "-y", "build-essential"])
        .interactive();

    Prerequisite::new(
        "build-toolchain",
        Detection::Any(vec![
            Detection::All(vec![
                Detection::Command("cc".into()),
                Detection::Command("make".into()),
            ]),
            Detection::Unavailable("apt-get".into()),
        ]),
        Procedure::linux_only([update, install]),
    )
}

/// Rust toolchain through rustup.
pub fn rust(home: &Path) -> Prerequisite {
    let install = Step::script(
        "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y --no-modify-path",
    );

    Prerequisite::new(
        "rust",
        Detection::Command("cargo".into()),
        Procedure::everywhere([install]),
    )
    .with_activation(Activation::PrependDir(home.join(".cargo").join("bin")))
}

/// Node version manager.
///
/// Lives as a shell function sourced from `~/.nvm/nvm.sh`, so there is no
/// executable to look for.
pub fn nvm(home: &Path) -> Prerequisite {
    let install = Step::script(
        "curl -o- https://raw.githubusercontent.com/nvm-sh/nvm/v0.40.1/install.sh | bash",
    )
    .env("PROFILE", "/dev/null");

    Prerequisite::new(
        "nvm",
        Detection::File(home.join(".nvm").join("nvm.sh")),
        Procedure::everywhere([install]),
    )
}

/// Python package and project manager.
pub fn uv(home: &Path) -> Prerequisite {
    let install =
        Step::script("curl -LsSf https://astral.sh/uv/install.sh | sh").env("UV_NO_MODIFY_PATH", "1");

    Prerequisite::new("uv", Detection::Command("uv".into()), Procedure::everywhere([install]))
        .with_activation(Activation::PrependDir(home.join(".local").join("bin")))
}

/// Claude Code command line assistant.
pub fn claude(home: &Path) -> Prerequisite {
    let install = Step::script("curl -fsSL https://claude.ai/install.sh | bash");

    Prerequisite::new(
        "claude",
        Detection::Command("claude".into()),
        Procedure::everywhere([install]),
    )
    .with_activation(Activation::PrependDir(home.join(".local").join("bin")))
}
