// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bootstrap a development environment from a dotfiles repository.
//!
//! A run of dotstrap does three things. It makes sure the tools that the
//! dotfiles rely on are installed, installs the package manifest, and links
//! every managed file from the dotfiles repository into the home directory.
//!
//! # Safety Net
//!
//! Dotstrap never destroys user data. A conflicting file in the home
//! directory is only replaced after the user agrees, and even then it is
//! moved aside to a `.bak` sibling first. Running dotstrap again on an
//! already bootstrapped machine changes nothing and asks nothing.
//!
//! # Failure Policy
//!
//! Missing prerequisites are fatal: without them the dotfiles are useless,
//! so dotstrap stops before touching the home directory. Problems with a
//! single managed file are not: they get reported, and the remaining files
//! are still linked.

pub mod config;
pub mod exec;
pub mod identity;
pub mod install;
pub mod link;
pub mod path;
pub mod platform;
pub mod prompt;
pub mod provision;
pub mod search_path;
