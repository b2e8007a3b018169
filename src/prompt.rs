// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! User interaction.
//!
//! Dotstrap only ever asks two kinds of questions: what the user's name is,
//! and whether a conflicting file may be backed up and replaced. Both block
//! until answered.

use inquire::{Confirm, Text};
use std::path::Path;

/// Layer of indirection for asking the user questions.
pub trait Prompter {
    /// Ask for display name.
    ///
    /// A blank answer yields `default`.
    fn ask_name(&self, default: &str) -> Result<String>;

    /// Ask whether `destination` may be moved aside and replaced.
    fn confirm_backup(&self, destination: &Path, backup: &Path) -> Result<bool>;
}

/// Prompter backed by the terminal through inquire.
#[derive(Debug, Default)]
pub struct InquirePrompter;

impl InquirePrompter {
    pub fn new() -> Self {
        Self
    }
}

impl Prompter for InquirePrompter {
    fn ask_name(&self, default: &str) -> Result<String> {
        let answer = Text::new("What name should your shell greet you with?")
            .with_default(default)
            .prompt()?;

        let answer = answer.trim();
        if answer.is_empty() {
            Ok(default.to_string())
        } else {
            Ok(answer.to_string())
        }
    }

    fn confirm_backup(&self, destination: &Path, backup: &Path) -> Result<bool> {
        let question = format!(
            "{} already exists. Move it to {} and replace it?",
            destination.display(),
            backup.display()
        );

        Ok(Confirm::new(&question)
            .with_default(true)
            .with_help_message("Answering no leaves the file untouched")
            .prompt()?)
    }
}

/// Prompt error types.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Prompt could not be shown or was interrupted.
    #[error(transparent)]
    Inquire(#[from] inquire::InquireError),
}

/// Friendly result alias :3
pub type Result<T, E = PromptError> = std::result::Result<T, E>;
