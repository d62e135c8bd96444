// issue-query - read-only CLI for the Issue Analyzor service
// Copyright (C) 2024 The issue-query authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::fmt;
use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};

use crate::config::Config;
use crate::error::QueryError;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Last-resort source of credentials when nothing was configured.
pub trait Prompter {
    fn can_prompt(&self) -> bool;
    fn username(&mut self) -> io::Result<String>;
    fn password(&mut self) -> io::Result<String>;
}

/// Reads the username from stdin and the password without echo.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn can_prompt(&self) -> bool {
        io::stdin().is_terminal()
    }

    fn username(&mut self) -> io::Result<String> {
        eprint!("Username: ");
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }

    fn password(&mut self) -> io::Result<String> {
        rpassword::prompt_password("Password: ")
    }
}

/// Where a credential field was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Command-line flag or its environment variable.
    Argument,
    Config,
    Prompt,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::Argument => "flag/env",
            Source::Config => "config",
            Source::Prompt => "prompt",
        })
    }
}

/// Resolved credentials plus the source of each field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub credentials: Credentials,
    pub username_source: Source,
    pub password_source: Source,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}

fn configured(explicit: Option<&str>, from_config: Option<&str>) -> Option<(String, Source)> {
    non_empty(explicit)
        .map(|v| (v, Source::Argument))
        .or_else(|| non_empty(from_config).map(|v| (v, Source::Config)))
}

/// `explicit` values come from the command line or its environment
/// fallback; the config file is consulted next, then the prompter.
pub fn resolve_credentials(
    explicit_username: Option<&str>,
    explicit_password: Option<&str>,
    config: &Config,
    prompter: &mut dyn Prompter,
) -> Result<Resolved> {
    let mut username = configured(explicit_username, config.username.as_deref());
    let mut password = configured(explicit_password, config.password.as_deref());

    if prompter.can_prompt() {
        if username.is_none() {
            let typed = prompter.username().context("reading username")?;
            username = non_empty(Some(typed.trim())).map(|v| (v, Source::Prompt));
        }
        if password.is_none() {
            let typed = prompter.password().context("reading password")?;
            password = non_empty(Some(typed.as_str())).map(|v| (v, Source::Prompt));
        }
    }

    match (username, password) {
        (Some((username, username_source)), Some((password, password_source))) => {
            tracing::debug!(
                %username,
                %username_source,
                %password_source,
                "credentials resolved"
            );
            Ok(Resolved {
                credentials: Credentials { username, password },
                username_source,
                password_source,
            })
        }
        _ => Err(QueryError::MissingCredentials.into()),
    }
}
