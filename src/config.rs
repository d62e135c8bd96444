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

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const BASE_URL_ENV: &str = "ISSUE_ANALYZOR_BASE";
pub const USERNAME_ENV: &str = "ISSUE_ANALYZOR_USERNAME";
pub const PASSWORD_ENV: &str = "ISSUE_ANALYZOR_PASSWORD";
pub const CONFIG_DIR_ENV: &str = "ISSUE_QUERY_CONFIG_DIR";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    User,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate a writable config directory for the current user")]
    MissingConfigDir,
    #[error("timeout_secs must be greater than zero")]
    ZeroTimeout,
}

impl Config {
    pub fn query_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        match self.timeout_secs {
            Some(0) => Err(ConfigError::ZeroTimeout),
            Some(secs) => Ok(Some(Duration::from_secs(secs))),
            None => Ok(None),
        }
    }

    /// Copy safe to print: the password is replaced by a fixed mask.
    pub fn masked(&self) -> Config {
        Config {
            password: self.password.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }
}

pub fn config_path(scope: Scope, cwd: &Path) -> Result<PathBuf> {
    match scope {
        Scope::Local => Ok(cwd.join(".issue-query.yaml")),
        Scope::User => {
            if let Ok(custom) = env::var(CONFIG_DIR_ENV) {
                return Ok(PathBuf::from(custom).join("config.yaml"));
            }
            let base = config_dir().ok_or(ConfigError::MissingConfigDir)?;
            Ok(base.join("issue-query").join("config.yaml"))
        }
    }
}

pub fn load(cwd: &Path) -> Result<Config> {
    let user = load_scope(Scope::User, cwd)?;
    let local = load_scope(Scope::Local, cwd)?;
    Ok(merge(user, local))
}

pub fn load_scope(scope: Scope, cwd: &Path) -> Result<Config> {
    Ok(read_if_exists(&config_path(scope, cwd)?)?.unwrap_or_default())
}

pub fn save(scope: Scope, config: &Config, cwd: &Path) -> Result<PathBuf> {
    let path = config_path(scope, cwd)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let serialized = serde_yaml::to_string(config).context("serializing config")?;
    fs::write(&path, serialized).with_context(|| format!("writing {:?}", path))?;
    Ok(path)
}

/// `--base` (which clap already fills from `ISSUE_ANALYZOR_BASE`), then the
/// config files, then the built-in default.
pub fn resolve_base_url(flag: Option<&str>, config: &Config) -> String {
    flag.map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| config.base_url.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        .unwrap_or(DEFAULT_BASE_URL)
        .to_string()
}

fn read_if_exists(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    if contents.trim().is_empty() {
        return Ok(Some(Config::default()));
    }
    let config = serde_yaml::from_str(&contents).with_context(|| format!("parsing {:?}", path))?;
    Ok(Some(config))
}

fn merge(user: Config, local: Config) -> Config {
    Config {
        base_url: local.base_url.or(user.base_url),
        username: local.username.or(user.username),
        password: local.password.or(user.password),
        timeout_secs: local.timeout_secs.or(user.timeout_secs),
    }
}
