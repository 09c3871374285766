/*
 * questlock: threshold-split credentials released through real-world quests
 * Copyright (C) 2018-2022 Aleksa Sarai <cyphar@cyphar.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Service configuration, loaded from a TOML file.
//!
//! ```toml
//! [policy]
//! total_shares = 10
//! threshold = 6
//! max_quests = 5
//! ```

use crate::shamir;

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Environment variable naming a config file to use.
pub const CONFIG_ENV: &str = "QUESTLOCK_CONFIG";
/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "questlock.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid policy: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub policy: Policy,
}

/// How new locks are split.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    pub total_shares: usize,
    pub threshold: usize,
    pub max_quests: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            total_shares: 10,
            threshold: 6,
            max_quests: 5,
        }
    }
}

impl Policy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        shamir::check_threshold(self.total_shares, self.threshold)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if self.max_quests == 0 || self.max_quests > self.total_shares {
            return Err(ConfigError::Invalid(format!(
                "max_quests ({}) must be within 1..={}",
                self.max_quests, self.total_shares
            )));
        }
        Ok(())
    }
}

impl Config {
    pub fn from_toml(path: &Path, data: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(data).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.policy.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(path, &data)
    }

    /// Load the configuration from the first of: `explicit`, the file named
    /// by `$QUESTLOCK_CONFIG`, or `./questlock.toml`. Falls back to the
    /// defaults if none of them is set or present.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_owned)
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| Some(PathBuf::from(CONFIG_FILE)).filter(|path| path.is_file()));

        match path {
            Some(path) => {
                let config = Self::from_file(&path)?;
                tracing::debug!(path = %path.display(), ?config, "loaded configuration");
                Ok(config)
            }
            None => {
                tracing::debug!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}
