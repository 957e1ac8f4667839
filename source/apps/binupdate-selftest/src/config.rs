// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! TOML configuration for the selftest runner.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use binupdate::header::{BIN_NAME_MAX, BIN_VER_MAX};
use binupdate::parse_version;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runner settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelftestConfig {
    /// Binary exercised by the upgrade scenarios.
    pub app_name: String,
    /// Name given to the onboarded binary.
    pub new_app_name: String,
    /// Version string of the onboarded binary.
    pub new_app_version: String,
    /// Wait between a reload request and the follow-up query.
    pub reload_grace_ms: u64,
    pub repetitions: u64,
    /// Copy buffer size.
    pub chunk_size: usize,
}

impl Default for SelftestConfig {
    fn default() -> Self {
        Self {
            app_name: "micom".to_string(),
            new_app_name: "newapp".to_string(),
            new_app_version: "20200421".to_string(),
            reload_grace_ms: 2000,
            repetitions: 1,
            chunk_size: binupdate::DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SelftestConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: Self = toml::from_str(&data)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_name("app_name", &self.app_name)?;
        check_name("new_app_name", &self.new_app_name)?;
        if self.app_name == self.new_app_name {
            return Err(ConfigError::Invalid("new_app_name must differ from app_name".into()));
        }
        if self.new_app_version.len() > BIN_VER_MAX {
            return Err(ConfigError::Invalid(format!(
                "new_app_version longer than {BIN_VER_MAX} bytes"
            )));
        }
        parse_version(&self.new_app_version)
            .map_err(|err| ConfigError::Invalid(format!("new_app_version: {err}")))?;
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be non-zero".into()));
        }
        Ok(())
    }

    pub fn reload_grace(&self) -> Duration {
        Duration::from_millis(self.reload_grace_ms)
    }
}

fn check_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value.len() > BIN_NAME_MAX {
        return Err(ConfigError::Invalid(format!("{field} must be 1..={BIN_NAME_MAX} bytes")));
    }
    Ok(())
}
