// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment settings and the YAML log group configuration.
//!
//! ```yaml
//! aws_region: us-east-1
//! collection_interval: 10
//! log_groups:
//!   - path: /aws/lambda/my-lambda
//!     custom_fields:
//!       team: platform
//!   - path: thisisaloggroup
//! ```

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::source::{CustomFields, LogGroup};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;
pub const MIN_INTERVAL_MINUTES: u64 = 5;
pub const MAX_INTERVAL_MINUTES: u64 = 1380;
pub const DEFAULT_MAX_PAGES_PER_CYCLE: usize = 1;

pub const DEFAULT_LOGZIO_LISTENER: &str = "https://listener.logz.io:8071";
pub const DEFAULT_CONFIG_FILE: &str = "shared/config.yaml";
pub const DEFAULT_POSITION_FILE: &str = "shared/position.yaml";

pub const ENV_LOGZIO_TOKEN: &str = "LOGZIO_LOG_SHIPPING_TOKEN";
pub const ENV_LOGZIO_LISTENER: &str = "LOGZIO_LISTENER";
pub const ENV_CONFIG_FILE: &str = "CONFIG_FILE";
pub const ENV_POSITION_FILE: &str = "POSITION_FILE";
pub const ENV_RESET_POSITIONS: &str = "RESET_POSITIONS";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("env var {0} must be set")]
    MissingEnv(&'static str),
    #[error("could not read config file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no log groups in config")]
    NoLogGroups,
    #[error("field path not specified for log group #{0}")]
    MissingPath(usize),
    #[error("field aws_region not specified")]
    MissingRegion,
    #[error("collection_interval must be between 5 and 1380 minutes, got {0}")]
    IntervalOutOfBounds(i64),
    #[error("max_pages_per_cycle must be at least 1")]
    InvalidMaxPages,
}

/// Process settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub logzio_token: String,
    pub logzio_listener: String,
    pub config_file: PathBuf,
    pub position_file: PathBuf,
    /// Delete the position file before starting.
    pub reset_positions: bool,
    pub https_proxy: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let logzio_token = env::var(ENV_LOGZIO_TOKEN)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::MissingEnv(ENV_LOGZIO_TOKEN))?;
        let logzio_listener = env::var(ENV_LOGZIO_LISTENER)
            .ok()
            .filter(|listener| !listener.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOGZIO_LISTENER.to_string());
        let config_file = env::var(ENV_CONFIG_FILE)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        let position_file = env::var(ENV_POSITION_FILE)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_POSITION_FILE));
        let reset_positions = env::var(ENV_RESET_POSITIONS)
            .map(|val| matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false);
        let https_proxy = env::var("HTTPS_PROXY").ok();

        Ok(Settings {
            logzio_token,
            logzio_listener,
            config_file,
            position_file,
            reset_positions,
            https_proxy,
        })
    }
}

/// Log level from `LOG_LEVEL`, lowercased, `info` when unset.
///
/// Read on its own so logging can be set up before [`Settings::from_env`]
/// reports anything.
pub fn log_level_from_env() -> String {
    env::var(ENV_LOG_LEVEL)
        .ok()
        .filter(|val| !val.trim().is_empty())
        .map(|val| val.trim().to_lowercase())
        .unwrap_or_else(|| "info".to_string())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct YamlConfig {
    log_groups: Option<Vec<YamlLogGroup>>,
    #[serde(deserialize_with = "deserialize_optional_minutes")]
    collection_interval: Option<i64>,
    aws_region: Option<String>,
    max_pages_per_cycle: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct YamlLogGroup {
    path: Option<String>,
    custom_fields: Option<CustomFields>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogGroupConfig {
    pub path: String,
    pub custom_fields: Option<CustomFields>,
}

/// Validated content of the configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileConfig {
    pub log_groups: Vec<LogGroupConfig>,
    /// Minutes between two fetches of the same log group.
    pub collection_interval: u64,
    pub aws_region: String,
    pub max_pages_per_cycle: usize,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        info!("Config file path: {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let yaml = if content.trim().is_empty() {
            YamlConfig::default()
        } else {
            serde_yaml::from_str::<Option<YamlConfig>>(content)?.unwrap_or_default()
        };

        let log_groups = yaml
            .log_groups
            .filter(|log_groups| !log_groups.is_empty())
            .ok_or(ConfigError::NoLogGroups)?
            .into_iter()
            .enumerate()
            .map(|(index, log_group)| {
                let path = log_group
                    .path
                    .filter(|path| !path.is_empty())
                    .ok_or(ConfigError::MissingPath(index))?;
                if log_group.custom_fields.is_some() {
                    debug!("Found custom fields for {path}");
                }
                Ok(LogGroupConfig {
                    path,
                    custom_fields: log_group.custom_fields,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let aws_region = yaml
            .aws_region
            .map(|region| region.trim().to_string())
            .filter(|region| !region.is_empty())
            .ok_or(ConfigError::MissingRegion)?;
        info!("AWS region: {aws_region}");

        let collection_interval = match yaml.collection_interval {
            Some(interval) if interval != 0 => u64::try_from(interval)
                .ok()
                .filter(|minutes| {
                    (MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(minutes)
                })
                .ok_or(ConfigError::IntervalOutOfBounds(interval))?,
            _ => {
                info!("Reverting collection_interval to default value: {DEFAULT_INTERVAL_MINUTES}");
                DEFAULT_INTERVAL_MINUTES
            }
        };

        let max_pages_per_cycle = match yaml.max_pages_per_cycle {
            Some(0) => return Err(ConfigError::InvalidMaxPages),
            Some(pages) => pages,
            None => DEFAULT_MAX_PAGES_PER_CYCLE,
        };

        Ok(FileConfig {
            log_groups,
            collection_interval,
            aws_region,
            max_pages_per_cycle,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval * 60)
    }

    /// Builds the descriptors of every configured log group.
    pub fn log_groups(&self, start_time: i64) -> Vec<LogGroup> {
        self.log_groups
            .iter()
            .map(|log_group| {
                LogGroup::new(
                    log_group.path.clone(),
                    log_group.custom_fields.clone(),
                    start_time,
                    self.collection_interval,
                )
            })
            .collect()
    }
}

/// Accepts a number or a numeric string, truncating fractions. Negative
/// values are kept so the bounds check rejects them. Anything else is
/// ignored with a warning so the default interval applies.
fn deserialize_optional_minutes<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let minutes = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(truncate_minutes)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate_minutes))
        }
        Some(_) => None,
    };
    if minutes.is_none() {
        warn!("Could not parse field collection_interval");
    }
    Ok(minutes)
}

#[allow(clippy::cast_possible_truncation)]
fn truncate_minutes(minutes: f64) -> Option<i64> {
    // saturating cast, out of range values still fail the bounds check
    minutes.is_finite().then(|| minutes.trunc() as i64)
}
