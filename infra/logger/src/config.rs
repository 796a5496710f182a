use crate::error::LoggerError;
use crate::{LevelFilter, Logger, Rotation};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Rotation period of the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Self::MINUTELY,
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

/// Rolling file output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLogConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub rotation: LogRotation,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Writes one JSON object per line instead of plain text.
    #[serde(default)]
    pub json: bool,
}

const fn default_max_files() -> usize {
    crate::DEFAULT_MAX_FILES
}

/// Deserializable logger settings, e.g. the `[log]` table of a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level: `trace`, `debug`, `info`, `warn`, `error` or `off`.
    pub level: String,
    pub console: bool,
    /// Extra directives such as `payflow_events=debug`. `RUST_LOG` still wins.
    pub filter: Option<String>,
    pub file: Option<FileLogConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_owned(), console: true, filter: None, file: None }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> Result<LevelFilter, LoggerError> {
        LevelFilter::from_str(&self.level)
            .map_err(|e| LoggerError::invalid(format!("invalid level '{}': {e}", self.level)))
    }
}

impl Logger {
    /// Initializes the global subscriber from deserialized settings.
    ///
    /// `name` prefixes the log file names.
    pub fn from_config(name: impl Into<String>, config: &LogConfig) -> Result<Self, LoggerError> {
        let mut builder =
            Self::builder().name(name).level(config.level_filter()?).console(config.console);
        if let Some(filter) = &config.filter {
            builder = builder.env_filter(filter.clone());
        }

        let Some(file) = &config.file else {
            return builder.init();
        };
        let builder = builder
            .path(file.path.clone())
            .rotation(file.rotation.into())
            .max_files(file.max_files);
        if file.json { builder.json().init() } else { builder.init() }
    }
}
