//! HelpdeskConfig - TOML configuration for the engine and scheduler.
//!
//! ```toml
//! [log]
//! level = "info"
//! format = "pretty"     # or "json"
//!
//! [outbox]
//! workers = 2
//! idle_time_ms = 1000
//! reserve_for_ms = 300000
//!
//! [manager_scheduler]
//! period_ms = 1000
//!
//! [manager_load]
//! max_problems_at_same_time = 5
//! ```
//!
//! Every section and key is optional.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::manager_load::{MAX_PROBLEMS_AT_SAME_TIME, MIN_PROBLEMS_AT_SAME_TIME};
use crate::app::outbox::OutboxOptions;
use crate::app::scheduler::{MAX_PERIOD, MIN_PERIOD};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub workers: usize,
    pub idle_time_ms: u64,
    pub reserve_for_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        let opts = OutboxOptions::default();
        Self {
            workers: opts.workers,
            idle_time_ms: opts.idle_time.as_millis() as u64,
            reserve_for_ms: opts.reserve_for.as_millis() as u64,
        }
    }
}

impl OutboxConfig {
    pub fn options(&self) -> OutboxOptions {
        OutboxOptions {
            workers: self.workers,
            idle_time: Duration::from_millis(self.idle_time_ms),
            reserve_for: Duration::from_millis(self.reserve_for_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSchedulerConfig {
    pub period_ms: u64,
}

impl Default for ManagerSchedulerConfig {
    fn default() -> Self {
        Self { period_ms: 1_000 }
    }
}

impl ManagerSchedulerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerLoadConfig {
    pub max_problems_at_same_time: usize,
}

impl Default for ManagerLoadConfig {
    fn default() -> Self {
        Self {
            max_problems_at_same_time: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelpdeskConfig {
    pub log: LogConfig,
    pub outbox: OutboxConfig,
    pub manager_scheduler: ManagerSchedulerConfig,
    pub manager_load: ManagerLoadConfig,
}

impl HelpdeskConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.outbox
            .options()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let period = self.manager_scheduler.period();
        if !(MIN_PERIOD..=MAX_PERIOD).contains(&period) {
            return Err(ConfigError::Invalid(format!(
                "manager_scheduler.period_ms must be in {}..={}, got {}",
                MIN_PERIOD.as_millis(),
                MAX_PERIOD.as_millis(),
                self.manager_scheduler.period_ms
            )));
        }

        let max = self.manager_load.max_problems_at_same_time;
        if !(MIN_PROBLEMS_AT_SAME_TIME..=MAX_PROBLEMS_AT_SAME_TIME).contains(&max) {
            return Err(ConfigError::Invalid(format!(
                "manager_load.max_problems_at_same_time must be in \
                 {MIN_PROBLEMS_AT_SAME_TIME}..={MAX_PROBLEMS_AT_SAME_TIME}, got {max}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = HelpdeskConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, HelpdeskConfig::default());
        assert_eq!(cfg.outbox.options(), OutboxOptions::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = HelpdeskConfig::from_toml_str(
            r#"
            [log]
            level = "debug,helpdesk_core=trace"
            format = "json"

            [outbox]
            workers = 8
            idle_time_ms = 250

            [manager_scheduler]
            period_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(cfg.log.format, LogFormat::Json);
        assert_eq!(cfg.outbox.workers, 8);
        assert_eq!(cfg.outbox.options().idle_time, Duration::from_millis(250));
        assert_eq!(cfg.outbox.reserve_for_ms, OutboxConfig::default().reserve_for_ms);
        assert_eq!(cfg.manager_scheduler.period(), Duration::from_millis(500));
        assert_eq!(cfg.manager_load.max_problems_at_same_time, 5);
    }

    #[rstest]
    #[case("[outbox]\nworkers = 0")]
    #[case("[outbox]\nworkers = 33")]
    #[case("[outbox]\nidle_time_ms = 50")]
    #[case("[outbox]\nreserve_for_ms = 600001")]
    #[case("[manager_scheduler]\nperiod_ms = 60001")]
    #[case("[manager_load]\nmax_problems_at_same_time = 0")]
    #[case("[manager_load]\nmax_problems_at_same_time = 31")]
    fn out_of_range_values_are_rejected(#[case] raw: &str) {
        let err = HelpdeskConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = HelpdeskConfig::from_toml_str("[outbox\nworkers = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_means_defaults() {
        let cfg = HelpdeskConfig::load("/definitely/not/here/helpdesk.toml").unwrap();
        assert_eq!(cfg, HelpdeskConfig::default());
    }
}
