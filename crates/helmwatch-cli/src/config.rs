//! Configuration file management.
//!
//! The file is TOML, read from `<config dir>/helmwatch/config.toml` unless
//! `--config` names another one. Every key is optional; a missing default
//! file means all defaults.
//!
//! ```toml
//! [backend]
//! base_url = "https://smart-helmet-server-ebon.vercel.app/api"
//! request_timeout_secs = 10
//!
//! [push]
//! url = "wss://helmet.example.com/push"
//! connect_timeout_secs = 10
//!
//! [monitor]
//! poll_interval_secs = 5
//! poll_failure_threshold = 3
//! countdown_secs = 30
//! resubscribe_initial_secs = 5
//! resubscribe_max_secs = 60
//!
//! [sos]
//! max_retries = 2
//! retry_initial_delay_ms = 500
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use helmwatch_core::{MonitorConfig, PollOptions, ReconnectOptions, RetryConfig};
use serde::{Deserialize, Serialize};

use crate::cli::EndpointArgs;

/// Default API base URL of the hosted helmet backend.
pub const DEFAULT_BASE_URL: &str = "https://smart-helmet-server-ebon.vercel.app/api";

/// Longest countdown accepted, in seconds.
pub const MAX_COUNTDOWN_SECS: u32 = 600;

/// Errors raised while loading or saving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration:\n{}", format_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// One problem found by [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted key, e.g. `monitor.countdown_secs`.
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub push: PushConfig,
    pub monitor: MonitorSection,
    pub sos: SosConfig,
}

/// REST backend settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// API base URL; `/alerts`, `/sos` and `/device-data` hang off it.
    pub base_url: String,
    /// Upper bound on one HTTP round trip.
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Push channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// WebSocket URL. Without one the monitor runs on polling alone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_secs: 10,
        }
    }
}

/// Monitor timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub poll_interval_secs: u64,
    /// Consecutive poll failures before the monitor reports `disconnected`.
    pub poll_failure_threshold: u32,
    pub countdown_secs: u32,
    pub resubscribe_initial_secs: u64,
    pub resubscribe_max_secs: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            poll_failure_threshold: 3,
            countdown_secs: 30,
            resubscribe_initial_secs: 5,
            resubscribe_max_secs: 60,
        }
    }
}

/// SOS call retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SosConfig {
    pub max_retries: u32,
    pub retry_initial_delay_ms: u64,
}

impl Default for SosConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_initial_delay_ms: 500,
        }
    }
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("helmwatch")
        .join("config.toml")
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an
    /// error.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply command-line endpoint overrides.
    pub fn apply_overrides(&mut self, endpoints: &EndpointArgs) {
        if let Some(url) = &endpoints.base_url {
            self.backend.base_url = url.clone();
        }
        if let Some(url) = &endpoints.push_url {
            self.push.url = Some(url.clone());
        }
    }

    /// Validate the configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.backend.validate());
        errors.extend(self.push.validate());
        errors.extend(self.monitor.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Build the monitor configuration.
    pub fn to_monitor_config(&self) -> MonitorConfig {
        let poll = PollOptions::with_interval(Duration::from_secs(self.monitor.poll_interval_secs))
            .timeout(self.request_timeout());

        let resubscribe = ReconnectOptions {
            initial_delay: Duration::from_secs(self.monitor.resubscribe_initial_secs),
            max_delay: Duration::from_secs(self.monitor.resubscribe_max_secs),
            ..ReconnectOptions::default()
        };

        MonitorConfig::default()
            .poll(poll)
            .poll_failure_threshold(self.monitor.poll_failure_threshold)
            .countdown_secs(self.monitor.countdown_secs)
            .resubscribe(resubscribe)
            .sos_retry(self.sos_retry())
    }

    /// Retry policy for the SOS call.
    pub fn sos_retry(&self) -> RetryConfig {
        let initial = Duration::from_millis(self.sos.retry_initial_delay_ms);
        let mut retry = RetryConfig::for_sos()
            .max_retries(self.sos.max_retries)
            .initial_delay(initial);
        retry.max_delay = retry.max_delay.max(initial);
        retry
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.push.connect_timeout_secs)
    }
}

impl BackendConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            errors.push(ValidationError {
                field: "backend.base_url".to_string(),
                message: format!("'{}' must start with http:// or https://", self.base_url),
            });
        }
        if self.request_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "backend.request_timeout_secs".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        errors
    }
}

impl PushConfig {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Some(url) = &self.url
            && !url.starts_with("ws://")
            && !url.starts_with("wss://")
        {
            errors.push(ValidationError {
                field: "push.url".to_string(),
                message: format!("'{}' must start with ws:// or wss://", url),
            });
        }
        if self.connect_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "push.connect_timeout_secs".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        errors
    }
}

impl MonitorSection {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut positive = |field: &str, value: u64| {
            if value == 0 {
                errors.push(ValidationError {
                    field: format!("monitor.{}", field),
                    message: "must be > 0".to_string(),
                });
            }
        };

        positive("poll_interval_secs", self.poll_interval_secs);
        positive("poll_failure_threshold", u64::from(self.poll_failure_threshold));
        positive("resubscribe_initial_secs", self.resubscribe_initial_secs);
        positive("resubscribe_max_secs", self.resubscribe_max_secs);

        if !(1..=MAX_COUNTDOWN_SECS).contains(&self.countdown_secs) {
            errors.push(ValidationError {
                field: "monitor.countdown_secs".to_string(),
                message: format!(
                    "must be between 1 and {} seconds, got {}",
                    MAX_COUNTDOWN_SECS, self.countdown_secs
                ),
            });
        }
        if self.resubscribe_max_secs < self.resubscribe_initial_secs {
            errors.push(ValidationError {
                field: "monitor.resubscribe_max_secs".to_string(),
                message: "must not be less than resubscribe_initial_secs".to_string(),
            });
        }

        errors
    }
}
