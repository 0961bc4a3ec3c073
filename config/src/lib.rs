//! Configuration for Pacer.
//!
//! Read from `~/.pacer/config.toml`. Every section is optional; a missing file
//! is not an error.
//!
//! ```toml
//! [throttle]
//! wait_ms = 250
//! leading = true
//! trailing = true
//!
//! [queue]
//! concurrency = 4
//! autostart = true
//! task_timeout_ms = 5000
//!
//! [log]
//! filter = "${PACER_LOG_FILTER}"
//! ```

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use toml::de::Error as TomlError;

use pacer_types::{Concurrency, OptionsError, QueueOptions, ThrottleOptions};

// Default value function for serde (bool::default() is false, so only true needs a fn)
const fn default_true() -> bool {
    true
}

pub const DEFAULT_WAIT_MS: u64 = 250;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PacerConfig {
    pub throttle: Option<ThrottleConfig>,
    pub queue: Option<QueueConfig>,
    pub log: Option<LogConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: TomlError,
    },
    #[error("invalid [{section}] settings: {source}")]
    Invalid {
        section: &'static str,
        source: OptionsError,
    },
}

impl ConfigError {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => {
                Some(path.as_path())
            }
            ConfigError::Invalid { .. } => None,
        }
    }
}

/// Throttle window and edges.
///
/// ```toml
/// [throttle]
/// wait_ms = 250
/// leading = true
/// trailing = false
/// ```
#[derive(Debug, Deserialize)]
pub struct ThrottleConfig {
    /// Window length in milliseconds. Default: 250. Must be non-zero.
    pub wait_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub leading: bool,
    #[serde(default = "default_true")]
    pub trailing: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            wait_ms: None,
            leading: true,
            trailing: true,
        }
    }
}

/// Queue limits.
#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    /// Maximum tasks in flight. Default: 4. Must be at least 1.
    pub concurrency: Option<usize>,
    /// Start scheduling as soon as the queue is built. Default: true.
    #[serde(default = "default_true")]
    pub autostart: bool,
    /// Per-task timeout in milliseconds. Unset means no timeout.
    pub task_timeout_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            autostart: true,
            task_timeout_ms: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"pacer_queue=debug"`.
    /// Supports `${ENV_VAR}` expansion. `RUST_LOG` takes precedence.
    pub filter: Option<String>,
}

pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &after[..end];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl PacerConfig {
    /// Load from the default location. `Ok(None)` when there is no config file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match Self::parse(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "config loaded");
                Ok(config)
            }
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, TomlError> {
        toml::from_str(content)
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Validated throttle options, falling back to defaults for unset fields.
    pub fn throttle_options(&self) -> Result<ThrottleOptions, ConfigError> {
        let defaults = ThrottleConfig::default();
        let section = self.throttle.as_ref().unwrap_or(&defaults);
        let wait = Duration::from_millis(section.wait_ms.unwrap_or(DEFAULT_WAIT_MS));

        let options = ThrottleOptions::new(wait).map_err(|source| ConfigError::Invalid {
            section: "throttle",
            source,
        })?;
        Ok(options.leading(section.leading).trailing(section.trailing))
    }

    /// Validated queue options, falling back to defaults for unset fields.
    pub fn queue_options(&self) -> Result<QueueOptions, ConfigError> {
        let invalid = |source| ConfigError::Invalid {
            section: "queue",
            source,
        };
        let defaults = QueueConfig::default();
        let section = self.queue.as_ref().unwrap_or(&defaults);

        let concurrency =
            Concurrency::new(section.concurrency.unwrap_or(DEFAULT_CONCURRENCY)).map_err(invalid)?;
        let mut options = QueueOptions::new(concurrency).autostart(section.autostart);
        if let Some(ms) = section.task_timeout_ms {
            options = options
                .task_timeout(Duration::from_millis(ms))
                .map_err(invalid)?;
        }
        Ok(options)
    }

    /// Log filter directive after env expansion. `None` when unset or blank.
    #[must_use]
    pub fn log_filter(&self) -> Option<String> {
        let raw = self.log.as_ref()?.filter.as_deref()?;
        let expanded = expand_env_vars(raw);
        let trimmed = expanded.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pacer").join("config.toml"))
}
