//! Controller configuration, path normalization, and TOML config loading.

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Default time `stop` waits for a graceful exit before escalating.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Default interval between liveness probes while stopping.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How an instance path is turned into its store key.
///
/// The mode is fixed for the lifetime of a controller, so one physical
/// instance is always reachable under exactly one key.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PathMode {
    /// Resolve against the current directory and lexically clean the result.
    #[default]
    Absolute,
    /// Use the caller-supplied path verbatim.
    AsGiven,
}

impl PathMode {
    /// Normalize an instance path according to this mode.
    ///
    /// `Absolute` does not touch the file system beyond reading the current
    /// directory, so paths that do not exist yet still normalize.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Path` if the path is empty or the current
    /// directory cannot be determined.
    pub fn normalize(self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(AppError::Path("instance path must not be empty".into()));
        }

        match self {
            Self::AsGiven => Ok(path.to_path_buf()),
            Self::Absolute => {
                let joined = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    env::current_dir()
                        .map_err(|err| {
                            AppError::Path(format!("cannot read current directory: {err}"))
                        })?
                        .join(path)
                };
                Ok(clean_path(&joined))
            }
        }
    }
}

/// Lexically remove `.` and `..` components without following symlinks.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match cleaned.components().next_back() {
                Some(Component::Normal(_)) => {
                    cleaned.pop();
                }
                // `..` at the root stays at the root.
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => cleaned.push(component),
            },
            other => cleaned.push(other),
        }
    }
    cleaned
}

/// Runtime options for a [`Controller`](crate::orchestrator::controller::Controller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Maximum time `stop` waits for a graceful exit.
    pub grace_period: Duration,
    /// Interval between liveness probes while stopping.
    pub poll_interval: Duration,
    /// Command used when `start` is called without one.
    pub default_command: Vec<String>,
    /// Key normalization policy.
    pub path_mode: PathMode,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_command: Vec::new(),
            path_mode: PathMode::Absolute,
        }
    }
}

impl ControllerConfig {
    /// Set the graceful stop window.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Set the liveness poll interval used while stopping.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the fallback launch command.
    #[must_use]
    pub fn with_default_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set the path normalization mode.
    #[must_use]
    pub fn with_path_mode(mut self, path_mode: PathMode) -> Self {
        self.path_mode = path_mode;
        self
    }
}

fn default_grace_period_seconds() -> u64 {
    DEFAULT_GRACE_PERIOD.as_secs()
}

fn default_poll_interval_millis() -> u64 {
    200
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` database file holding instance records.
    pub db_path: PathBuf,
    /// Graceful stop window in seconds.
    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u64,
    /// Liveness poll interval in milliseconds.
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    /// Command used when none is given on the command line.
    #[serde(default)]
    pub default_command: Vec<String>,
    /// Key normalization policy; fixed per deployment.
    #[serde(default)]
    pub path_mode: PathMode,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Controller options derived from this file.
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::default()
            .with_grace_period(Duration::from_secs(self.grace_period_seconds))
            .with_poll_interval(Duration::from_millis(self.poll_interval_millis))
            .with_default_command(self.default_command.iter().cloned())
            .with_path_mode(self.path_mode)
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(AppError::Config("db_path must not be empty".into()));
        }

        if self.poll_interval_millis == 0 {
            return Err(AppError::Config(
                "poll_interval_millis must be greater than zero".into(),
            ));
        }

        if self.default_command.iter().any(String::is_empty) {
            return Err(AppError::Config(
                "default_command must not contain empty arguments".into(),
            ));
        }

        Ok(())
    }
}
