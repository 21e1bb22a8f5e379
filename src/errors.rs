//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all supervision failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration failure, including a missing launch command.
    Config(String),
    /// The operating system failed to create the child process.
    Spawn(String),
    /// A store write failed before any OS-level action was taken.
    Persistence(String),
    /// A supposedly-live process could not be addressed during stop.
    ProcessLookup(String),
    /// The instance path could not be normalized into a store key.
    Path(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Persistence(msg) => write!(f, "persistence: {msg}"),
            Self::ProcessLookup(msg) => write!(f, "process lookup: {msg}"),
            Self::Path(msg) => write!(f, "path: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Failure reported by a [`RecordStore`](crate::persistence::RecordStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No value is stored under the key.
    NotFound(String),
    /// The backend failed to read or write.
    Backend(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "key not found: {key}"),
            Self::Backend(msg) => write!(f, "store backend: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}
