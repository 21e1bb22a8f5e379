//! Instance record model and lifecycle helpers.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Never started, or the record could not be read.
    Unknown,
    /// A start is in progress; the process has not been spawned yet.
    Starting,
    /// The process was spawned and `pid` identifies it.
    Running,
    /// Graceful stop in progress. Never written to the store.
    Stopping,
    /// The process exited cleanly or was stopped.
    Stopped,
    /// Spawning failed, or the process exited with an error.
    Failed,
}

impl InstanceState {
    /// Lowercase name used in the persisted record.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Whether the state ends a run. Both terminal states accept a new start.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl Display for InstanceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(pid: &u32) -> bool {
    *pid == 0
}

/// Persisted snapshot of one supervised instance.
///
/// Every write replaces the whole record, so a reader never observes a
/// partially updated instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InstanceRecord {
    /// Current lifecycle state.
    pub state: InstanceState,
    /// OS process id; non-zero only while running.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub pid: u32,
    /// When the process entered `running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the instance entered a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    /// Time of the last write; refreshed on every save.
    pub updated_at: DateTime<Utc>,
    /// Failure description; present only in `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl InstanceRecord {
    fn with_state(state: InstanceState) -> Self {
        Self {
            state,
            pid: 0,
            started_at: None,
            stopped_at: None,
            updated_at: Utc::now(),
            last_error: None,
        }
    }

    /// Synthetic record for a key with nothing stored.
    #[must_use]
    pub fn unknown() -> Self {
        Self::with_state(InstanceState::Unknown)
    }

    /// Fresh record written before spawning; clears pid, timestamps and error.
    #[must_use]
    pub fn starting() -> Self {
        Self::with_state(InstanceState::Starting)
    }

    /// Record for a freshly spawned process.
    #[must_use]
    pub fn running(pid: u32) -> Self {
        Self {
            pid,
            started_at: Some(Utc::now()),
            ..Self::with_state(InstanceState::Running)
        }
    }

    /// Terminal `stopped` record for an instance that never ran.
    #[must_use]
    pub fn stopped() -> Self {
        Self {
            stopped_at: Some(Utc::now()),
            ..Self::with_state(InstanceState::Stopped)
        }
    }

    /// Terminal `failed` record for an instance that never ran.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stopped_at: Some(Utc::now()),
            last_error: Some(message.into()),
            ..Self::with_state(InstanceState::Failed)
        }
    }

    /// Transition into `stopped`, keeping `started_at` of the finished run.
    #[must_use]
    pub fn into_stopped(self) -> Self {
        Self {
            started_at: self.started_at,
            ..Self::stopped()
        }
    }

    /// Transition into `failed`, keeping `started_at` of the finished run.
    #[must_use]
    pub fn into_failed(self, message: impl Into<String>) -> Self {
        Self {
            started_at: self.started_at,
            ..Self::failed(message)
        }
    }

    /// Whether the record claims a live process.
    #[must_use]
    pub fn has_pid(&self) -> bool {
        self.pid != 0
    }
}
