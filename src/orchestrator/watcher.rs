//! Per-instance exit watcher.
//!
//! Every spawned instance gets its own task that waits on its own child
//! handle, so one instance's lifetime never delays another instance's exit
//! detection. When the process ends the task reports the outcome once and
//! then releases the log sinks.

use std::future::Future;
use std::process::ExitStatus;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::spawner::SpawnedInstance;

/// How a watched process ended.
#[derive(Debug)]
pub enum ExitOutcome {
    /// The process was reaped with this status.
    Exited(ExitStatus),
    /// Waiting on the process failed.
    WaitFailed(String),
}

impl ExitOutcome {
    /// Whether the process exited with status zero.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exited(status) if status.success())
    }

    /// Human-readable description used as `last_error`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Exited(status) => describe_status(*status),
            Self::WaitFailed(msg) => format!("wait error: {msg}"),
        }
    }
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("process exited with code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("process terminated by signal {signal}");
        }
    }

    "process terminated by signal".to_owned()
}

/// Spawn a background task that reaps `spawned` and hands its outcome to `on_exit`.
///
/// `on_exit` runs exactly once, after the process has been reaped. When
/// `cancel` fires first the task ends without calling it and the process is
/// left running.
#[must_use]
pub fn watch_and_reap<F, Fut>(
    spawned: SpawnedInstance,
    cancel: CancellationToken,
    on_exit: F,
) -> JoinHandle<()>
where
    F: FnOnce(ExitOutcome) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let SpawnedInstance {
            pid,
            mut child,
            sinks,
        } = spawned;

        tokio::select! {
            result = child.wait() => {
                let outcome = match result {
                    Ok(status) => ExitOutcome::Exited(status),
                    Err(err) => {
                        warn!(pid, %err, "error waiting for instance process");
                        ExitOutcome::WaitFailed(err.to_string())
                    }
                };
                info!(pid, outcome = %outcome.describe(), "instance process exited");
                on_exit(outcome).await;
            }
            () = cancel.cancelled() => {
                info!(pid, "watch cancelled, leaving instance process running");
            }
        }

        drop(sinks);
    })
}
