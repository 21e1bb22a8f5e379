//! Instance process spawner.
//!
//! Launches the instance command with the instance path as its working
//! directory and its output appended to `logs/stdout.log` and
//! `logs/stderr.log` under that path. Log sinks are best-effort: when one
//! cannot be opened the stream goes to the null device instead.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{info, info_span, warn};

use crate::{AppError, Result};

/// Directory under the instance path that receives output logs.
pub const LOG_DIR: &str = "logs";

/// File receiving the instance's standard output.
pub const STDOUT_LOG: &str = "stdout.log";

/// File receiving the instance's standard error.
pub const STDERR_LOG: &str = "stderr.log";

/// Append-mode log files attached to a spawned instance.
///
/// Held for the lifetime of the process and released after it is reaped.
#[derive(Debug, Default)]
pub struct LogSinks {
    /// Standard output sink, if it could be opened.
    pub stdout: Option<File>,
    /// Standard error sink, if it could be opened.
    pub stderr: Option<File>,
}

impl LogSinks {
    /// Create the log directory and open both sinks, logging failures.
    #[must_use]
    pub fn open(working_dir: &Path) -> Self {
        let log_dir = working_dir.join(LOG_DIR);
        if let Err(err) = fs::create_dir_all(&log_dir) {
            warn!(dir = %log_dir.display(), %err, "failed to create log directory");
            return Self::default();
        }

        Self {
            stdout: open_append(&log_dir.join(STDOUT_LOG)),
            stderr: open_append(&log_dir.join(STDERR_LOG)),
        }
    }
}

fn open_append(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(err) => {
            warn!(file = %path.display(), %err, "failed to open log sink");
            None
        }
    }
}

fn stdio_for(sink: Option<&File>) -> Stdio {
    match sink.map(File::try_clone) {
        Some(Ok(file)) => Stdio::from(file),
        Some(Err(err)) => {
            warn!(%err, "failed to duplicate log sink");
            Stdio::null()
        }
        None => Stdio::null(),
    }
}

/// A freshly launched instance process.
#[derive(Debug)]
pub struct SpawnedInstance {
    /// OS process id.
    pub pid: u32,
    /// Handle used by the watch task to reap the process.
    pub child: Child,
    /// Output sinks kept open until the process is reaped.
    pub sinks: LogSinks,
}

/// Pick the command to launch: the explicit one, else the configured default.
///
/// # Errors
///
/// Returns `AppError::Config` if neither names a program.
pub fn resolve_command<'a>(explicit: &'a [String], default: &'a [String]) -> Result<&'a [String]> {
    let command = if explicit.is_empty() {
        default
    } else {
        explicit
    };

    match command.first() {
        Some(program) if !program.is_empty() => Ok(command),
        _ => Err(AppError::Config("launch command required".into())),
    }
}

/// Spawn `command` in `working_dir`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `AppError::Config` if `command` is empty, or `AppError::Spawn`
/// if the operating system fails to launch it.
pub fn spawn_instance(working_dir: &Path, command: &[String]) -> Result<SpawnedInstance> {
    let span = info_span!("spawn_instance", dir = %working_dir.display());
    let _guard = span.enter();

    let (program, args) = command
        .split_first()
        .ok_or_else(|| AppError::Config("launch command required".into()))?;

    let sinks = LogSinks::open(working_dir);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(stdio_for(sinks.stdout.as_ref()))
        .stderr(stdio_for(sinks.stderr.as_ref()))
        // The instance must outlive this supervisor; restarts reconcile it.
        .kill_on_drop(false);

    let child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn {program}: {err}")))?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::Spawn(format!("{program} exited before its pid was read")))?;

    info!(pid, program, "instance process spawned");

    Ok(SpawnedInstance { pid, child, sinks })
}
