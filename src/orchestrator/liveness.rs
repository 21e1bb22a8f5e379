//! Process liveness probing and signal delivery.
//!
//! The probe sends signal 0, which checks for existence without affecting
//! the process. A pid recycled by the OS after the original process died
//! is reported as alive; callers accept that approximation.

use crate::{AppError, Result};

/// Whether a process with `pid` currently exists.
///
/// `EPERM` counts as alive: the process exists but belongs to another user.
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;

        let Some(nix_pid) = to_nix_pid(pid) else {
            return false;
        };
        match kill(nix_pid, None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Ask the process to terminate (SIGTERM).
///
/// A process that is already gone is not an error.
///
/// # Errors
///
/// Returns `AppError::ProcessLookup` if `pid` cannot address a process or
/// the signal is refused.
pub fn send_terminate(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        send(pid, nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    {
        Err(AppError::ProcessLookup(format!(
            "cannot signal pid {pid} on this platform"
        )))
    }
}

/// Kill the process unconditionally (SIGKILL).
///
/// # Errors
///
/// Returns `AppError::ProcessLookup` if `pid` cannot address a process or
/// the signal is refused.
pub fn send_kill(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        send(pid, nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(not(unix))]
    {
        Err(AppError::ProcessLookup(format!(
            "cannot signal pid {pid} on this platform"
        )))
    }
}

/// Process probing and signalling as seen by the controller.
///
/// The controller calls these while holding a per-key lock, so
/// implementations must not block.
pub trait Signaller: Send + Sync {
    /// Whether a process with `pid` currently exists.
    fn is_alive(&self, pid: u32) -> bool;

    /// Ask the process to terminate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProcessLookup` if the process cannot be signalled.
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Kill the process unconditionally.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProcessLookup` if the process cannot be signalled.
    fn kill(&self, pid: u32) -> Result<()>;
}

/// [`Signaller`] that talks to the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSignaller;

impl Signaller for OsSignaller {
    fn is_alive(&self, pid: u32) -> bool {
        is_alive(pid)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        send_terminate(pid)
    }

    fn kill(&self, pid: u32) -> Result<()> {
        send_kill(pid)
    }
}

#[cfg(unix)]
fn send(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;

    let nix_pid = to_nix_pid(pid)
        .ok_or_else(|| AppError::ProcessLookup(format!("invalid pid {pid}")))?;
    match kill(nix_pid, signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(AppError::ProcessLookup(format!(
            "failed to send {signal} to pid {pid}: {err}"
        ))),
    }
}

/// Zero and values beyond `i32::MAX` never name a single process.
#[cfg(unix)]
fn to_nix_pid(pid: u32) -> Option<nix::unistd::Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(nix::unistd::Pid::from_raw)
}
