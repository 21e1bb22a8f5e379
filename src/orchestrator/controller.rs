//! Instance controller: start, stop, and status for supervised processes.
//!
//! Every transition is written to the record store as a complete snapshot.
//! The store is a cache of OS reality: writes that follow an OS-level
//! action are best-effort, and `get_state` repairs records whose process
//! has died while nobody was watching.
//!
//! Start and stop hold a per-key lock for their whole load-decide-act
//! sequence, and each watch task takes the same lock for its terminal
//! write. Locks are per key only; unrelated instances never wait on each
//! other.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::ControllerConfig;
use crate::models::instance::{InstanceRecord, InstanceState};
use crate::persistence::instance_repo::{instance_key, InstanceRepo};
use crate::persistence::RecordStore;
use crate::{AppError, Result};

use super::liveness::{OsSignaller, Signaller};
use super::spawner::{resolve_command, spawn_instance, SpawnedInstance};
use super::watcher::{watch_and_reap, ExitOutcome};

/// Step used while waiting for a killed process to be reaped.
const REAP_POLL_STEP: Duration = Duration::from_millis(20);

/// Bookkeeping for one live watch task.
struct WatchEntry {
    pid: u32,
    stop_requested: Arc<AtomicBool>,
    done: CancellationToken,
    handle: JoinHandle<()>,
}

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Per-key async locks.
///
/// An entry exists only while some task holds or waits for it, so the map
/// stays as small as the set of keys currently in use.
#[derive(Default)]
struct KeyLocks {
    map: Arc<LockMap>,
}

impl KeyLocks {
    async fn lock(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(key.to_owned()).or_default())
        };
        KeyGuard {
            held: Some(lock.lock_owned().await),
            key: key.to_owned(),
            map: Arc::clone(&self.map),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Held key lock; releases the lock and prunes its map entry on drop.
struct KeyGuard {
    held: Option<OwnedMutexGuard<()>>,
    key: String,
    map: Arc<LockMap>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.held.take());
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map's own reference left: nobody holds or awaits the key.
        if map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.key);
        }
    }
}

struct Inner {
    config: ControllerConfig,
    repo: InstanceRepo,
    signaller: Arc<dyn Signaller>,
    key_locks: KeyLocks,
    watchers: Mutex<HashMap<String, WatchEntry>>,
    cancel: CancellationToken,
}

/// Supervises instances keyed by their normalized path.
///
/// Cloning is cheap; clones share locks, watch tasks, and the store.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl Controller {
    /// Create a controller over `store` that signals real OS processes.
    #[must_use]
    pub fn new(config: ControllerConfig, store: Arc<dyn RecordStore>) -> Self {
        Self::with_signaller(config, store, Arc::new(OsSignaller))
    }

    /// Create a controller that probes and signals processes through `signaller`.
    #[must_use]
    pub fn with_signaller(
        config: ControllerConfig,
        store: Arc<dyn RecordStore>,
        signaller: Arc<dyn Signaller>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                repo: InstanceRepo::new(store),
                signaller,
                key_locks: KeyLocks::default(),
                watchers: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Normalized instance path and its store key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Path` if the path cannot be normalized.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<(PathBuf, String)> {
        let dir = self.inner.config.path_mode.normalize(path)?;
        let key = instance_key(&dir);
        Ok((dir, key))
    }

    /// Start the instance at `path`, returning once the process is spawned.
    ///
    /// An empty `command` falls back to the configured default. Starting an
    /// instance whose recorded process is still alive does nothing.
    ///
    /// # Errors
    ///
    /// - `AppError::Path` if the path cannot be normalized.
    /// - `AppError::Config` if no launch command is available.
    /// - `AppError::Persistence` if the `starting` record cannot be written.
    /// - `AppError::Spawn` if the process cannot be launched; the record is
    ///   then `failed`. Also returned, without touching the record, once
    ///   [`shutdown`](Self::shutdown) has been called.
    pub async fn start(&self, path: impl AsRef<Path>, command: &[String]) -> Result<()> {
        let (dir, key) = self.resolve(path)?;
        let span = info_span!("start_instance", key = %key);
        self.start_resolved(dir, key, command).instrument(span).await
    }

    async fn start_resolved(&self, dir: PathBuf, key: String, command: &[String]) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(AppError::Spawn("controller is shut down".into()));
        }

        let _held = self.inner.key_locks.lock(&key).await;
        let repo = &self.inner.repo;

        let current = repo.load(&key).await;
        if current.has_pid() && self.inner.signaller.is_alive(current.pid) {
            info!(pid = current.pid, "instance already running");
            return Ok(());
        }

        let command = resolve_command(command, &self.inner.config.default_command)?;

        repo.save(&key, InstanceRecord::starting()).await?;

        let spawned = match spawn_instance(&dir, command) {
            Ok(spawned) => spawned,
            Err(err) => {
                warn!(%err, "instance failed to spawn");
                self.inner
                    .persist_best_effort(&key, InstanceRecord::failed(err.to_string()))
                    .await;
                return Err(err);
            }
        };

        let pid = spawned.pid;
        self.inner
            .persist_best_effort(&key, InstanceRecord::running(pid))
            .await;
        self.watch(key, spawned);

        info!(pid, "instance started");
        Ok(())
    }

    /// Stop the instance at `path`.
    ///
    /// Sends a graceful termination request, polls liveness until the grace
    /// period elapses, then kills the process. The record ends `stopped`
    /// whether or not the kill was needed. Blocks for at most the grace
    /// period plus one poll interval.
    ///
    /// # Errors
    ///
    /// - `AppError::Path` if the path cannot be normalized.
    /// - `AppError::ProcessLookup` if the recorded process cannot be
    ///   signalled; the record is then `failed`. This covers a live pid
    ///   owned by another user: the termination request is refused, and
    ///   Stop fails instead of escalating to a kill.
    pub async fn stop(&self, path: impl AsRef<Path>) -> Result<()> {
        let (_, key) = self.resolve(path)?;
        let span = info_span!("stop_instance", key = %key);
        self.stop_resolved(key).instrument(span).await
    }

    async fn stop_resolved(&self, key: String) -> Result<()> {
        let _held = self.inner.key_locks.lock(&key).await;
        let inner = &self.inner;

        let current = inner.repo.load(&key).await;
        if !current.has_pid() || !inner.signaller.is_alive(current.pid) {
            debug!(state = %current.state, "instance not running");
            inner.persist_best_effort(&key, current.into_stopped()).await;
            return Ok(());
        }

        let pid = current.pid;
        info!(pid, state = %InstanceState::Stopping, "requesting graceful termination");

        if let Err(err) = inner.signaller.terminate(pid) {
            warn!(pid, %err, "cannot signal instance process");
            inner
                .persist_best_effort(&key, current.into_failed(err.to_string()))
                .await;
            return Err(err);
        }
        // The watch task reads this under the key lock, after Stop returns.
        inner.mark_stop_requested(&key, pid);

        let grace = inner.config.grace_period;
        let poll = inner.config.poll_interval;
        let deadline = Instant::now() + grace;
        loop {
            if !inner.signaller.is_alive(pid) {
                info!(pid, "instance stopped gracefully");
                inner.persist_best_effort(&key, current.into_stopped()).await;
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }

        warn!(pid, ?grace, "grace period elapsed, killing instance process");
        if let Err(err) = inner.signaller.kill(pid) {
            warn!(pid, %err, "failed to kill instance process");
        }
        inner.wait_until_gone(pid, poll).await;

        inner.persist_best_effort(&key, current.into_stopped()).await;
        Ok(())
    }

    /// Current record for the instance at `path`.
    ///
    /// A never-started instance reports `unknown`. A record whose process
    /// has died unobserved (for example across a supervisor restart) is
    /// rewritten as `stopped` and the corrected record is returned.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Path` if the path cannot be normalized.
    pub async fn get_state(&self, path: impl AsRef<Path>) -> Result<InstanceRecord> {
        let (_, key) = self.resolve(path)?;
        let span = info_span!("get_state", key = %key);
        Ok(self.inner.get_state_resolved(&key).instrument(span).await)
    }

    /// Wait until the watched process for `path` exits, then return its record.
    ///
    /// Returns immediately when this controller is not watching the instance,
    /// and as soon as the controller is shut down.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Path` if the path cannot be normalized.
    pub async fn wait_for_exit(&self, path: impl AsRef<Path>) -> Result<InstanceRecord> {
        let (_, key) = self.resolve(path)?;
        let done = self
            .inner
            .watchers()
            .get(&key)
            .map(|entry| entry.done.clone());
        if let Some(done) = done {
            tokio::select! {
                () = done.cancelled() => {}
                () = self.inner.cancel.cancelled() => {
                    debug!(key = %key, "controller shut down while waiting for exit");
                }
            }
        }
        Ok(self.inner.get_state_resolved(&key).await)
    }

    /// Stop every watch task without touching the processes.
    ///
    /// Records stay `running`; a later `get_state` reconciles them once the
    /// processes exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self
            .inner
            .watchers()
            .drain()
            .map(|(_, entry)| entry.handle)
            .collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(%err, "watch task ended abnormally");
            }
        }
        info!("controller shut down");
    }

    fn watch(&self, key: String, spawned: SpawnedInstance) {
        let pid = spawned.pid;
        let stop_requested = Arc::new(AtomicBool::new(false));
        let done = CancellationToken::new();

        let inner = Arc::clone(&self.inner);
        let exit_key = key.clone();
        let exit_stop = Arc::clone(&stop_requested);
        let exit_done = done.clone();
        let span = info_span!("watch_instance", key = %key, pid);
        let handle = watch_and_reap(spawned, self.inner.cancel.child_token(), move |outcome| {
            async move {
                inner
                    .record_exit(&exit_key, pid, &exit_stop, outcome)
                    .await;
                exit_done.cancel();
            }
            .instrument(span)
        });

        let previous = self.inner.watchers().insert(
            key,
            WatchEntry {
                pid,
                stop_requested,
                done,
                handle,
            },
        );
        if let Some(previous) = previous {
            debug!(pid = previous.pid, "replaced watch entry of an earlier process");
        }
    }
}

impl Inner {
    fn watchers(&self) -> std::sync::MutexGuard<'_, HashMap<String, WatchEntry>> {
        self.watchers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_stop_requested(&self, key: &str, pid: u32) {
        if let Some(entry) = self.watchers().get(key).filter(|entry| entry.pid == pid) {
            entry.stop_requested.store(true, Ordering::SeqCst);
        }
    }

    async fn persist_best_effort(&self, key: &str, record: InstanceRecord) {
        let state = record.state;
        if let Err(err) = self.repo.save(key, record).await {
            warn!(key, %state, %err, "failed to persist instance record");
        }
    }

    async fn get_state_resolved(&self, key: &str) -> InstanceRecord {
        let current = self.repo.load(key).await;
        if !current.has_pid() || self.signaller.is_alive(current.pid) {
            return current;
        }

        // Re-check under the key lock so a concurrent start is not clobbered.
        let _held = self.key_locks.lock(key).await;
        let current = self.repo.load(key).await;
        if !current.has_pid() || self.signaller.is_alive(current.pid) {
            return current;
        }

        info!(pid = current.pid, "recorded process is gone, marking stopped");
        let healed = current.into_stopped();
        match self.repo.save(key, healed.clone()).await {
            Ok(saved) => saved,
            Err(err) => {
                warn!(key, %err, "failed to persist reconciled record");
                healed
            }
        }
    }

    async fn record_exit(
        &self,
        key: &str,
        pid: u32,
        stop_requested: &AtomicBool,
        outcome: ExitOutcome,
    ) {
        {
            let _held = self.key_locks.lock(key).await;
            let stop_requested = stop_requested.load(Ordering::SeqCst);
            let current = self.repo.load(key).await;

            let superseded = current.state == InstanceState::Starting
                || (current.has_pid() && current.pid != pid);
            if superseded {
                debug!(state = %current.state, current_pid = current.pid, "record superseded, skipping exit write");
            } else if stop_requested || outcome.is_clean() {
                self.persist_best_effort(key, current.into_stopped()).await;
            } else {
                self.persist_best_effort(key, current.into_failed(outcome.describe()))
                    .await;
            }
        }

        let mut watchers = self.watchers();
        if watchers.get(key).is_some_and(|entry| entry.pid == pid) {
            watchers.remove(key);
        }
    }

    /// Wait up to `limit` for `pid` to disappear after a kill.
    async fn wait_until_gone(&self, pid: u32, limit: Duration) {
        let deadline = Instant::now() + limit;
        while self.signaller.is_alive(pid) {
            let now = Instant::now();
            if now >= deadline {
                warn!(pid, "instance process still present after kill");
                return;
            }
            tokio::time::sleep(REAP_POLL_STEP.min(deadline - now)).await;
        }
    }
}
