//! Integration tests for graceful stop and grace-period escalation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use instance_control::models::instance::InstanceState;
use instance_control::orchestrator::liveness::{is_alive, send_kill, OsSignaller, Signaller};
use instance_control::persistence::{InstanceRepo, RecordStore};
use instance_control::{AppError, Controller, MemoryStore, Result};

use super::test_helpers::{
    memory_controller, sh, test_config, wait_until_dead, TEST_GRACE, TEST_POLL,
};

/// Scheduling slack allowed on top of the documented worst case.
const SLACK: Duration = Duration::from_millis(400);

#[tokio::test]
async fn stop_on_never_started_instance_succeeds() {
    let (controller, _) = memory_controller();
    let temp = tempfile::tempdir().expect("tempdir");

    controller.stop(temp.path()).await.expect("stop");
    let record = controller.get_state(temp.path()).await.expect("state");
    assert_eq!(record.state, InstanceState::Stopped);
    assert_eq!(record.pid, 0);
}

#[tokio::test]
async fn repeated_stop_stays_stopped() {
    let (controller, _) = memory_controller();
    let temp = tempfile::tempdir().expect("tempdir");

    controller
        .start(temp.path(), &sh("sleep 5"))
        .await
        .expect("start");
    for _ in 0..3 {
        controller.stop(temp.path()).await.expect("stop");
        let record = controller.get_state(temp.path()).await.expect("state");
        assert_eq!(record.state, InstanceState::Stopped);
        assert_eq!(record.pid, 0);
    }
}

#[tokio::test]
async fn cooperative_process_stops_within_grace() {
    let (controller, _) = memory_controller();
    let temp = tempfile::tempdir().expect("tempdir");

    controller
        .start(temp.path(), &sh("exec sleep 30"))
        .await
        .expect("start");
    let pid = controller.get_state(temp.path()).await.expect("state").pid;

    let started = Instant::now();
    controller.stop(temp.path()).await.expect("stop");
    assert!(started.elapsed() < TEST_GRACE, "SIGTERM should be enough");
    assert!(!is_alive(pid));
}

#[tokio::test]
async fn requested_stop_is_not_recorded_as_failure() {
    let (controller, _) = memory_controller();
    let temp = tempfile::tempdir().expect("tempdir");

    controller
        .start(temp.path(), &sh("exec sleep 30"))
        .await
        .expect("start");
    controller.stop(temp.path()).await.expect("stop");

    // Let the watch task record the signal exit.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let record = controller.get_state(temp.path()).await.expect("state");
    assert_eq!(record.state, InstanceState::Stopped);
    assert!(record.last_error.is_none());
}

#[tokio::test]
async fn unresponsive_process_is_killed_after_grace() {
    let (controller, _) = memory_controller();
    let temp = tempfile::tempdir().expect("tempdir");

    controller
        .start(temp.path(), &sh("trap '' TERM; exec sleep 30"))
        .await
        .expect("start");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let pid = controller.get_state(temp.path()).await.expect("state").pid;
    assert!(is_alive(pid));

    let started = Instant::now();
    controller.stop(temp.path()).await.expect("stop reports success");
    let elapsed = started.elapsed();

    assert!(elapsed >= TEST_GRACE, "stopped too early: {elapsed:?}");
    assert!(
        elapsed <= TEST_GRACE + TEST_POLL + SLACK,
        "stopped too late: {elapsed:?}"
    );
    assert!(wait_until_dead(pid, Duration::from_secs(1)).await);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let record = controller.get_state(temp.path()).await.expect("state");
    assert_eq!(record.state, InstanceState::Stopped);
    assert_eq!(record.pid, 0);
    assert!(record.last_error.is_none());
}

#[tokio::test]
async fn stop_of_failed_instance_records_stopped() {
    let (controller, _) = memory_controller();
    let temp = tempfile::tempdir().expect("tempdir");

    controller
        .start(temp.path(), &sh("exit 2"))
        .await
        .expect("start");
    let failed = controller.wait_for_exit(temp.path()).await.expect("wait");
    assert_eq!(failed.state, InstanceState::Failed);

    controller.stop(temp.path()).await.expect("stop");
    let record = controller.get_state(temp.path()).await.expect("state");
    assert_eq!(record.state, InstanceState::Stopped);
    assert!(record.last_error.is_none());
}

/// Probes real processes but has every termination request refused, as the
/// OS does for a pid owned by another user.
struct RefusingSignaller;

impl Signaller for RefusingSignaller {
    fn is_alive(&self, pid: u32) -> bool {
        OsSignaller.is_alive(pid)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        Err(AppError::ProcessLookup(format!(
            "failed to send SIGTERM to pid {pid}: EPERM: Operation not permitted"
        )))
    }

    fn kill(&self, pid: u32) -> Result<()> {
        OsSignaller.kill(pid)
    }
}

#[tokio::test]
async fn refused_termination_fails_stop_and_records_failure() {
    let store = Arc::new(MemoryStore::new());
    let controller = Controller::with_signaller(
        test_config(),
        Arc::clone(&store) as Arc<dyn RecordStore>,
        Arc::new(RefusingSignaller),
    );
    let temp = tempfile::tempdir().expect("tempdir");

    controller
        .start(temp.path(), &sh("exec sleep 30"))
        .await
        .expect("start");
    let pid = controller.get_state(temp.path()).await.expect("state").pid;

    let err = controller.stop(temp.path()).await.unwrap_err();
    assert!(matches!(err, AppError::ProcessLookup(_)), "got {err:?}");
    assert!(is_alive(pid), "a refused request must not escalate to a kill");

    let (_, key) = controller.resolve(temp.path()).expect("resolve");
    let stored = InstanceRepo::new(Arc::clone(&store) as Arc<dyn RecordStore>)
        .load(&key)
        .await;
    assert_eq!(stored.state, InstanceState::Failed);
    assert_eq!(stored.pid, 0);
    assert!(stored
        .last_error
        .as_deref()
        .is_some_and(|msg| msg.contains("EPERM")));

    send_kill(pid).expect("cleanup kill");
    controller.wait_for_exit(temp.path()).await.expect("wait");
}
