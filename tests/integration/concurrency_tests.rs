//! Integration tests for concurrent operations across and within instances.

use std::fs;
use std::time::Duration;

use instance_control::models::instance::InstanceState;
use instance_control::orchestrator::liveness::is_alive;

use super::test_helpers::{memory_controller, sh, wait_for_state};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn short_instance_exit_is_seen_while_long_one_runs() {
    let (controller, _) = memory_controller();
    let long = tempfile::tempdir().expect("tempdir");
    let short = tempfile::tempdir().expect("tempdir");

    controller
        .start(long.path(), &sh("exec sleep 30"))
        .await
        .expect("start long");
    controller
        .start(short.path(), &sh("sleep 0.2"))
        .await
        .expect("start short");

    let record = tokio::time::timeout(
        Duration::from_secs(5),
        controller.wait_for_exit(short.path()),
    )
    .await
    .expect("short exit must not wait for the long instance")
    .expect("state");
    assert_eq!(record.state, InstanceState::Stopped);

    let long_record = controller.get_state(long.path()).await.expect("state");
    assert_eq!(long_record.state, InstanceState::Running);
    assert!(is_alive(long_record.pid));

    controller.stop(long.path()).await.expect("stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_launch_one_process() {
    let (controller, _) = memory_controller();
    let temp = tempfile::tempdir().expect("tempdir");
    let command = sh("echo launched >> launches.txt; exec sleep 30");

    let (a, b, c) = tokio::join!(
        controller.start(temp.path(), &command),
        controller.start(temp.path(), &command),
        controller.start(temp.path(), &command),
    );
    a.expect("start a");
    b.expect("start b");
    c.expect("start c");

    tokio::time::sleep(Duration::from_millis(300)).await;
    let launches = fs::read_to_string(temp.path().join("launches.txt")).expect("marker");
    assert_eq!(launches.lines().count(), 1);

    let record = controller.get_state(temp.path()).await.expect("state");
    assert_eq!(record.state, InstanceState::Running);
    assert!(is_alive(record.pid));

    controller.stop(temp.path()).await.expect("stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_start_and_stop_leave_consistent_record() {
    let (controller, _) = memory_controller();
    let temp = tempfile::tempdir().expect("tempdir");
    let start_command = sh("exec sleep 30");

    let starter = controller.clone();
    let stopper = controller.clone();
    let start_path = temp.path().to_path_buf();
    let stop_path = temp.path().to_path_buf();
    let start = tokio::spawn(async move { starter.start(&start_path, &start_command).await });
    let stop = tokio::spawn(async move { stopper.stop(&stop_path).await });

    start.await.expect("start task").expect("start");
    stop.await.expect("stop task").expect("stop");

    let record = controller.get_state(temp.path()).await.expect("state");
    match record.state {
        InstanceState::Running => assert!(is_alive(record.pid)),
        InstanceState::Stopped => assert_eq!(record.pid, 0),
        other => panic!("unexpected state {other}"),
    }

    controller.stop(temp.path()).await.expect("cleanup stop");
    let record = wait_for_state(
        &controller,
        temp.path(),
        InstanceState::Stopped,
        Duration::from_secs(2),
    )
    .await;
    assert_eq!(record.pid, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_instances_stop_in_parallel() {
    let (controller, _) = memory_controller();
    let first = tempfile::tempdir().expect("tempdir");
    let second = tempfile::tempdir().expect("tempdir");
    let stubborn = sh("trap '' TERM; exec sleep 30");

    controller
        .start(first.path(), &stubborn)
        .await
        .expect("start first");
    controller
        .start(second.path(), &stubborn)
        .await
        .expect("start second");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let grace = controller.config().grace_period;
    let started = tokio::time::Instant::now();
    let (a, b) = tokio::join!(controller.stop(first.path()), controller.stop(second.path()));
    a.expect("stop first");
    b.expect("stop second");

    assert!(
        started.elapsed() < grace * 2,
        "stops of different keys must not serialize"
    );
}
