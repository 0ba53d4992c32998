//! Integration tests for replay, observer fan-out, side-channel
//! injection, and the retention sweep.

use std::time::Duration;

use agent_relay::models::event::StreamEvent;
use agent_relay::registry::ObserverHandle;

use super::test_helpers::{
    happy_stub, hanging_stub, harness, recv_until, request, test_config, wait_until_terminal,
};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn replay_is_a_prefix_of_the_final_buffer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = happy_stub(dir.path());
    let h = harness(test_config(stub.to_str().expect("utf8 path"), 600, 5)).await;

    h.registry
        .start_task(request("s-prefix", dir.path(), false))
        .await
        .expect("task starts");

    let (early, _) = h.registry.get_replay("s-prefix").await.expect("tracked");

    wait_until_terminal(&h.registry, "s-prefix", WAIT).await;
    let (fin, is_complete) = h.registry.get_replay("s-prefix").await.expect("tracked");

    assert!(is_complete);
    assert!(early.len() <= fin.len());
    assert_eq!(early[..], fin[..early.len()], "early replay must be a prefix");
}

#[tokio::test]
async fn replay_for_unknown_session_is_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = happy_stub(dir.path());
    let h = harness(test_config(stub.to_str().expect("utf8 path"), 600, 5)).await;

    assert!(h.registry.get_replay("s-nope").await.is_none());
    let (observer, _events) = ObserverHandle::channel();
    assert!(!h.registry.subscribe("s-nope", observer).await);
}

#[tokio::test]
async fn two_observers_both_receive_injected_events() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = hanging_stub(dir.path());
    let h = harness(test_config(stub.to_str().expect("utf8 path"), 600, 5)).await;

    h.registry
        .start_task(request("s-fan", dir.path(), false))
        .await
        .expect("task starts");

    let (obs_a, mut events_a) = ObserverHandle::channel();
    let (obs_b, mut events_b) = ObserverHandle::channel();
    assert!(h.registry.subscribe("s-fan", obs_a).await);
    assert!(h.registry.subscribe("s-fan", obs_b).await);

    let title = StreamEvent::SessionTitle {
        session_id: "s-fan".into(),
        title: "Fan Out".into(),
    };
    h.registry.broadcast_to_task("s-fan", title).await;

    for events in [&mut events_a, &mut events_b] {
        recv_until(events, WAIT, |e| {
            matches!(e, StreamEvent::SessionTitle { ref title, .. } if title == "Fan Out")
        })
        .await;
    }

    // Injected events never enter the replay buffer.
    let (buffer, _) = h.registry.get_replay("s-fan").await.expect("tracked");
    assert!(
        buffer
            .iter()
            .all(|e| !matches!(e, StreamEvent::SessionTitle { .. })),
        "side-channel events must not be buffered"
    );

    assert!(h.registry.cancel_task("s-fan").await);
}

#[tokio::test]
async fn late_observer_catches_up_without_duplicates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = hanging_stub(dir.path());
    let h = harness(test_config(stub.to_str().expect("utf8 path"), 600, 5)).await;

    h.registry
        .start_task(request("s-late", dir.path(), false))
        .await
        .expect("task starts");

    // Let the stream produce its initial events.
    let (probe, mut probe_events) = ObserverHandle::channel();
    let (probe_replay, _) = h
        .registry
        .subscribe_with_replay("s-late", probe)
        .await
        .expect("probe subscribes");
    if !probe_replay
        .iter()
        .any(|e| matches!(e, StreamEvent::TextDelta { .. }))
    {
        recv_until(&mut probe_events, WAIT, |e| {
            matches!(e, StreamEvent::TextDelta { .. })
        })
        .await;
    }

    // Late observer: replay snapshot plus live channel, one lock.
    let (late, mut late_events) = ObserverHandle::channel();
    let (replay, is_complete) = h
        .registry
        .subscribe_with_replay("s-late", late)
        .await
        .expect("late subscribes");
    assert!(!is_complete);
    assert!(
        replay
            .iter()
            .any(|e| matches!(e, StreamEvent::TextDelta { .. })),
        "late replay must contain prior events"
    );

    // Everything after the snapshot arrives exactly once: the cancelled
    // event is appended after subscription and must be the first (and
    // only) live delivery of its kind.
    assert!(h.registry.cancel_task("s-late").await);
    let live = recv_until(&mut late_events, WAIT, |e| {
        matches!(e, StreamEvent::Cancelled { .. })
    })
    .await;

    for replayed in &replay {
        assert!(
            !live.contains(replayed),
            "replayed event delivered twice: {replayed:?}"
        );
    }
}

#[tokio::test]
async fn unsubscribe_all_detaches_socket_without_cancelling_work() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = hanging_stub(dir.path());
    let h = harness(test_config(stub.to_str().expect("utf8 path"), 600, 5)).await;

    h.registry
        .start_task(request("s-detach", dir.path(), false))
        .await
        .expect("task starts");

    let (observer, _events) = ObserverHandle::channel();
    let observer_id = observer.id();
    assert!(h.registry.subscribe("s-detach", observer).await);

    h.registry.unsubscribe_all(observer_id).await;

    // The task is still running after the observer disconnects.
    assert!(h.registry.is_task_running("s-detach").await);
    let summary = h
        .registry
        .list_active()
        .await
        .into_iter()
        .find(|s| s.session_id == "s-detach")
        .expect("summary present");
    assert_eq!(summary.subscriber_count, 0);

    assert!(h.registry.cancel_task("s-detach").await);
}

#[tokio::test]
async fn dead_observer_is_dropped_silently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = hanging_stub(dir.path());
    let h = harness(test_config(stub.to_str().expect("utf8 path"), 600, 5)).await;

    h.registry
        .start_task(request("s-dead-obs", dir.path(), false))
        .await
        .expect("task starts");

    let (observer, events) = ObserverHandle::channel();
    assert!(h.registry.subscribe("s-dead-obs", observer).await);
    drop(events); // Observer's connection dies.

    // Delivery prunes the dead observer instead of erroring.
    h.registry
        .broadcast_to_task(
            "s-dead-obs",
            StreamEvent::SessionTitle {
                session_id: "s-dead-obs".into(),
                title: "T".into(),
            },
        )
        .await;

    let summary = h
        .registry
        .list_active()
        .await
        .into_iter()
        .find(|s| s.session_id == "s-dead-obs")
        .expect("summary present");
    assert_eq!(summary.subscriber_count, 0);

    assert!(h.registry.cancel_task("s-dead-obs").await);
}

#[tokio::test]
async fn sweep_reclaims_expired_terminal_tasks_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let stub = hanging_stub(dir.path());

    // TTL of zero: terminal tasks expire immediately.
    let mut config = test_config(stub.to_str().expect("utf8 path"), 600, 5);
    config.tasks.buffer_ttl_seconds = 0;
    let h = harness(config).await;

    h.registry
        .start_task(request("s-done", dir.path(), false))
        .await
        .expect("first task starts");
    assert!(h.registry.cancel_task("s-done").await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.registry
        .start_task(request("s-still", dir.path(), false))
        .await
        .expect("second task starts");

    h.registry.sweep_expired().await;

    // Terminal and past TTL: reclaimed. Running: untouched.
    assert!(h.registry.get_replay("s-done").await.is_none());
    assert!(h.registry.get_replay("s-still").await.is_some());
    assert!(h.registry.is_task_running("s-still").await);

    assert!(h.registry.cancel_task("s-still").await);
}
