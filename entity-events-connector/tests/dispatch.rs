mod common;

use common::{recording_listener, settle, test_config, TestEnvironment};
use entity_events_connector::{
    dispatcher::{DispatchOutcome, MessageDispatcher},
    events::ClientFrame,
    transport::LoopbackTransport,
    ConnectionHandle, ConnectionManager, Severity, Subscription, WILDCARD,
};
use serde_json::json;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::Duration,
};

/// A manager that is never run, for exercising the registry and dispatcher directly.
fn offline() -> (ConnectionManager, ConnectionHandle, MessageDispatcher) {
    let (transport, _server) = LoopbackTransport::pair();
    let (manager, handle) = ConnectionManager::new(Arc::new(test_config()), Arc::new(transport));
    let dispatcher = MessageDispatcher::new(handle.registry().clone());
    (manager, handle, dispatcher)
}

fn counter(handle: &ConnectionHandle, event_type: &str) -> (Subscription, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let subscription = handle.subscribe(event_type, move |_, _| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (subscription, count)
}

/// Runs `f` on its own thread and fails the test if it does not return promptly.
fn returns_promptly(f: impl FnOnce() + Send + 'static) {
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        f();
        let _ = done_tx.send(());
    });
    done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("call blocked on the registry");
}

#[tokio::test]
async fn test_entity_created_reaches_typed_and_wildcard_listeners() {
    let (_manager, handle, dispatcher) = offline();
    let (_typed, mut typed_rx) = recording_listener(&handle, "entity_created");
    let (_all, mut all_rx) = recording_listener(&handle, WILDCARD);

    let outcome = dispatcher.handle_frame(
        r#"{"type":"entity_created","data":{"entityType":"company","id":"e1"},"timestamp":1700000000000,"severity":"success"}"#,
    );

    assert_eq!(
        outcome,
        DispatchOutcome::Dispatched {
            delivered: 2,
            failed: 0
        }
    );
    let (data, message) = typed_rx.try_recv().expect("typed listener called");
    assert_eq!(data, json!({"entityType": "company", "id": "e1"}));
    assert_eq!(message.event_type, "entity_created");
    assert_eq!(message.timestamp, Some(1_700_000_000_000));
    assert_eq!(message.severity, Some(Severity::Success));

    let (wildcard_data, _) = all_rx.try_recv().expect("wildcard listener called");
    assert_eq!(wildcard_data, data);
    assert!(typed_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_pong_never_reaches_listeners() {
    let (_manager, handle, dispatcher) = offline();
    let (_pong, pong_count) = counter(&handle, "pong");
    let (_all, all_count) = counter(&handle, WILDCARD);

    assert_eq!(
        dispatcher.handle_frame(r#"{"type":"pong"}"#),
        DispatchOutcome::Heartbeat
    );
    assert_eq!(pong_count.load(Ordering::SeqCst), 0);
    assert_eq!(all_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let (_manager, handle, dispatcher) = offline();
    let (_all, count) = counter(&handle, WILDCARD);

    assert_eq!(dispatcher.handle_frame("not json"), DispatchOutcome::Dropped);
    assert_eq!(
        dispatcher.handle_frame(r#"{"data":{"id":1}}"#),
        DispatchOutcome::Dropped
    );
    assert_eq!(count.load(Ordering::SeqCst), 0);

    // Dispatch keeps working afterwards.
    dispatcher.handle_frame(r#"{"type":"entity_updated"}"#);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_data_defaults_to_null() {
    let (_manager, handle, dispatcher) = offline();
    let (_sub, mut rx) = recording_listener(&handle, "system_notification");

    dispatcher.handle_frame(r#"{"type":"system_notification","description":"maintenance"}"#);

    let (data, message) = rx.try_recv().expect("listener called");
    assert!(data.is_null());
    assert_eq!(message.description.as_deref(), Some("maintenance"));
}

#[tokio::test]
async fn test_panicking_listener_does_not_stop_others() {
    let (_manager, handle, dispatcher) = offline();
    let (_first, first) = counter(&handle, "entity_deleted");
    let _bad = handle.subscribe("entity_deleted", |_, _| panic!("listener blew up"));
    let (_last, last) = counter(&handle, "entity_deleted");

    let outcome = dispatcher.handle_frame(r#"{"type":"entity_deleted","data":{"id":"e9"}}"#);

    assert_eq!(
        outcome,
        DispatchOutcome::Dispatched {
            delivered: 2,
            failed: 1
        }
    );
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_wildcard_subscription_is_not_delivered_twice() {
    let (_manager, handle, dispatcher) = offline();
    let (_all, count) = counter(&handle, WILDCARD);

    dispatcher.handle_frame(r#"{"type":"*"}"#);

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_listener_can_unsubscribe_itself_during_dispatch() {
    let (_manager, handle, dispatcher) = offline();
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicUsize::new(0));

    let own_slot = slot.clone();
    let own_calls = calls.clone();
    let subscription = handle.subscribe("entity_updated", move |_, _| {
        own_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(subscription) = own_slot.lock().unwrap().take() {
            subscription.unsubscribe();
        }
    });
    *slot.lock().unwrap() = Some(subscription);
    let (_other, other) = counter(&handle, "entity_updated");

    dispatcher.handle_frame(r#"{"type":"entity_updated"}"#);
    dispatcher.handle_frame(r#"{"type":"entity_updated"}"#);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(other.load(Ordering::SeqCst), 2);
    assert_eq!(handle.registry().listener_count("entity_updated"), 1);
}

#[tokio::test]
async fn test_listener_removed_mid_dispatch_is_skipped() {
    let (_manager, handle, dispatcher) = offline();
    let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let to_remove = victim.clone();
    let _killer = handle.subscribe("entity_updated", move |_, _| {
        to_remove.lock().unwrap().take();
    });
    let (subscription, victim_calls) = counter(&handle, "entity_updated");
    *victim.lock().unwrap() = Some(subscription);

    let outcome = dispatcher.handle_frame(r#"{"type":"entity_updated"}"#);

    assert_eq!(
        outcome,
        DispatchOutcome::Dispatched {
            delivered: 1,
            failed: 0
        }
    );
    assert_eq!(victim_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_listener_owning_a_subscription_can_be_unsubscribed() {
    let (_manager, handle, _dispatcher) = offline();
    let inner = handle.subscribe("entity_updated", |_, _| {});
    let _other = handle.subscribe("entity_deleted", |_, _| {});
    let outer = handle.subscribe("entity_updated", move |_, _| {
        let _keep = &inner;
    });

    returns_promptly(move || outer.unsubscribe());

    assert_eq!(handle.registry().listener_count("entity_updated"), 0);
    assert_eq!(handle.registry().event_types(), vec!["entity_deleted"]);
}

#[tokio::test]
async fn test_disconnect_releases_listeners_owning_subscriptions() {
    let (manager, handle, _dispatcher) = offline();
    // With the manager gone, disconnect only clears the registry.
    drop(manager);
    let inner = handle.subscribe("entity_created", |_, _| {});
    let _outer = handle.subscribe("entity_created", move |_, _| {
        let _keep = &inner;
    });
    let other_inner = handle.subscribe("entity_deleted", |_, _| {});
    let _other_outer = handle.subscribe(WILDCARD, move |_, _| {
        let _keep = &other_inner;
    });

    let disconnecting = handle.clone();
    returns_promptly(move || futures::executor::block_on(disconnecting.disconnect()));

    assert!(handle.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_control_frames_on_first_and_last_listener() {
    let mut env = TestEnvironment::start();
    let mut peer = env.connect().await;

    let first = env.handle.subscribe("entity_created", |_, _| {});
    let second = env.handle.subscribe("entity_created", |_, _| {});
    settle().await;
    assert_eq!(
        peer.drain_frames(),
        vec![ClientFrame::Subscribe {
            event_type: "entity_created".to_string()
        }]
    );

    drop(first);
    settle().await;
    assert!(peer.drain_frames().is_empty());

    second.unsubscribe();
    settle().await;
    assert_eq!(
        peer.drain_frames(),
        vec![ClientFrame::Unsubscribe {
            event_type: "entity_created".to_string()
        }]
    );
    assert!(env.handle.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_messages_flow_from_server_to_listeners() {
    let mut env = TestEnvironment::start();
    let peer = env.connect().await;
    let (_sub, mut rx) = recording_listener(&env.handle, "entity_created");

    peer.send_json(&json!({
        "type": "entity_created",
        "data": {"entityType": "company", "id": "e1"},
        "timestamp": 1_700_000_000_000i64
    }));
    peer.send_text(r#"{"type":"pong"}"#);
    peer.send_text("{garbage");
    settle().await;

    let (data, _) = rx.try_recv().expect("listener called");
    assert_eq!(data["id"], "e1");
    assert!(rx.try_recv().is_err());
    assert!(env.handle.is_connected());
}
