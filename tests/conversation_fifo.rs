mod common;

use std::{sync::Arc, thread, time::Duration};

use serde_json::json;

use common::ScriptedHub;
use manifold_control::neohub::{ConnectionState, ConversationError, NeohubConnection, TransportEventKind};

fn connected(hub: &ScriptedHub) -> NeohubConnection {
    let conn = NeohubConnection::new(Arc::new(hub.clone()));
    conn.open("wss://hub.local:4243", "token-1").unwrap();
    assert!(conn.wait_connected(Duration::from_secs(1)));
    conn
}

fn wait_for_sent(hub: &ScriptedHub, n: usize) {
    for _ in 0..100 {
        if hub.sent_commands().len() >= n {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn replies_resolve_in_submission_order_one_in_flight() {
    let hub = ScriptedHub::manual();
    let conn = connected(&hub);

    let a = conn.send(r#"{"INFO":["A"]}"#, Duration::from_secs(5));
    let b = conn.send(r#"{"INFO":["B"]}"#, Duration::from_secs(5));
    let c = conn.send(r#"{"INFO":["C"]}"#, Duration::from_secs(5));
    assert_eq!(hub.sent_commands(), vec![json!({"INFO": ["A"]})]);

    hub.reply(&json!({"for": "A"}));
    assert_eq!(a.wait(Duration::from_secs(1)), Ok(json!({"for": "A"})));
    wait_for_sent(&hub, 2);
    assert_eq!(hub.sent_commands().len(), 2);
    assert!(c.try_result().is_none());

    hub.reply(&json!({"for": "B"}));
    assert_eq!(b.wait(Duration::from_secs(1)), Ok(json!({"for": "B"})));
    wait_for_sent(&hub, 3);
    assert_eq!(hub.sent_commands()[2], json!({"INFO": ["C"]}));

    hub.reply(&json!({"for": "C"}));
    assert_eq!(c.wait(Duration::from_secs(1)), Ok(json!({"for": "C"})));
    conn.shutdown();
}

#[test]
fn timeout_releases_the_queue_for_the_next_conversation() {
    let hub = ScriptedHub::manual();
    let conn = connected(&hub);

    let slow = conn.send(r#"{"GET_ZONES":0}"#, Duration::from_millis(100));
    let next = conn.send(r#"{"INFO":["Hall"]}"#, Duration::from_secs(5));
    assert!(matches!(slow.wait(Duration::from_secs(1)), Err(ConversationError::Timeout { .. })));

    wait_for_sent(&hub, 2);
    hub.reply(&json!({"devices": []}));
    assert_eq!(next.wait(Duration::from_secs(1)), Ok(json!({"devices": []})));
    conn.shutdown();
}

#[test]
fn stray_frames_do_not_shift_correlation() {
    let hub = ScriptedHub::manual();
    let conn = connected(&hub);

    hub.reply(&json!("stray"));
    thread::sleep(Duration::from_millis(100));
    let a = conn.send(r#"{"INFO":["A"]}"#, Duration::from_secs(5));
    hub.reply(&json!({"for": "A"}));
    assert_eq!(a.wait(Duration::from_secs(1)), Ok(json!({"for": "A"})));
    assert_eq!(conn.stats().queue.unexpected_frames, 1);
    conn.shutdown();
}

#[test]
fn hub_disconnect_fails_everything_queued() {
    let hub = ScriptedHub::manual();
    let conn = connected(&hub);

    let a = conn.send(r#"{"INFO":["A"]}"#, Duration::from_secs(5));
    let b = conn.send(r#"{"INFO":["B"]}"#, Duration::from_secs(5));
    hub.push(TransportEventKind::Disconnected("hub rebooted".into()));
    assert_eq!(a.wait(Duration::from_secs(1)), Err(ConversationError::Disconnected));
    assert_eq!(b.wait(Duration::from_secs(1)), Err(ConversationError::Disconnected));
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    // Reopening starts a fresh generation and works normally.
    conn.open("wss://hub.local:4243", "token-1").unwrap();
    assert!(conn.wait_connected(Duration::from_secs(1)));
    let c = conn.send(r#"{"INFO":["C"]}"#, Duration::from_secs(5));
    hub.reply(&json!({"for": "C"}));
    assert_eq!(c.wait(Duration::from_secs(1)), Ok(json!({"for": "C"})));
    conn.shutdown();
}
