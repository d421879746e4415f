//! End-to-end session tests against an in-process relay.
//!
//! The relay mirrors the production server's contract: every text
//! frame is broadcast to all connected clients (sender included), and
//! chat messages get their uuid and timestamp stamped in on the way
//! through.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async};

use parley_session::{spawn_session, ConnectionsSnapshot, SessionConfig, SessionHandle};
use parley_shared::constants::TEMP_MESSAGE_UUID;
use parley_shared::types::{AggregateStatus, ChatUuid, PresenceStatus, UserId};

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn stamp_server_fields(raw: &str) -> String {
    let mut value: serde_json::Value = serde_json::from_str(raw).unwrap();
    if let Some(msg) = value.pointer_mut("/data/ChatMessage") {
        msg["uuid"] = serde_json::Value::String(uuid::Uuid::new_v4().to_string());
        msg["message_sent_at"] = serde_json::json!(parley_shared::protocol::now_seconds());
    }
    value.to_string()
}

async fn spawn_relay() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, _) = broadcast::channel::<String>(256);

    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            let mut rx = tx.subscribe();
            tokio::spawn(async move {
                let ws = accept_async(stream).await.unwrap();
                let (mut sink, mut source) = ws.split();
                loop {
                    tokio::select! {
                        incoming = source.next() => match incoming {
                            Some(Ok(Message::Text(raw))) => {
                                let _ = tx.send(stamp_server_fields(&raw));
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(_)) => break,
                        },
                        outgoing = rx.recv() => match outgoing {
                            Ok(raw) => {
                                // the client may already be gone; keep
                                // draining its inbound side so buffered
                                // frames (a final Disconnected) still
                                // reach the broadcast
                                let _ = sink.send(Message::Text(raw)).await;
                            }
                            Err(_) => break,
                        },
                    }
                }
            });
        }
    });

    (format!("ws://{addr}"), handle)
}

fn session_for(user_id: &str, ws_base_url: &str, chat: &ChatUuid) -> SessionHandle {
    let config = SessionConfig {
        ws_base_url: ws_base_url.to_string(),
        user_name: format!("name-{user_id}"),
        user_id: Some(UserId::from(user_id)),
        ..Default::default()
    };
    spawn_session(config, chat.clone())
}

async fn wait_for<T, F>(rx: &mut watch::Receiver<T>, mut pred: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if pred(&rx.borrow()) {
                return rx.borrow().clone();
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("condition not reached in time")
}

/// Keep sending probe messages until the receiving side sees one
/// decrypted. Rides out the short window where two freshly-joined
/// sessions are still settling on one group key.
async fn wait_until_delivered(sender: &SessionHandle, receiver: &SessionHandle, text: &str) {
    let received = receiver.messages();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            sender.send_message_to_user(text).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
            if received.borrow().iter().any(|m| m.text == text) {
                return;
            }
        }
    })
    .await
    .expect("message never delivered");
}

fn sees_peer(snapshot: &ConnectionsSnapshot, user_id: &str) -> bool {
    snapshot
        .other_sides
        .iter()
        .any(|p| p.user_id == UserId::from(user_id) && p.status.is_present())
}

#[tokio::test]
async fn test_single_session_sends_and_reconciles() {
    init_logging();
    let (url, relay) = spawn_relay().await;
    let chat = ChatUuid::new();
    let alice = session_for("alice", &url, &chat);

    alice.connect().await;
    let mut connections = alice.connections();
    wait_for(&mut connections, |c| !c.current_chat.is_empty()).await;

    alice.send_message_to_user("talking to myself").await;

    let mut messages = alice.messages();
    let log = wait_for(&mut messages, |log| {
        log.iter()
            .any(|m| m.text == "talking to myself" && m.uuid != TEMP_MESSAGE_UUID)
    })
    .await;

    // the optimistic entry was replaced, not duplicated
    assert_eq!(
        log.iter().filter(|m| m.text == "talking to myself").count(),
        1
    );

    relay.abort();
}

#[tokio::test]
async fn test_two_sessions_see_each_other_and_chat() {
    init_logging();
    let (url, relay) = spawn_relay().await;
    let chat = ChatUuid::new();
    let alice = session_for("alice", &url, &chat);
    let bob = session_for("bob", &url, &chat);

    alice.connect().await;
    let mut alice_connections = alice.connections();
    wait_for(&mut alice_connections, |c| !c.current_chat.is_empty()).await;
    assert!(!alice.is_active());

    bob.connect().await;
    wait_for(&mut alice_connections, |c| sees_peer(c, "bob")).await;
    let mut bob_connections = bob.connections();
    wait_for(&mut bob_connections, |c| sees_peer(c, "alice")).await;

    let mut alice_status = alice.status();
    wait_for(&mut alice_status, |s| *s == AggregateStatus::Active).await;
    assert!(alice.is_active());
    assert!(bob.is_active());

    wait_until_delivered(&alice, &bob, "ahoy from alice").await;
    wait_until_delivered(&bob, &alice, "ahoy back from bob").await;

    // bob's copy of alice's message carries a server uuid
    let bob_log = bob.messages().borrow().clone();
    let from_alice = bob_log
        .iter()
        .find(|m| m.text == "ahoy from alice")
        .unwrap();
    assert_eq!(from_alice.user_id, UserId::from("alice"));
    assert_ne!(from_alice.uuid, TEMP_MESSAGE_UUID);

    relay.abort();
}

#[tokio::test]
async fn test_peer_leave_flips_status_to_inactive() {
    init_logging();
    let (url, relay) = spawn_relay().await;
    let chat = ChatUuid::new();
    let alice = session_for("alice", &url, &chat);
    let bob = session_for("bob", &url, &chat);

    alice.connect().await;
    bob.connect().await;

    let mut alice_connections = alice.connections();
    wait_for(&mut alice_connections, |c| sees_peer(c, "bob")).await;

    bob.disconnect().await;

    wait_for(&mut alice_connections, |c| c.other_sides.is_empty()).await;
    let mut alice_status = alice.status();
    wait_for(&mut alice_status, |s| *s == AggregateStatus::Inactive).await;

    relay.abort();
}

#[tokio::test]
async fn test_session_answers_protocol_ping() {
    init_logging();
    let (url, relay) = spawn_relay().await;
    let chat = ChatUuid::new();
    let alice = session_for("alice", &url, &chat);

    alice.connect().await;
    let mut connections = alice.connections();
    wait_for(&mut connections, |c| !c.current_chat.is_empty()).await;

    // raw peer knocks on the channel
    let (mut ws, _) = connect_async(format!("{url}/ws/{chat}")).await.unwrap();
    ws.send(Message::Text(
        r#"{"data":{"Ping":{"ping_type":"Ping"}}}"#.to_string(),
    ))
    .await
    .unwrap();

    let pong = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(frame)) = ws.next().await {
            if let Message::Text(raw) = frame {
                if raw.contains("\"Pong\"") {
                    return raw;
                }
            }
        }
        panic!("socket closed before pong");
    })
    .await
    .expect("no pong in time");

    let envelope = parley_shared::protocol::Envelope::from_json(&pong).unwrap();
    match envelope.data {
        parley_shared::protocol::Frame::Ping(ping) => {
            assert_eq!(ping.ping_type, parley_shared::protocol::Knock::Pong);
        }
        other => panic!("wrong frame kind: {other:?}"),
    }

    relay.abort();
}

#[tokio::test]
async fn test_rejoin_after_disconnect_starts_fresh() {
    init_logging();
    let (url, relay) = spawn_relay().await;
    let chat = ChatUuid::new();
    let alice = session_for("alice", &url, &chat);

    alice.connect().await;
    let mut connections = alice.connections();
    wait_for(&mut connections, |c| !c.current_chat.is_empty()).await;

    alice.send_message_to_user("before the drop").await;
    let mut messages = alice.messages();
    wait_for(&mut messages, |log| !log.is_empty()).await;

    alice.disconnect().await;
    wait_for(&mut messages, |log| log.is_empty()).await;
    wait_for(&mut connections, |c| c.current_chat.is_empty()).await;

    // a later connect builds a brand-new identity and an empty log
    alice.connect().await;
    wait_for(&mut connections, |c| !c.current_chat.is_empty()).await;
    assert!(messages.borrow().is_empty());

    relay.abort();
}

#[tokio::test]
async fn test_connect_aborts_when_id_service_is_unreachable() {
    init_logging();
    let (url, relay) = spawn_relay().await;
    let chat = ChatUuid::new();

    // no pre-assigned user id, and nothing listens on the api port
    let config = SessionConfig {
        api_base_url: "http://127.0.0.1:9".to_string(),
        ws_base_url: url,
        user_name: "orphan".to_string(),
        user_id: None,
        ..Default::default()
    };
    let session = spawn_session(config, chat);

    session.connect().await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    // the session never reached the chat and stayed reconnectable
    assert!(session.connections().borrow().current_chat.is_empty());
    assert!(session.messages().borrow().is_empty());
    assert!(!session.is_active());

    relay.abort();
}

#[test]
fn test_presence_status_presence_rules() {
    assert!(PresenceStatus::Connected.is_present());
    assert!(PresenceStatus::StayingAlive.is_present());
    assert!(!PresenceStatus::Disconnected.is_present());
}
