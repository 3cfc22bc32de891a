//! End-to-end tests over a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use carlot_presence::MemoryRegistry;
use carlot_server::{start, ServerConfig, ServerHandle};
use carlot_store::{Database, SqliteMessageStore};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn local_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..Default::default()
    }
}

async fn boot_server() -> ServerHandle {
    boot_server_with(local_config()).await
}

async fn boot_server_with(config: ServerConfig) -> ServerHandle {
    start(
        config,
        Arc::new(SqliteMessageStore::new(Database::in_memory().unwrap())),
        Arc::new(MemoryRegistry::new()),
    )
    .await
    .unwrap()
}

fn http_url(server: &ServerHandle, path: &str) -> String {
    format!("http://127.0.0.1:{}{path}", server.port)
}

/// Connect as `identity` and consume the `connected` frame.
async fn connect(server: &ServerHandle, identity: &str) -> (WsStream, Value) {
    let url = format!("ws://127.0.0.1:{}/ws?identity={identity}", server.port);
    let (mut ws, _) = connect_async(url).await.unwrap();
    let connected = read_json(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    (ws, connected)
}

async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Next JSON frame if one arrives within `wait`.
async fn try_read_json(ws: &mut WsStream, wait: Duration) -> Option<Value> {
    loop {
        match timeout(wait, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).ok(),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

async fn send(ws: &mut WsStream, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

async fn presence(server: &ServerHandle, identity: &str) -> bool {
    let body: Value = reqwest::get(http_url(server, &format!("/presence/{identity}")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["online"].as_bool().unwrap()
}

async fn history(server: &ServerHandle, subject: &str) -> Vec<Value> {
    let body: Value = reqwest::get(http_url(server, &format!("/conversations/{subject}/messages")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body.as_array().unwrap().clone()
}

#[tokio::test]
async fn message_is_pushed_to_online_receiver() {
    let server = boot_server().await;
    let (mut bob, _) = connect(&server, "bob").await;
    let (mut alice, _) = connect(&server, "alice").await;

    send(
        &mut alice,
        json!({"type": "send", "subject": "car_1", "receiver": "bob", "content": "hello", "ref": "r1"}),
    )
    .await;

    let ack = read_json(&mut alice).await;
    assert_eq!(ack["type"], "sent");
    assert_eq!(ack["ref"], "r1");

    let received = read_json(&mut bob).await;
    assert_eq!(received["type"], "receive");
    assert_eq!(received["message"]["content"], "hello");
    assert_eq!(received["message"]["sender"], "alice");
    assert_eq!(received["message"]["receiver"], "bob");
    assert_eq!(received["message"]["id"], ack["message_id"]);

    assert!(try_read_json(&mut bob, Duration::from_millis(200)).await.is_none());

    let stored = history(&server, "car_1").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["content"], "hello");

    server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn offline_receiver_still_gets_history() {
    let server = boot_server().await;
    let (mut alice, _) = connect(&server, "alice").await;

    send(
        &mut alice,
        json!({"type": "send", "subject": "car_7", "receiver": "dealer_9", "content": "still available?"}),
    )
    .await;
    let ack = read_json(&mut alice).await;
    assert_eq!(ack["type"], "sent");

    let stored = history(&server, "car_7").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["receiver"], "dealer_9");

    server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn missing_identity_is_refused() {
    let server = boot_server().await;
    let url = format!("ws://127.0.0.1:{}/ws", server.port);
    match connect_async(url).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => {
            assert_eq!(resp.status(), 400);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("connection without identity was accepted"),
    }
    assert_eq!(server.state().hub.count(), 0);
    assert_eq!(server.state().lifecycle.active_count(), 0);

    server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn disconnect_clears_presence() {
    let server = boot_server().await;
    let (mut bob, _) = connect(&server, "bob").await;
    assert!(presence(&server, "bob").await);

    bob.close(None).await.unwrap();

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while presence(&server, "bob").await {
        assert!(tokio::time::Instant::now() < deadline, "presence never cleared");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.state().lifecycle.active_count(), 0);

    server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn reconnect_supersedes_and_old_close_keeps_presence() {
    let server = boot_server().await;
    let (mut old, _) = connect(&server, "bob").await;
    let (mut newer, connected) = connect(&server, "bob").await;
    let (mut alice, _) = connect(&server, "alice").await;

    send(
        &mut alice,
        json!({"type": "send", "subject": "car_1", "receiver": "bob", "content": "which tab?"}),
    )
    .await;
    let _ack = read_json(&mut alice).await;

    let received = read_json(&mut newer).await;
    assert_eq!(received["message"]["content"], "which tab?");
    assert!(try_read_json(&mut old, Duration::from_millis(200)).await.is_none());

    old.close(None).await.unwrap();
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while server.state().lifecycle.active_count() > 2 {
        assert!(tokio::time::Instant::now() < deadline, "old connection never cleaned up");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(presence(&server, "bob").await);
    assert!(connected["handle"].as_str().unwrap().starts_with("conn_"));

    server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn bad_frames_are_reported_and_connection_survives() {
    let server = boot_server().await;
    let (mut alice, _) = connect(&server, "alice").await;

    alice.send(Message::text("not json")).await.unwrap();
    let err = read_json(&mut alice).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], "parse_error");

    send(
        &mut alice,
        json!({"type": "send", "subject": "car_1", "receiver": "bob", "content": "  ", "ref": 2}),
    )
    .await;
    let err = read_json(&mut alice).await;
    assert_eq!(err["code"], "invalid_message");
    assert_eq!(err["ref"], 2);

    send(
        &mut alice,
        json!({"type": "send", "subject": "car_1", "receiver": "bob", "content": "hi", "sender": "mallory"}),
    )
    .await;
    let err = read_json(&mut alice).await;
    assert_eq!(err["code"], "invalid_message");

    send(
        &mut alice,
        json!({"type": "send", "subject": "car_1", "receiver": "bob", "content": "hi"}),
    )
    .await;
    assert_eq!(read_json(&mut alice).await["type"], "sent");
    assert_eq!(history(&server, "car_1").await.len(), 1);

    server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn cancelled_sale_deletes_participant_messages() {
    let server = boot_server().await;
    let (mut alice, _) = connect(&server, "alice").await;

    for (subject, receiver) in [("car_1", "bob"), ("car_1", "carol"), ("car_2", "bob")] {
        send(
            &mut alice,
            json!({"type": "send", "subject": subject, "receiver": receiver, "content": "offer"}),
        )
        .await;
        assert_eq!(read_json(&mut alice).await["type"], "sent");
    }

    let client = reqwest::Client::new();
    let body: Value = client
        .delete(http_url(&server, "/conversations/car_1/participants/bob/messages"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["deleted"], 1);

    let remaining = history(&server, "car_1").await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["receiver"], "carol");
    assert_eq!(history(&server, "car_2").await.len(), 1);

    server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn shutdown_releases_presence() {
    let server = boot_server().await;
    let (_bob, _) = connect(&server, "bob").await;
    let registry = server.state().lifecycle.registry().clone();

    server.shutdown(Some(Duration::from_secs(2))).await;

    let resolved = registry
        .resolve(&carlot_core::Identity::from_raw("bob"))
        .await
        .unwrap();
    assert!(resolved.is_none());
}

#[tokio::test]
async fn content_at_size_limit_is_accepted_and_one_more_byte_is_not() {
    let server = boot_server().await;
    let limit = server.state().config.max_message_size;
    let (mut alice, _) = connect(&server, "alice").await;

    send(
        &mut alice,
        json!({"type": "send", "subject": "car_1", "receiver": "bob", "content": "a".repeat(limit), "ref": "max"}),
    )
    .await;
    let ack = read_json(&mut alice).await;
    assert_eq!(ack["type"], "sent");
    assert_eq!(ack["ref"], "max");

    send(
        &mut alice,
        json!({"type": "send", "subject": "car_1", "receiver": "bob", "content": "a".repeat(limit + 1), "ref": "over"}),
    )
    .await;
    let err = read_json(&mut alice).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], "invalid_message");
    assert_eq!(err["ref"], "over");

    send(
        &mut alice,
        json!({"type": "send", "subject": "car_1", "receiver": "bob", "content": "still here"}),
    )
    .await;
    assert_eq!(read_json(&mut alice).await["type"], "sent");
    assert_eq!(server.state().lifecycle.active_count(), 1);

    let stored = history(&server, "car_1").await;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0]["content"].as_str().unwrap().len(), limit);

    server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn unresponsive_peer_is_disconnected() {
    let server = boot_server_with(ServerConfig {
        heartbeat_interval: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_millis(300),
        ..local_config()
    })
    .await;

    // Never polled again, so pings go unanswered.
    let (_silent, _) = connect(&server, "bob").await;
    assert!(presence(&server, "bob").await);

    let went_offline = timeout(TIMEOUT, async {
        while presence(&server, "bob").await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(went_offline.is_ok(), "silent peer kept its presence");

    let state = server.state();
    let drained = timeout(TIMEOUT, async {
        while state.lifecycle.active_count() > 0 || state.hub.count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(drained.is_ok());

    server.shutdown(Some(Duration::from_secs(2))).await;
}

#[tokio::test]
async fn shutdown_waits_for_sessions_to_finish() {
    let server = boot_server().await;
    let (_alice, _) = connect(&server, "alice").await;
    let (_bob, _) = connect(&server, "bob").await;
    let state = server.state().clone();
    assert_eq!(state.shutdown.active_sessions(), 2);

    server.shutdown(Some(Duration::from_secs(2))).await;

    assert!(state.shutdown.is_draining());
    assert_eq!(state.shutdown.active_sessions(), 0);
    assert_eq!(state.hub.count(), 0);
    assert_eq!(state.lifecycle.active_count(), 0);
}

#[tokio::test]
async fn message_count_and_lookup_by_id() {
    let server = boot_server().await;
    let (mut alice, _) = connect(&server, "alice").await;

    send(
        &mut alice,
        json!({"type": "send", "subject": "car_9", "receiver": "bob", "content": "best price?"}),
    )
    .await;
    let ack = read_json(&mut alice).await;
    let id = ack["message_id"].as_str().unwrap().to_owned();

    let count: Value = reqwest::get(http_url(&server, "/conversations/car_9/messages/count"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(count["subject"], "car_9");
    assert_eq!(count["count"], 1);

    let found: Value = reqwest::get(http_url(&server, &format!("/messages/{id}")))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found["content"], "best price?");
    assert_eq!(found["sender"], "alice");

    let missing = reqwest::get(http_url(&server, "/messages/msg_missing"))
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    server.shutdown(Some(Duration::from_secs(2))).await;
}
