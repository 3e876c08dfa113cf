// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the realtime channel manager against a mock chat
//! backend.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::Mutex;

use bazaar_client::{
    AuthConfig, ChannelEvent, MemoryStore, RealtimeConfig, RealtimeManager, TokenManager,
};

/// Scripted chat backend: counts upgrades, records inbound text frames,
/// optionally closes early or pushes frames on connect.
#[derive(Clone)]
struct ChatServer {
    upgrades: Arc<AtomicU32>,
    received: Arc<Mutex<Vec<String>>>,
    /// Close immediately while the upgrade count is at or below this.
    close_while_upgrades_at_most: u32,
    send_on_connect: Arc<Vec<String>>,
}

impl ChatServer {
    fn new() -> Self {
        Self {
            upgrades: Arc::new(AtomicU32::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
            close_while_upgrades_at_most: 0,
            send_on_connect: Arc::new(Vec::new()),
        }
    }

    async fn received_contains(&self, needle: &str) -> bool {
        self.received.lock().await.iter().any(|f| f.contains(needle))
    }
}

async fn ws_handler(
    State(server): State<ChatServer>,
    Path(_channel): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let upgrade_no = server.upgrades.fetch_add(1, Ordering::Relaxed) + 1;
    ws.on_upgrade(move |socket| handle_socket(socket, server, upgrade_no))
}

async fn handle_socket(mut socket: WebSocket, server: ChatServer, upgrade_no: u32) {
    if upgrade_no <= server.close_while_upgrades_at_most {
        return;
    }
    for frame in server.send_on_connect.iter() {
        if socket.send(Message::Text(frame.clone().into())).await.is_err() {
            return;
        }
    }
    while let Some(Ok(msg)) = socket.recv().await {
        if let Message::Text(text) = msg {
            server.received.lock().await.push(text.to_string());
        }
    }
}

async fn spawn_chat_server(server: ChatServer) -> SocketAddr {
    let app = Router::new()
        .route("/ws/chat/{channel_id}/", any(ws_handler))
        .with_state(server);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

fn manager_for(addr: SocketAddr, config: RealtimeConfig) -> Arc<RealtimeManager> {
    let store = Arc::new(MemoryStore::new());
    let (tokens, _rx) = TokenManager::new("http://127.0.0.1:1", AuthConfig::default(), store);
    RealtimeManager::new(format!("ws://{addr}"), config, tokens)
}

fn fast_config() -> RealtimeConfig {
    RealtimeConfig {
        heartbeat_ms: 10_000,
        reconnect_base_ms: 50,
        reconnect_cap_ms: 200,
        max_reconnect_attempts: 5,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Wait for a matching event, failing after `timeout`.
async fn expect_event(
    rx: &mut broadcast::Receiver<ChannelEvent>,
    timeout: Duration,
    pred: impl Fn(&ChannelEvent) -> bool,
) -> ChannelEvent {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for channel event");
        let event = tokio::time::timeout(remaining, rx.recv())
            .await
            .expect("timed out waiting for channel event")
            .expect("event stream ended");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn connect_twice_keeps_single_socket() {
    let server = ChatServer::new();
    let addr = spawn_chat_server(server.clone()).await;
    let manager = manager_for(addr, fast_config());

    let mut rx = manager.connect("room-1").await;
    expect_event(&mut rx, Duration::from_secs(2), |e| matches!(e, ChannelEvent::Connected)).await;

    // Second connect is a no-op on the existing connection.
    let _rx2 = manager.connect("room-1").await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(server.upgrades.load(Ordering::Relaxed), 1);
    assert!(manager.is_connected("room-1").await);
}

#[tokio::test]
async fn distinct_channels_get_distinct_sockets() {
    let server = ChatServer::new();
    let addr = spawn_chat_server(server.clone()).await;
    let manager = manager_for(addr, fast_config());

    let mut rx1 = manager.connect("room-1").await;
    let mut rx2 = manager.connect("room-2").await;
    expect_event(&mut rx1, Duration::from_secs(2), |e| matches!(e, ChannelEvent::Connected)).await;
    expect_event(&mut rx2, Duration::from_secs(2), |e| matches!(e, ChannelEvent::Connected)).await;

    assert_eq!(server.upgrades.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn inbound_frames_dispatch_typed_events() {
    let mut server = ChatServer::new();
    server.send_on_connect = Arc::new(vec![
        json!({"type": "chat_message", "message": {"text": "hi", "sender_id": 2}}).to_string(),
        json!({"type": "mystery", "x": 1}).to_string(),
        json!({"type": "user_status", "user_id": 2, "status": "online"}).to_string(),
    ]);
    let addr = spawn_chat_server(server.clone()).await;
    let manager = manager_for(addr, fast_config());

    let mut rx = manager.connect("room-1").await;

    let event = expect_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ChannelEvent::Message { .. })
    })
    .await;
    let ChannelEvent::Message { message } = event else { unreachable!() };
    assert_eq!(message["text"], "hi");

    // The unknown frame is dropped; user_status follows directly.
    let event = expect_event(&mut rx, Duration::from_secs(2), |e| {
        !matches!(e, ChannelEvent::Connected)
    })
    .await;
    match event {
        ChannelEvent::UserStatus { user_id, status } => {
            assert_eq!(user_id, 2);
            assert_eq!(status, "online");
        }
        other => panic!("expected UserStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn outbound_frames_are_typed_and_delivered() {
    let server = ChatServer::new();
    let addr = spawn_chat_server(server.clone()).await;
    let manager = manager_for(addr, fast_config());

    let mut rx = manager.connect("room-1").await;
    expect_event(&mut rx, Duration::from_secs(2), |e| matches!(e, ChannelEvent::Connected)).await;

    manager.send_message("room-1", json!({"text": "hello there"})).await;
    manager.start_typing("room-1").await;
    manager.stop_typing("room-1").await;
    manager.mark_read("room-1", vec![11, 12]).await;

    for _ in 0..100 {
        if server.received_contains("mark_read").await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(server.received_contains(r#""type":"chat_message""#).await);
    assert!(server.received_contains("hello there").await);
    assert!(server.received_contains(r#""type":"typing_start""#).await);
    assert!(server.received_contains(r#""type":"typing_stop""#).await);
    assert!(server.received_contains(r#""message_ids":[11,12]"#).await);
}

#[tokio::test]
async fn heartbeat_pings_flow() {
    let server = ChatServer::new();
    let addr = spawn_chat_server(server.clone()).await;
    let config = RealtimeConfig { heartbeat_ms: 100, ..fast_config() };
    let manager = manager_for(addr, config);

    let mut rx = manager.connect("room-1").await;
    expect_event(&mut rx, Duration::from_secs(2), |e| matches!(e, ChannelEvent::Connected)).await;

    let mut seen = false;
    for _ in 0..100 {
        if server.received_contains(r#""type":"ping""#).await {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(seen, "heartbeat ping should arrive within the interval");
}

#[tokio::test]
async fn reconnects_after_unexpected_close() {
    init_tracing();
    let mut server = ChatServer::new();
    server.close_while_upgrades_at_most = 1;
    let addr = spawn_chat_server(server.clone()).await;
    let manager = manager_for(addr, fast_config());

    let mut rx = manager.connect("room-1").await;

    // First connection drops; the channel comes back on its own.
    expect_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ChannelEvent::Disconnected)
    })
    .await;
    expect_event(&mut rx, Duration::from_secs(3), |e| matches!(e, ChannelEvent::Connected)).await;

    assert!(server.upgrades.load(Ordering::Relaxed) >= 2);
    assert!(manager.is_connected("room-1").await);
}

#[tokio::test]
async fn manual_disconnect_beats_scheduled_reconnect() {
    init_tracing();
    let mut server = ChatServer::new();
    server.close_while_upgrades_at_most = u32::MAX;
    let addr = spawn_chat_server(server.clone()).await;
    let config = RealtimeConfig {
        reconnect_base_ms: 300,
        reconnect_cap_ms: 1_000,
        max_reconnect_attempts: 5,
        ..fast_config()
    };
    let manager = manager_for(addr, config);

    let mut rx = manager.connect("room-1").await;
    expect_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, ChannelEvent::Disconnected)
    })
    .await;

    // A reconnect is now scheduled ~300ms out; disconnect first.
    manager.disconnect("room-1").await;
    tokio::time::sleep(Duration::from_millis(800)).await;

    assert_eq!(
        server.upgrades.load(Ordering::Relaxed),
        1,
        "manual disconnect must suppress the pending reconnect"
    );
    assert!(!manager.is_connected("room-1").await);
}

#[tokio::test]
async fn reconnect_attempts_are_bounded() {
    let mut server = ChatServer::new();
    server.close_while_upgrades_at_most = u32::MAX;
    let addr = spawn_chat_server(server.clone()).await;
    let config = RealtimeConfig {
        reconnect_base_ms: 20,
        reconnect_cap_ms: 40,
        max_reconnect_attempts: 2,
        ..fast_config()
    };
    let manager = manager_for(addr, config);

    let _rx = manager.connect("room-1").await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Initial dial + two bounded retries, then the channel stays down.
    assert_eq!(server.upgrades.load(Ordering::Relaxed), 3);
    assert!(!manager.is_connected("room-1").await);
    assert!(manager.subscribe("room-1").await.is_none(), "registry entry cleaned up");
}

#[tokio::test]
async fn shutdown_tears_down_all_channels() {
    let server = ChatServer::new();
    let addr = spawn_chat_server(server.clone()).await;
    let manager = manager_for(addr, fast_config());

    let mut rx1 = manager.connect("room-1").await;
    let mut rx2 = manager.connect("room-2").await;
    expect_event(&mut rx1, Duration::from_secs(2), |e| matches!(e, ChannelEvent::Connected)).await;
    expect_event(&mut rx2, Duration::from_secs(2), |e| matches!(e, ChannelEvent::Connected)).await;

    manager.shutdown().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!manager.is_connected("room-1").await);
    assert!(!manager.is_connected("room-2").await);
    assert_eq!(server.upgrades.load(Ordering::Relaxed), 2, "no reconnects after teardown");
}
