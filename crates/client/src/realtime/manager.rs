// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel connection manager.
//!
//! One socket per channel id, tracked in a shared registry. Each channel runs
//! as a spawned task: connect, heartbeat, dispatch inbound frames, and
//! reconnect with exponential backoff on unexpected closure. A manual
//! disconnect cancels the channel token, which every reconnect sleep observes
//! before dialing — manual teardown always wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::auth::TokenManager;
use crate::config::RealtimeConfig;
use crate::realtime::frames::{self, ChannelEvent, Frame};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Registry entry for one live channel.
struct ChannelHandle {
    /// Manual-disconnect flag; cancelling suppresses any further reconnect.
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<Frame>,
    events: broadcast::Sender<ChannelEvent>,
    open: Arc<AtomicBool>,
}

/// Manages one WebSocket connection per logical channel.
pub struct RealtimeManager {
    base_url: String,
    config: RealtimeConfig,
    tokens: Arc<TokenManager>,
    channels: RwLock<HashMap<String, ChannelHandle>>,
    shutdown: CancellationToken,
}

impl RealtimeManager {
    pub fn new(
        base_url: impl Into<String>,
        config: RealtimeConfig,
        tokens: Arc<TokenManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            base_url: base_url.into(),
            config,
            tokens,
            channels: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Connect to a channel, or subscribe to the existing connection.
    ///
    /// Calling twice without disconnecting keeps a single underlying socket.
    pub async fn connect(self: &Arc<Self>, channel_id: &str) -> broadcast::Receiver<ChannelEvent> {
        {
            let channels = self.channels.read().await;
            if let Some(handle) = channels.get(channel_id) {
                tracing::debug!(channel = %channel_id, "already connected, reusing channel");
                return handle.events.subscribe();
            }
        }

        let mut channels = self.channels.write().await;
        // Double-check after acquiring the write lock.
        if let Some(handle) = channels.get(channel_id) {
            return handle.events.subscribe();
        }

        let (events_tx, events_rx) = broadcast::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = self.shutdown.child_token();
        let open = Arc::new(AtomicBool::new(false));

        channels.insert(
            channel_id.to_owned(),
            ChannelHandle {
                cancel: cancel.clone(),
                outbound: outbound_tx,
                events: events_tx.clone(),
                open: Arc::clone(&open),
            },
        );
        drop(channels);

        tracing::debug!(channel = %channel_id, "channel registered");
        let manager = Arc::downgrade(self);
        let id = channel_id.to_owned();
        tokio::spawn(run_channel(manager, id, cancel, outbound_rx, events_tx, open));

        events_rx
    }

    /// Subscribe to an already-connected channel.
    pub async fn subscribe(&self, channel_id: &str) -> Option<broadcast::Receiver<ChannelEvent>> {
        self.channels.read().await.get(channel_id).map(|h| h.events.subscribe())
    }

    /// Whether the channel currently has an open socket.
    pub async fn is_connected(&self, channel_id: &str) -> bool {
        self.channels
            .read()
            .await
            .get(channel_id)
            .is_some_and(|h| h.open.load(Ordering::Acquire))
    }

    /// Tear a channel down. Authoritative: any scheduled reconnect observes
    /// the cancelled token and never dials.
    pub async fn disconnect(&self, channel_id: &str) {
        match self.channels.write().await.remove(channel_id) {
            Some(handle) => {
                handle.open.store(false, Ordering::Release);
                handle.cancel.cancel();
                tracing::debug!(channel = %channel_id, "channel disconnected");
            }
            None => {
                tracing::debug!(channel = %channel_id, "disconnect for unknown channel ignored");
            }
        }
    }

    /// Tear down every channel (process/page termination).
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut channels = self.channels.write().await;
        for (id, handle) in channels.drain() {
            handle.open.store(false, Ordering::Release);
            handle.cancel.cancel();
            tracing::debug!(channel = %id, "channel torn down");
        }
    }

    // -- Outbound frames ------------------------------------------------------

    pub async fn send_message(&self, channel_id: &str, message: serde_json::Value) {
        self.send_frame(channel_id, Frame::ChatMessage { message }).await;
    }

    pub async fn start_typing(&self, channel_id: &str) {
        self.send_frame(channel_id, Frame::TypingStart).await;
    }

    pub async fn stop_typing(&self, channel_id: &str) {
        self.send_frame(channel_id, Frame::TypingStop).await;
    }

    pub async fn mark_read(&self, channel_id: &str, message_ids: Vec<u64>) {
        self.send_frame(channel_id, Frame::MarkRead { message_ids }).await;
    }

    pub async fn ping(&self, channel_id: &str) {
        self.send_frame(channel_id, Frame::Ping).await;
    }

    async fn send_frame(&self, channel_id: &str, frame: Frame) {
        let channels = self.channels.read().await;
        let Some(handle) = channels.get(channel_id) else {
            tracing::debug!(channel = %channel_id, "send on unknown channel dropped");
            return;
        };
        if !handle.open.load(Ordering::Acquire) {
            tracing::debug!(channel = %channel_id, "send on closed channel dropped");
            return;
        }
        if handle.outbound.send(frame).is_err() {
            tracing::debug!(channel = %channel_id, "channel task gone, frame dropped");
        }
    }

    /// Channel socket URL; carries the current access token so reconnects
    /// pick up refreshed credentials.
    async fn channel_url(&self, channel_id: &str) -> String {
        let mut url = format!("{}/ws/chat/{}/", self.base_url, channel_id);
        if let Some(token) = self.tokens.access_token().await {
            url.push_str(&format!("?token={token}"));
        }
        url
    }
}

/// Per-channel connection task.
async fn run_channel(
    manager: Weak<RealtimeManager>,
    channel_id: String,
    cancel: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    events: broadcast::Sender<ChannelEvent>,
    open: Arc<AtomicBool>,
) {
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let Some(mgr) = manager.upgrade() else { break };
        let url = mgr.channel_url(&channel_id).await;
        let heartbeat = mgr.config.heartbeat();
        let base = mgr.config.reconnect_base();
        let cap = mgr.config.reconnect_cap();
        let max_attempts = mgr.config.max_reconnect_attempts;
        drop(mgr);

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                attempts = 0;
                open.store(true, Ordering::Release);
                let _ = events.send(ChannelEvent::Connected);
                tracing::debug!(channel = %channel_id, "channel connected");

                let (mut write, mut read) = ws.split();
                // First tick one full period out.
                let mut heartbeat_timer = tokio::time::interval_at(
                    tokio::time::Instant::now() + heartbeat,
                    heartbeat,
                );

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                        _ = heartbeat_timer.tick() => {
                            if !send_frame(&mut write, &Frame::Ping).await {
                                break;
                            }
                        }
                        frame = outbound.recv() => {
                            match frame {
                                Some(frame) => {
                                    if !send_frame(&mut write, &frame).await {
                                        break;
                                    }
                                }
                                None => break, // Manager dropped.
                            }
                        }
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Some(frame) = Frame::parse(text.as_str()) {
                                        if let Some(event) = frames::dispatch(frame) {
                                            let _ = events.send(event);
                                        }
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    tracing::debug!(channel = %channel_id, "channel socket closed");
                                    break;
                                }
                                Some(Err(e)) => {
                                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                                    tracing::debug!(channel = %channel_id, err = %e, "channel socket error");
                                    break;
                                }
                                Some(Ok(_)) => {} // Binary and transport ping/pong ignored.
                            }
                        }
                    }
                }

                open.store(false, Ordering::Release);
                let _ = events.send(ChannelEvent::Disconnected);
            }
            Err(e) => {
                let _ = events.send(ChannelEvent::Error(e.to_string()));
                tracing::debug!(channel = %channel_id, err = %e, "channel connect failed");
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        attempts += 1;
        if attempts > max_attempts {
            tracing::warn!(channel = %channel_id, attempts, "reconnect attempts exhausted");
            break;
        }

        let delay = reconnect_delay(base, cap, attempts);
        tracing::debug!(
            channel = %channel_id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnecting after backoff"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    // Drop the registry entry (if it is still ours) so a later connect()
    // starts a fresh channel.
    if let Some(mgr) = manager.upgrade() {
        let mut channels = mgr.channels.write().await;
        let ours = channels.get(&channel_id).is_some_and(|h| Arc::ptr_eq(&h.open, &open));
        if ours {
            channels.remove(&channel_id);
        }
    }
    tracing::debug!(channel = %channel_id, "channel task finished");
}

async fn send_frame(write: &mut WsSink, frame: &Frame) -> bool {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            tracing::debug!(err = %e, "failed to serialize frame");
            return true;
        }
    };
    write.send(Message::Text(json.into())).await.is_ok()
}

/// `base * 2^(attempt-1)`, capped.
fn reconnect_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    (base * 2u32.saturating_pow(exp)).min(cap)
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
