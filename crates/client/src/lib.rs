// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client core for the Bazaar storefront: session/token lifecycle,
//! authenticated HTTP, and realtime channel management.
//!
//! The three services are plain dependency-injected instances — construct
//! them once at the application's composition root (or use [`Client::new`])
//! and share them via `Arc`. Rendering, routing, and display logic live in
//! the host application; this crate only talks to the backend.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod realtime;

use std::sync::Arc;

use tokio::sync::broadcast;

pub use crate::api::{Access, ApiClient, RouteTable};
pub use crate::auth::{
    FileStore, MemoryStore, Role, SessionStore, StoreChange, TokenManager, UserProfile,
};
pub use crate::config::{AuthConfig, RealtimeConfig};
pub use crate::error::{ApiError, AuthError};
pub use crate::events::{AuthEvent, HostSignal, LogoutReason};
pub use crate::realtime::{ChannelEvent, RealtimeManager};

/// Fully wired client core.
pub struct Client {
    pub tokens: Arc<TokenManager>,
    pub api: ApiClient,
    pub realtime: Arc<RealtimeManager>,
}

impl Client {
    /// Wire the core with default configuration. Must be called inside a
    /// tokio runtime (the store watcher is spawned here).
    pub fn new(
        http_base: &str,
        ws_base: &str,
        store: Arc<dyn SessionStore>,
    ) -> (Self, broadcast::Receiver<AuthEvent>) {
        let (tokens, events) = TokenManager::new(http_base, AuthConfig::default(), store);
        tokens.watch_store();
        let api = ApiClient::new(http_base, RouteTable::storefront(), Arc::clone(&tokens));
        let realtime =
            RealtimeManager::new(ws_base, RealtimeConfig::default(), Arc::clone(&tokens));
        (Self { tokens, api, realtime }, events)
    }

    /// Stop background tasks and tear down every realtime channel.
    pub async fn shutdown(&self) {
        self.tokens.shutdown();
        self.realtime.shutdown().await;
    }
}
