// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Tuning for the token manager.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Path of the token refresh endpoint, relative to the API base URL.
    pub refresh_path: String,

    /// Remaining token lifetime (seconds) below which a renewal is triggered.
    pub refresh_threshold_secs: u64,

    /// Minimum spacing between refresh operations in milliseconds.
    pub min_refresh_interval_ms: u64,

    /// Per-attempt network timeout for refresh calls in milliseconds.
    pub refresh_timeout_ms: u64,

    /// Attempt budget for transient refresh failures.
    pub max_refresh_attempts: u32,

    /// Initial retry backoff in milliseconds.
    pub backoff_base_ms: u64,

    /// Retry backoff ceiling in milliseconds.
    pub backoff_cap_ms: u64,

    /// Fractional jitter applied to each backoff delay (0.1 = ±10%).
    pub backoff_jitter: f64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_path: "/api/token/refresh/".to_owned(),
            refresh_threshold_secs: 300,
            min_refresh_interval_ms: 30_000,
            refresh_timeout_ms: 10_000,
            max_refresh_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            backoff_jitter: 0.1,
        }
    }
}

impl AuthConfig {
    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.min_refresh_interval_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

/// Tuning for realtime channel connections.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Heartbeat ping interval in milliseconds.
    pub heartbeat_ms: u64,

    /// Initial reconnect backoff in milliseconds.
    pub reconnect_base_ms: u64,

    /// Reconnect backoff ceiling in milliseconds.
    pub reconnect_cap_ms: u64,

    /// Reconnect attempts before a channel is left disconnected.
    pub max_reconnect_attempts: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_ms: 30_000,
            reconnect_base_ms: 1_000,
            reconnect_cap_ms: 30_000,
            max_reconnect_attempts: 5,
        }
    }
}

impl RealtimeConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect_cap_ms)
    }
}
