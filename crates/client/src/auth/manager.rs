// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token lifecycle manager: proactive renewal, single-flight refresh with
//! FIFO waiter release, and the retry/backoff state machine.
//!
//! One instance is constructed at the application's composition root and
//! shared via `Arc`; there is no module-level state, so tests build isolated
//! managers per case.

use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{broadcast, oneshot, Mutex, RwLock};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::claims;
use crate::auth::session::{RefreshRequest, RefreshResponse, SessionState, UserProfile};
use crate::auth::store::{SessionStore, StoreChange};
use crate::auth::{epoch_secs, ACCESS_TOKEN_KEY, PROFILE_KEY, REFRESH_TOKEN_KEY, VENDOR_ID_KEY};
use crate::config::AuthConfig;
use crate::error::{AuthError, ErrorBody};
use crate::events::{AuthEvent, HostSignal, LogoutReason};

/// Outcome shared with every caller parked on an in-flight refresh.
type RefreshOutcome = Result<String, TerminalRefresh>;

/// Terminal refresh failure; the session is already cleared when this is built.
#[derive(Debug, Clone)]
struct TerminalRefresh {
    reason: LogoutReason,
    code: Option<String>,
}

/// Single-flight gate for refresh operations.
#[derive(Default)]
struct RefreshGate {
    in_flight: bool,
    /// Start of the most recent refresh operation.
    last_attempt: Option<Instant>,
    /// Callers parked on the in-flight operation, released in queue order.
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

/// Classification of one refresh network attempt.
enum RefreshAttempt {
    Success { access: String, refresh: Option<String> },
    /// HTTP 401 — the refresh token itself is dead.
    Unauthorized { code: Option<String> },
    /// HTTP 429 with an optional server-supplied delay.
    RateLimited { retry_after: Option<Duration> },
    /// 5xx, timeout, or connection failure — worth retrying.
    Transient { message: String },
    /// Any other status — unrecoverable.
    Fatal { status: u16, code: Option<String>, message: String },
}

/// Owns the access/refresh token pair and guarantees that any caller asking
/// for a valid token either gets one or an explicit failure, with at most one
/// refresh call in flight process-wide.
pub struct TokenManager {
    config: AuthConfig,
    base_url: String,
    http: reqwest::Client,
    store: Arc<dyn SessionStore>,
    session: RwLock<SessionState>,
    gate: Mutex<RefreshGate>,
    event_tx: broadcast::Sender<AuthEvent>,
    /// Proactive renewal timer; re-armed whenever fresh tokens are adopted.
    timer: std::sync::Mutex<Option<AbortHandle>>,
    shutdown: CancellationToken,
}

impl TokenManager {
    /// Create a manager, seeding session state from the store.
    pub fn new(
        base_url: impl Into<String>,
        config: AuthConfig,
        store: Arc<dyn SessionStore>,
    ) -> (Arc<Self>, broadcast::Receiver<AuthEvent>) {
        let (event_tx, event_rx) = broadcast::channel(16);

        let session = SessionState {
            access_token: store.get(ACCESS_TOKEN_KEY),
            refresh_token: store.get(REFRESH_TOKEN_KEY),
            profile: store.get(PROFILE_KEY).and_then(|json| match serde_json::from_str(&json) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    tracing::warn!(err = %e, "stored profile is unreadable, ignoring");
                    None
                }
            }),
        };

        let manager = Arc::new(Self {
            config,
            base_url: base_url.into(),
            http: reqwest::Client::new(),
            store,
            session: RwLock::new(session),
            gate: Mutex::new(RefreshGate::default()),
            event_tx,
            timer: std::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
        });

        (manager, event_rx)
    }

    /// Subscribe to auth events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.event_tx.subscribe()
    }

    // -- Accessors ------------------------------------------------------------

    pub async fn access_token(&self) -> Option<String> {
        self.session.read().await.access_token.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.session.read().await.refresh_token.clone()
    }

    pub async fn profile(&self) -> Option<UserProfile> {
        self.session.read().await.profile.clone()
    }

    pub async fn vendor_id(&self) -> Option<u64> {
        self.session.read().await.profile.as_ref().and_then(|p| p.vendor_id)
    }

    /// Whether a proactive renewal is currently scheduled.
    pub fn proactive_timer_armed(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    // -- Session lifecycle ----------------------------------------------------

    /// Establish a session from login, registration, or an OAuth callback.
    pub async fn set_session(
        self: &Arc<Self>,
        access_token: &str,
        refresh_token: &str,
        profile: UserProfile,
    ) {
        {
            let mut session = self.session.write().await;
            session.access_token = Some(access_token.to_owned());
            session.refresh_token = Some(refresh_token.to_owned());
            session.profile = Some(profile.clone());
        }
        self.store.set(ACCESS_TOKEN_KEY, access_token);
        self.store.set(REFRESH_TOKEN_KEY, refresh_token);
        match serde_json::to_string(&profile) {
            Ok(json) => self.store.set(PROFILE_KEY, &json),
            Err(e) => tracing::warn!(err = %e, "failed to serialize profile"),
        }
        match profile.vendor_id {
            Some(vendor) => self.store.set(VENDOR_ID_KEY, &vendor.to_string()),
            None => self.store.remove(VENDOR_ID_KEY),
        }
        self.rearm_from_token(access_token);
        tracing::info!(user = profile.id, "session established");
    }

    /// Explicit logout requested by the application.
    pub async fn logout(&self) {
        self.clear_session().await;
        let _ = self.event_tx.send(AuthEvent::Logout { reason: LogoutReason::UserRequested });
        tracing::info!("session cleared on logout");
    }

    /// Stop background tasks. The manager remains usable for direct calls.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.cancel_timer();
    }

    async fn clear_session(&self) {
        {
            let mut session = self.session.write().await;
            *session = SessionState::default();
        }
        self.store.remove(ACCESS_TOKEN_KEY);
        self.store.remove(REFRESH_TOKEN_KEY);
        self.store.remove(PROFILE_KEY);
        self.store.remove(VENDOR_ID_KEY);
        self.cancel_timer();
    }

    // -- Validation -----------------------------------------------------------

    /// Guarantee a currently-valid access token or fail explicitly.
    ///
    /// Decodes the expiry claim locally — no network unless the token is
    /// inside the renewal threshold. Arms the proactive timer otherwise.
    pub async fn ensure_valid_token(self: &Arc<Self>) -> Result<(), AuthError> {
        let access = self.session.read().await.access_token.clone();
        let Some(access) = access else {
            return Err(AuthError::AuthenticationRequired);
        };

        let claims = match claims::decode(&access) {
            Ok(c) => c,
            Err(e) => {
                // Fail closed: an unreadable token is no token.
                tracing::warn!(err = %e, "stored access token is unreadable");
                return Err(AuthError::AuthenticationRequired);
            }
        };

        let remaining = claims.remaining(epoch_secs());
        let threshold = self.config.refresh_threshold();
        if remaining > threshold {
            self.arm_timer(remaining - threshold);
            return Ok(());
        }

        match self.perform_refresh().await {
            Ok(()) => Ok(()),
            // Renewal suppressed by the minimum interval: the current token
            // is still usable until its actual expiry.
            Err(AuthError::RefreshThrottled) if remaining > Duration::ZERO => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Opportunistic revalidation on tab-visibility or connectivity changes.
    pub async fn on_host_signal(self: &Arc<Self>, signal: HostSignal) {
        if self.session.read().await.access_token.is_none() {
            return;
        }
        tracing::debug!(signal = ?signal, "host signal, revalidating session");
        if let Err(e) = self.ensure_valid_token().await {
            tracing::debug!(err = %e, "revalidation after host signal failed");
        }
    }

    // -- Refresh --------------------------------------------------------------

    /// Run (or join) the refresh operation.
    ///
    /// At most one operation is in flight process-wide; concurrent callers
    /// park on it and are released in queue order with its single outcome.
    /// Operations are spaced by the minimum refresh interval.
    pub async fn perform_refresh(self: &Arc<Self>) -> Result<(), AuthError> {
        let waiter = {
            let mut gate = self.gate.lock().await;
            if gate.in_flight {
                let (tx, rx) = oneshot::channel();
                gate.waiters.push(tx);
                Some(rx)
            } else {
                if let Some(last) = gate.last_attempt {
                    if last.elapsed() < self.config.min_refresh_interval() {
                        tracing::debug!("refresh suppressed by minimum interval");
                        return Err(AuthError::RefreshThrottled);
                    }
                }
                gate.in_flight = true;
                gate.last_attempt = Some(Instant::now());
                None
            }
        };

        if let Some(rx) = waiter {
            return match rx.await {
                Ok(Ok(_access)) => Ok(()),
                Ok(Err(t)) => {
                    Err(AuthError::TokenRefreshFailed { reason: t.reason, code: t.code })
                }
                // The operation was dropped without resolving; treat as no session.
                Err(_) => Err(AuthError::AuthenticationRequired),
            };
        }

        let outcome = self.run_refresh().await;

        let waiters = {
            let mut gate = self.gate.lock().await;
            gate.in_flight = false;
            std::mem::take(&mut gate.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }

        match outcome {
            Ok(_) => Ok(()),
            Err(t) => Err(AuthError::TokenRefreshFailed { reason: t.reason, code: t.code }),
        }
    }

    /// The refresh state machine. Resolves once terminally: fresh tokens, or
    /// a cleared session plus a `Logout` event. Never retries indefinitely.
    async fn run_refresh(self: &Arc<Self>) -> RefreshOutcome {
        let refresh_token = self.session.read().await.refresh_token.clone();
        let Some(refresh_token) = refresh_token else {
            return self.fail_refresh(LogoutReason::RefreshError, None, "no refresh token").await;
        };

        let url = format!("{}{}", self.base_url, self.config.refresh_path);
        let mut backoff = self.config.backoff_base();
        let mut attempt = 1u32;
        let mut rate_limit_retries = 0u32;

        loop {
            match self.refresh_once(&url, &refresh_token).await {
                RefreshAttempt::Success { access, refresh } => {
                    self.adopt_tokens(&access, refresh.as_deref()).await;
                    let _ = self.event_tx.send(AuthEvent::RefreshSuccess);
                    tracing::info!("access token refreshed");
                    return Ok(access);
                }
                RefreshAttempt::Unauthorized { code } => {
                    return self
                        .fail_refresh(LogoutReason::TokenExpired, code, "refresh token rejected")
                        .await;
                }
                RefreshAttempt::RateLimited { retry_after } => {
                    // One server-scheduled retry; a second consecutive 429 is terminal.
                    if rate_limit_retries >= 1 {
                        return self
                            .fail_refresh(LogoutReason::RefreshFailed, None, "rate limited twice")
                            .await;
                    }
                    rate_limit_retries += 1;
                    let delay = retry_after.unwrap_or(backoff);
                    tracing::debug!(
                        delay_ms = delay.as_millis() as u64,
                        "refresh rate limited, rescheduling"
                    );
                    tokio::time::sleep(delay).await;
                }
                RefreshAttempt::Transient { message } => {
                    if attempt >= self.config.max_refresh_attempts {
                        tracing::error!(attempts = attempt, "refresh failed after all retries");
                        return self
                            .fail_refresh(LogoutReason::MaxRetriesExceeded, None, &message)
                            .await;
                    }
                    tracing::warn!(attempt, err = %message, "refresh attempt failed, retrying");
                    tokio::time::sleep(jittered(backoff, self.config.backoff_jitter)).await;
                    backoff = (backoff * 2).min(self.config.backoff_cap());
                    attempt += 1;
                }
                RefreshAttempt::Fatal { status, code, message } => {
                    tracing::warn!(status, err = %message, "refresh failed unrecoverably");
                    return self.fail_refresh(LogoutReason::RefreshError, code, &message).await;
                }
            }
        }
    }

    /// One refresh network call, classified for the state machine.
    async fn refresh_once(&self, url: &str, refresh_token: &str) -> RefreshAttempt {
        let resp = self
            .http
            .post(url)
            .timeout(self.config.refresh_timeout())
            .json(&RefreshRequest { refresh: refresh_token })
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return RefreshAttempt::Transient { message: format!("network error: {e}") },
        };

        let status = resp.status();
        if status.is_success() {
            return match resp.json::<RefreshResponse>().await {
                Ok(body) => RefreshAttempt::Success { access: body.access, refresh: body.refresh },
                Err(e) => RefreshAttempt::Transient { message: format!("parse response: {e}") },
            };
        }

        // Retry-After header carries seconds; the body hint carries millis.
        let header_delay = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = resp.text().await.unwrap_or_default();
        let parsed = ErrorBody::parse(&body);
        let code = parsed.as_ref().and_then(|b| b.error_code.clone());

        match status.as_u16() {
            401 => RefreshAttempt::Unauthorized { code },
            429 => {
                let retry_after = parsed
                    .as_ref()
                    .and_then(|b| b.retry_after)
                    .map(Duration::from_millis)
                    .or(header_delay);
                RefreshAttempt::RateLimited { retry_after }
            }
            s if s >= 500 => RefreshAttempt::Transient { message: format!("HTTP {status}") },
            s => {
                let message = parsed
                    .and_then(|b| b.detail)
                    .unwrap_or_else(|| format!("HTTP {status}"));
                RefreshAttempt::Fatal { status: s, code, message }
            }
        }
    }

    /// Replace the token pair atomically, persist, and re-arm renewal.
    async fn adopt_tokens(self: &Arc<Self>, access: &str, refresh: Option<&str>) {
        {
            let mut session = self.session.write().await;
            session.access_token = Some(access.to_owned());
            if let Some(refresh) = refresh {
                session.refresh_token = Some(refresh.to_owned());
            }
        }
        self.store.set(ACCESS_TOKEN_KEY, access);
        if let Some(refresh) = refresh {
            self.store.set(REFRESH_TOKEN_KEY, refresh);
        }
        self.rearm_from_token(access);
    }

    async fn fail_refresh(
        &self,
        reason: LogoutReason,
        code: Option<String>,
        message: &str,
    ) -> RefreshOutcome {
        self.clear_session().await;
        let _ = self.event_tx.send(AuthEvent::Logout { reason });
        tracing::warn!(reason = %reason, err = message, "session cleared after refresh failure");
        Err(TerminalRefresh { reason, code })
    }

    // -- Proactive timer ------------------------------------------------------

    fn rearm_from_token(self: &Arc<Self>, access: &str) {
        let Ok(claims) = claims::decode(access) else { return };
        let remaining = claims.remaining(epoch_secs());
        let threshold = self.config.refresh_threshold();
        if remaining > threshold {
            self.arm_timer(remaining - threshold);
        }
    }

    fn arm_timer(self: &Arc<Self>, delay: Duration) {
        let manager = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(manager) = manager.upgrade() {
                        if let Err(e) = manager.perform_refresh().await {
                            tracing::debug!(err = %e, "proactive refresh did not complete");
                        }
                    }
                }
            }
        });

        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = timer.take() {
            prev.abort();
        }
        *timer = Some(handle.abort_handle());
    }

    fn cancel_timer(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }

    // -- Cross-holder coordination --------------------------------------------

    /// Watch the store for mutations by other session holders: a removed
    /// access token is an authoritative revocation; a replaced one is adopted.
    pub fn watch_store(self: &Arc<Self>) {
        let mut rx = self.store.subscribe();
        let manager = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    change = rx.recv() => {
                        let change = match change {
                            Ok(c) => c,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                tracing::debug!(lagged = n, "store watcher lagged");
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };
                        let Some(manager) = manager.upgrade() else { break };
                        manager.apply_external_change(change).await;
                    }
                }
            }
        });
    }

    async fn apply_external_change(self: &Arc<Self>, change: StoreChange) {
        match change.key.as_str() {
            ACCESS_TOKEN_KEY => match change.new_value {
                None => {
                    tracing::info!("access token revoked by another session holder");
                    {
                        let mut session = self.session.write().await;
                        *session = SessionState::default();
                    }
                    self.cancel_timer();
                    let _ = self
                        .event_tx
                        .send(AuthEvent::Logout { reason: LogoutReason::SessionRevoked });
                }
                Some(token) => {
                    tracing::debug!("adopting access token refreshed elsewhere");
                    self.session.write().await.access_token = Some(token.clone());
                    self.rearm_from_token(&token);
                }
            },
            REFRESH_TOKEN_KEY => {
                if let Some(token) = change.new_value {
                    self.session.write().await.refresh_token = Some(token);
                }
            }
            _ => {}
        }
    }
}

/// Apply ±`jitter` fractional noise to a delay.
fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
    delay.mul_f64(factor)
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
