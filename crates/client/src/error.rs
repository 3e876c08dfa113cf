// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types surfaced by the client core.

use std::fmt;

use serde::Deserialize;

use crate::events::LogoutReason;

/// Errors produced by the token manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// A protected operation was attempted with no valid or refreshable session.
    AuthenticationRequired,
    /// A refresh was requested sooner than the minimum refresh interval.
    RefreshThrottled,
    /// The refresh operation ended terminally. The session has already been
    /// cleared and a [`crate::events::AuthEvent::Logout`] emitted.
    TokenRefreshFailed { reason: LogoutReason, code: Option<String> },
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthenticationRequired => f.write_str("authentication required"),
            Self::RefreshThrottled => f.write_str("refresh attempted within the minimum interval"),
            Self::TokenRefreshFailed { reason, .. } => {
                write!(f, "token refresh failed: {reason}")
            }
        }
    }
}

impl std::error::Error for AuthError {}

/// Errors produced by the API client.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// The target endpoint requires a session that could not be produced.
    AuthenticationRequired,
    /// Non-2xx response, normalized from the backend's error envelope.
    Http { status: u16, code: Option<String>, message: String },
    /// Transport-level failure: connect, timeout, or an unreadable body.
    Transport(String),
    /// A 401-triggered refresh ended terminally while servicing this call.
    Refresh { reason: LogoutReason },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthenticationRequired => f.write_str("authentication required"),
            Self::Http { status, code, message } => match code {
                Some(code) => write!(f, "HTTP {status} ({code}): {message}"),
                None => write!(f, "HTTP {status}: {message}"),
            },
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Refresh { reason } => write!(f, "session lost during request: {reason}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Error envelope returned by the storefront backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    /// Retry hint in milliseconds, sent with rate-limit responses.
    #[serde(default)]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    /// Parse a response body, tolerating non-JSON payloads.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}
