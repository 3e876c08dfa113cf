// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed events emitted for the presentation layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a session was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    /// The refresh token itself was rejected by the backend.
    TokenExpired,
    /// Transient refresh failures exhausted the attempt budget.
    MaxRetriesExceeded,
    /// The refresh operation ended without producing a token.
    RefreshFailed,
    /// The backend answered the refresh with an unexpected status.
    RefreshError,
    /// Another session holder cleared the stored tokens.
    SessionRevoked,
    /// Explicit logout requested by the application.
    UserRequested,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenExpired => "token_expired",
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::RefreshFailed => "refresh_failed",
            Self::RefreshError => "refresh_error",
            Self::SessionRevoked => "session_revoked",
            Self::UserRequested => "user_requested",
        }
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events broadcast by the token manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuthEvent {
    /// A refresh completed and fresh tokens are stored.
    RefreshSuccess,
    /// The session was cleared; the UI should return to the login flow.
    Logout { reason: LogoutReason },
}

/// Environment notifications the host forwards for opportunistic
/// revalidation (tab became visible, connectivity restored).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    BecameVisible,
    Online,
}
