// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Access token claims decoding.
//!
//! The backend issues JWT-shaped tokens; the client only reads the payload
//! claims locally (no signature verification — the backend is the authority).
//! Decoding never falls back to defaults: an unreadable token is an error the
//! caller must treat as "no token".

use std::fmt;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

/// Claims carried in the access token payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Claims {
    /// Expiry as seconds since the Unix epoch.
    pub exp: u64,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub vendor_id: Option<u64>,
}

impl Claims {
    /// Lifetime left at `now` (epoch seconds); zero when already expired.
    pub fn remaining(&self, now: u64) -> Duration {
        Duration::from_secs(self.exp.saturating_sub(now))
    }
}

/// Why a token could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimsError {
    /// Not three dot-separated segments.
    MalformedToken,
    /// Payload segment is not base64url JSON.
    InvalidPayload,
    /// Payload parsed but carries no usable `exp` claim.
    MissingExpiry,
}

impl fmt::Display for ClaimsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedToken => f.write_str("malformed token"),
            Self::InvalidPayload => f.write_str("invalid token payload"),
            Self::MissingExpiry => f.write_str("token has no expiry claim"),
        }
    }
}

impl std::error::Error for ClaimsError {}

/// Decode the payload claims of an access token.
pub fn decode(token: &str) -> Result<Claims, ClaimsError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_header), Some(payload), Some(_signature), None) => payload,
        _ => return Err(ClaimsError::MalformedToken),
    };

    // Tokens are unpadded base64url; strip padding from lenient issuers.
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| ClaimsError::InvalidPayload)?;

    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|_| ClaimsError::InvalidPayload)?;
    if value.get("exp").and_then(|v| v.as_u64()).is_none() {
        return Err(ClaimsError::MissingExpiry);
    }

    serde_json::from_value(value).map_err(|_| ClaimsError::InvalidPayload)
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
