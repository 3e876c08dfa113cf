// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session data model and refresh endpoint wire types.

use serde::{Deserialize, Serialize};

/// Role attached to the authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Vendor,
}

/// Profile of the authenticated user, persisted alongside the tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// In-memory session state guarded by the manager's lock.
///
/// Token pairs are replaced as a unit under the write lock: the old pair is
/// only discarded once the replacement is in place.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub profile: Option<UserProfile>,
}

/// Body sent to the refresh endpoint.
#[derive(Debug, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Successful refresh response. The backend may rotate the refresh token.
#[derive(Debug, Deserialize)]
pub(crate) struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}
