// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session and token lifecycle: claims decoding, durable storage, and the
//! refresh state machine.

pub mod claims;
pub mod manager;
pub mod session;
pub mod store;

pub use manager::TokenManager;
pub use session::{Role, UserProfile};
pub use store::{FileStore, MemoryStore, SessionStore, StoreChange};

/// Storage key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "auth.access_token";
/// Storage key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "auth.refresh_token";
/// Storage key for the serialized [`UserProfile`].
pub const PROFILE_KEY: &str = "auth.profile";
/// Storage key for the vendor scope, mirrored out of the profile.
pub const VENDOR_ID_KEY: &str = "auth.vendor_id";

/// Current time as seconds since the Unix epoch.
pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
