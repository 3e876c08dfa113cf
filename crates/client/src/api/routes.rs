// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-endpoint access declarations.
//!
//! Endpoints are classified by an explicit prefix table instead of guessing
//! from path fragments at call sites. Longest prefix wins; unknown paths are
//! treated as protected so new endpoints fail closed.

/// Access class required by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No credentials attached; anonymous browsing.
    Public,
    /// Login/token endpoints — never attach a bearer token and never
    /// trigger a refresh on 401.
    Auth,
    /// Requires a valid session.
    Protected,
    /// Requires a valid session plus the vendor scope header.
    Vendor,
}

impl Access {
    /// Whether a session must be established before calling.
    pub fn requires_session(&self) -> bool {
        matches!(self, Self::Protected | Self::Vendor)
    }

    /// Whether a 401 response should trigger a refresh-and-replay.
    pub fn refreshable(&self) -> bool {
        matches!(self, Self::Protected | Self::Vendor)
    }
}

/// Ordered prefix rules mapping endpoint paths to their access class.
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<(String, Access)>,
}

impl RouteTable {
    pub fn new(mut rules: Vec<(String, Access)>) -> Self {
        // Longest prefix first so the first hit is the most specific rule.
        rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { rules }
    }

    pub fn classify(&self, path: &str) -> Access {
        for (prefix, access) in &self.rules {
            if path.starts_with(prefix.as_str()) {
                return *access;
            }
        }
        Access::Protected
    }

    /// The storefront API catalog.
    pub fn storefront() -> Self {
        Self::new(vec![
            ("/api/products".to_owned(), Access::Public),
            ("/api/categories".to_owned(), Access::Public),
            ("/api/search".to_owned(), Access::Public),
            ("/api/reviews".to_owned(), Access::Public),
            ("/api/token/".to_owned(), Access::Auth),
            ("/api/auth/".to_owned(), Access::Auth),
            ("/api/cart".to_owned(), Access::Protected),
            ("/api/orders".to_owned(), Access::Protected),
            ("/api/profile".to_owned(), Access::Protected),
            ("/api/chat".to_owned(), Access::Protected),
            ("/api/vendor/".to_owned(), Access::Vendor),
        ])
    }
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
