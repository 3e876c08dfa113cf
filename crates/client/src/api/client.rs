// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request client.
//!
//! Wraps outbound HTTP calls with credential attachment and exactly-once
//! transparent retry after a token refresh. Concurrent 401s all join the
//! token manager's single in-flight refresh.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::api::routes::{Access, RouteTable};
use crate::auth::TokenManager;
use crate::error::{ApiError, AuthError, ErrorBody};

/// HTTP client for the storefront API.
pub struct ApiClient {
    base_url: String,
    routes: RouteTable,
    tokens: Arc<TokenManager>,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        routes: RouteTable,
        tokens: Arc<TokenManager>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { base_url: base_url.into(), routes, tokens, http }
    }

    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.call(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.call(Method::POST, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.call(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
        self.call(Method::DELETE, path, None).await
    }

    /// Perform one logical API call.
    ///
    /// Protected routes get a validity check up front, a bearer header, and
    /// a single refresh-and-replay on 401. A 401 on the replay is final.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let access = self.routes.classify(path);

        if access.requires_session() {
            match self.tokens.ensure_valid_token().await {
                Ok(()) => {}
                Err(AuthError::TokenRefreshFailed { reason, .. }) => {
                    return Err(ApiError::Refresh { reason });
                }
                Err(_) => return Err(ApiError::AuthenticationRequired),
            }
        }

        let resp = self.send_once(&method, path, body, access).await?;

        if resp.status() == StatusCode::UNAUTHORIZED && access.refreshable() {
            tracing::debug!(path, "401 received, refreshing before replay");
            match self.tokens.perform_refresh().await {
                Ok(()) => {}
                Err(AuthError::TokenRefreshFailed { reason, .. }) => {
                    return Err(ApiError::Refresh { reason });
                }
                Err(_) => return Err(ApiError::AuthenticationRequired),
            }
            // Exactly one replay; a second 401 falls through as a plain error.
            let retry = self.send_once(&method, path, body, access).await?;
            return Self::into_value(retry).await;
        }

        Self::into_value(resp).await
    }

    async fn send_once(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        access: Access,
    ) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method.clone(), &url);

        if access.requires_session() {
            if let Some(token) = self.tokens.access_token().await {
                req = req.bearer_auth(token);
            }
            if access == Access::Vendor {
                if let Some(vendor) = self.tokens.vendor_id().await {
                    req = req.header("X-Vendor-ID", vendor.to_string());
                }
            }
        }

        if let Some(body) = body {
            req = req.json(body);
        }

        req.send().await.map_err(|e| ApiError::Transport(e.to_string()))
    }

    /// Normalize the response: 2xx bodies parse as JSON (empty → null),
    /// everything else becomes a typed error carrying the backend's
    /// `{detail, error_code}` envelope when present.
    async fn into_value(resp: reqwest::Response) -> Result<Value, ApiError> {
        let status = resp.status();

        if status.is_success() {
            let bytes = resp.bytes().await.map_err(|e| ApiError::Transport(e.to_string()))?;
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes)
                .map_err(|e| ApiError::Transport(format!("invalid response body: {e}")));
        }

        let body = resp.text().await.unwrap_or_default();
        let parsed = ErrorBody::parse(&body);
        Err(ApiError::Http {
            status: status.as_u16(),
            code: parsed.as_ref().and_then(|b| b.error_code.clone()),
            message: parsed
                .and_then(|b| b.detail)
                .unwrap_or_else(|| if body.is_empty() { format!("HTTP {status}") } else { body }),
        })
    }
}
