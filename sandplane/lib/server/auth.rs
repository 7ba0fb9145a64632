//! API key gate for client routes.
//!
//! Keys are read from `Authorization: Bearer <key>` or `X-Api-Key`. Runner and agent
//! routes never pass through here.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{config::API_KEY_HEADER, SandplaneError};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Decides whether an API key grants access to client routes.
#[async_trait]
pub trait ApiKeyValidator: Send + Sync {
    /// Whether authentication is enforced at all.
    fn enabled(&self) -> bool;

    /// Whether `key` is accepted.
    async fn validate(&self, key: &str) -> bool;
}

/// A fixed set of accepted keys. An empty set disables authentication.
#[derive(Debug, Clone, Default)]
pub struct StaticApiKeys {
    keys: HashSet<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StaticApiKeys {
    /// Accepts exactly `keys`.
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ApiKeyValidator for StaticApiKeys {
    fn enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    async fn validate(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Middleware
//--------------------------------------------------------------------------------------------------

/// Rejects requests without a valid API key with 401.
pub async fn require_api_key(
    State(validator): State<Arc<dyn ApiKeyValidator>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !validator.enabled() {
        return next.run(req).await;
    }

    let Some(key) = extract_api_key(req.headers()) else {
        return SandplaneError::Unauthorized("missing api key".to_string()).into_response();
    };

    if !validator.validate(&key).await {
        tracing::warn!(method = %req.method(), path = %req.uri().path(), "rejected invalid api key");
        return SandplaneError::Unauthorized("invalid api key".to_string()).into_response();
    }

    next.run(req).await
}

/// Pulls the API key out of the request headers.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let explicit = || {
        headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
    };

    bearer
        .or_else(explicit)
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
