//! Authenticated API client for product endpoints.
//!
//! Every call attaches the current access credential as a bearer header.
//! A 401 triggers one renewal through the shared gate followed by one
//! retry with the fresh credential; a second 401 propagates untouched.
//! Rate-limited calls back off and retry independently of that rule.
//!
//! The wire is behind the small `HttpTransport` trait so tests can script
//! responses and count calls; production uses the reqwest transport.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::auth::renewal::RenewalGate;
use crate::auth::store::SessionStore;

use super::ApiError;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
/// 1 second is polite to the server while not making users wait too long.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// One outgoing call, transport-agnostic.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
    pub bearer: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// Production transport over a pooled reqwest client.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut builder = self.client.request(request.method, &request.url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(bearer) = &request.bearer {
            builder = builder.bearer_auth(bearer);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(ApiResponse { status, body })
    }
}

/// API client for the VaultKey service.
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    store: Arc<SessionStore>,
    gate: Arc<RenewalGate>,
    on_session_expired: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        store: Arc<SessionStore>,
        gate: Arc<RenewalGate>,
    ) -> Result<Self> {
        Ok(Self::with_transport(
            Arc::new(ReqwestTransport::new()?),
            base_url,
            store,
            gate,
        ))
    }

    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        base_url: impl Into<String>,
        store: Arc<SessionStore>,
        gate: Arc<RenewalGate>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            store,
            gate,
            on_session_expired: None,
        }
    }

    /// Hook fired when a renewal attempt on the 401 path fails and the
    /// session is cleared. The UI layer uses it to show its sign-in
    /// surface.
    pub fn on_session_expired(mut self, hook: Arc<dyn Fn() + Send + Sync>) -> Self {
        self.on_session_expired = Some(hook);
        self
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(Method::GET, path, None).await?;
        Self::decode(&response, path)
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("request body: {}", e)))?;
        let response = self.execute(Method::POST, path, Some(body)).await?;
        Self::decode(&response, path)
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(Method::DELETE, path, None).await?;
        Ok(())
    }

    /// Issue a request with the retry-once-on-401 rule. Returns only
    /// successful responses; everything else maps to an `ApiError`.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let access = self.store.access();

        let first = self
            .issue(ApiRequest {
                method: method.clone(),
                url: url.clone(),
                body: body.clone(),
                bearer: access.clone(),
            })
            .await?;
        if first.status != 401 {
            return Self::check(first);
        }

        // One renewal-and-retry per original request. The gate coalesces
        // concurrent callers into a single exchange.
        let fresh = match self.gate.renew(access.as_deref()).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(error = %e, "renewal after 401 failed, clearing session");
                self.store.clear_all();
                if let Some(hook) = &self.on_session_expired {
                    hook();
                }
                return Err(e);
            }
        };

        debug!(path, "retrying with renewed credential");
        let second = self
            .issue(ApiRequest {
                method,
                url,
                body,
                bearer: Some(fresh),
            })
            .await?;
        // A 401 here propagates as-is; never a third attempt
        Self::check(second)
    }

    /// Send one logical request, backing off and retrying while the
    /// server answers 429.
    async fn issue(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.transport.send(request.clone()).await?;
            if response.status != 429 {
                return Ok(response);
            }
            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(
                url = %request.url,
                retry = retries,
                backoff_ms,
                "Rate limited, backing off"
            );
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2; // Exponential backoff
        }
    }

    fn check(response: ApiResponse) -> Result<ApiResponse, ApiError> {
        if (200..300).contains(&response.status) {
            Ok(response)
        } else {
            Err(ApiError::from_status(response.status, &response.body))
        }
    }

    fn decode<T: DeserializeOwned>(response: &ApiResponse, path: &str) -> Result<T, ApiError> {
        serde_json::from_str(&response.body)
            .map_err(|e| ApiError::InvalidResponse(format!("response from {}: {}", path, e)))
    }
}
