//! Auth endpoint contract and its HTTP implementation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::debug;

use crate::models::{CredentialPair, CurrentUser, SignInOutcome, UserRole};

use super::ApiError;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Contract for the auth endpoints of the VaultKey service.
///
/// The session layer only talks to this trait; the reqwest implementation
/// lives in [`HttpAuthBackend`] and tests substitute their own.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Exchange an identifier and secret for credentials, or receive a
    /// second-factor challenge.
    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<SignInOutcome, ApiError>;

    /// Complete a pending second-factor challenge.
    async fn verify_second_factor(
        &self,
        challenge: &str,
        code: &str,
    ) -> Result<CredentialPair, ApiError>;

    /// Exchange the renewal credential for a fresh pair.
    async fn exchange_renewal(&self, renewal: &str) -> Result<CredentialPair, ApiError>;

    /// Who-am-I lookup with the given access credential.
    async fn fetch_current_user(&self, access: &str) -> Result<CurrentUser, ApiError>;

    /// Server-side sign-out. Best-effort: callers clear local state
    /// regardless of the result.
    async fn sign_out(&self, access: Option<&str>) -> Result<(), ApiError>;
}

/// Reqwest-backed implementation of [`AuthBackend`].
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthBackend {
    client: Client,
    base_url: String,
}

impl HttpAuthBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<SignInOutcome, ApiError> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .header(header::ACCEPT, "application/json")
            .json(&serde_json::json!({
                "email": identifier,
                "password": secret,
            }))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("login response: {}", e)))?;

        Ok(login.into_outcome())
    }

    async fn verify_second_factor(
        &self,
        challenge: &str,
        code: &str,
    ) -> Result<CredentialPair, ApiError> {
        let response = self
            .client
            .post(self.url("/auth/mfa/verify"))
            .json(&serde_json::json!({
                "challenge": challenge,
                "code": code,
            }))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let pair: TokenPairResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("mfa response: {}", e)))?;
        Ok(pair.into_pair())
    }

    async fn exchange_renewal(&self, renewal: &str) -> Result<CredentialPair, ApiError> {
        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&serde_json::json!({ "refreshToken": renewal }))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let pair: TokenPairResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("refresh response: {}", e)))?;
        Ok(pair.into_pair())
    }

    async fn fetch_current_user(&self, access: &str) -> Result<CurrentUser, ApiError> {
        let response = self
            .client
            .get(self.url("/auth/me"))
            .bearer_auth(access)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("who-am-I response: {}", e)))?;
        Ok(user.into_user())
    }

    async fn sign_out(&self, access: Option<&str>) -> Result<(), ApiError> {
        let mut request = self.client.post(self.url("/auth/logout"));
        if let Some(token) = access {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        Self::check_response(response).await?;
        debug!("server sign-out acknowledged");
        Ok(())
    }
}

// Internal API response types for parsing

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "accessToken", default)]
    access_token: Option<String>,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
    #[serde(rename = "requiresSecondFactor", default)]
    requires_second_factor: bool,
    #[serde(rename = "secondFactorChallenge", default)]
    second_factor_challenge: Option<String>,
}

impl LoginResponse {
    fn into_outcome(self) -> SignInOutcome {
        if self.requires_second_factor {
            return SignInOutcome::SecondFactorRequired {
                challenge: self.second_factor_challenge.unwrap_or_default(),
            };
        }
        SignInOutcome::Credentials(CredentialPair {
            access: self.access_token.unwrap_or_default(),
            renewal: self.refresh_token,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenPairResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
}

impl TokenPairResponse {
    fn into_pair(self) -> CredentialPair {
        CredentialPair {
            access: self.access_token,
            renewal: self.refresh_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    email: String,
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "lastLoginAt", default)]
    last_login_at: Option<DateTime<Utc>>,
}

impl UserResponse {
    fn into_user(self) -> CurrentUser {
        CurrentUser {
            id: self.id,
            email: self.email,
            display_name: self.display_name,
            role: UserRole::from_claim(self.role.as_deref()),
            created_at: self.created_at,
            last_login_at: self.last_login_at,
        }
    }
}
