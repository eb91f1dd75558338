//! Claims embedded in the access credential.
//!
//! The access credential is a compact three-segment token whose payload
//! segment decodes locally (base64url + JSON) into [`AccessClaims`]. No
//! signature verification happens here: the claims only feed display and
//! renewal scheduling, the server remains the authority on every call.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

/// Lead time before expiry at which the proactive renewal fires.
/// 60s leaves room for one exchange round-trip on a slow connection.
pub const RENEW_LEAD_SECONDS: i64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    /// Subject id of the authenticated account.
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

impl AccessClaims {
    /// Decode the payload segment of an access credential.
    pub fn decode(credential: &str) -> Result<Self> {
        let payload = credential
            .split('.')
            .nth(1)
            .ok_or_else(|| anyhow!("credential has no payload segment"))?;
        let raw = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .context("credential payload is not base64url")?;
        serde_json::from_slice(&raw).context("credential payload is not valid JSON")
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        // An out-of-range exp counts as already expired
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|iat| Utc.timestamp_opt(iat, 0).single())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    /// When the proactive renewal should run for this credential.
    pub fn renew_at(&self, lead: Duration) -> DateTime<Utc> {
        self.expires_at() - lead
    }
}
