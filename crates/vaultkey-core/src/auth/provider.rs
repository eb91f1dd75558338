//! External identity-provider seam.
//!
//! When the deployment authenticates through a hosted identity provider
//! instead of the local /auth endpoints, the provider pushes auth-state
//! changes and mints access credentials on demand. Only this small
//! contract is consumed; the provider SDK itself stays outside the crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::api::ApiError;

/// The provider's notion of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUser {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// An access credential minted by the provider.
#[derive(Debug, Clone)]
pub struct ProviderToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Push-based auth-state channel. The receiver's current value is the
    /// provider's present user; every change is delivered to subscribers.
    fn auth_state(&self) -> watch::Receiver<Option<ProviderUser>>;

    /// Mint an access credential for the current provider user.
    async fn id_token(&self, force_refresh: bool) -> Result<ProviderToken, ApiError>;
}
