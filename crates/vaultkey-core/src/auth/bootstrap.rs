//! Session restore at application start.
//!
//! Runs once per process. In local-auth mode the chain is: access
//! credential in memory (normally absent after a fresh start) → renewal
//! credential from storage → exchange → who-am-I. With an identity
//! provider configured, the provider's push-based auth-state channel is
//! followed instead, for the application's lifetime.
//!
//! Every failure path settles in `Unauthenticated`; bootstrap never
//! surfaces an error to the caller.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::{ApiError, AuthBackend};
use crate::models::{CurrentUser, UserRole};

use super::claims::AccessClaims;
use super::provider::{IdentityProvider, ProviderUser};
use super::renewal::RenewalGate;
use super::store::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    CheckingProvider,
    CheckingLocalToken,
    Refreshing,
    FetchingUser,
    Ready,
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    Ready(CurrentUser),
    Unauthenticated,
}

/// Keeps the provider auth-state subscription alive. Dropping it tears
/// the listener task down on every exit path.
pub struct ProviderListener {
    task: JoinHandle<()>,
}

impl Drop for ProviderListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub type AuthChangeCallback = Arc<dyn Fn(Option<CurrentUser>) + Send + Sync>;

pub struct Bootstrapper {
    store: Arc<SessionStore>,
    gate: Arc<RenewalGate>,
    backend: Arc<dyn AuthBackend>,
    state: watch::Sender<BootstrapState>,
}

impl Bootstrapper {
    pub fn new(
        store: Arc<SessionStore>,
        gate: Arc<RenewalGate>,
        backend: Arc<dyn AuthBackend>,
    ) -> Self {
        let (state, _) = watch::channel(BootstrapState::CheckingLocalToken);
        Self {
            store,
            gate,
            backend,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    fn set(&self, next: BootstrapState) {
        debug!(state = ?next, "bootstrap state");
        self.state.send_replace(next);
    }

    /// Local-auth restore chain. Runs once per process start.
    pub async fn run(&self) -> BootstrapOutcome {
        self.set(BootstrapState::CheckingLocalToken);

        let access = match self.store.access() {
            Some(access) => access,
            None => {
                if self.store.renewal().is_none() {
                    self.set(BootstrapState::Unauthenticated);
                    return BootstrapOutcome::Unauthenticated;
                }
                self.set(BootstrapState::Refreshing);
                match self.gate.renew(None).await {
                    Ok(access) => access,
                    Err(e) => {
                        debug!(error = %e, "renewal exchange failed during bootstrap");
                        self.store.clear_all();
                        self.set(BootstrapState::Unauthenticated);
                        return BootstrapOutcome::Unauthenticated;
                    }
                }
            }
        };

        self.set(BootstrapState::FetchingUser);
        match self.backend.fetch_current_user(&access).await {
            Ok(user) => {
                info!(user = %user.id, "session restored");
                self.set(BootstrapState::Ready);
                BootstrapOutcome::Ready(user)
            }
            Err(e) => {
                debug!(error = %e, "who-am-I failed during bootstrap");
                self.store.clear_access();
                self.set(BootstrapState::Unauthenticated);
                BootstrapOutcome::Unauthenticated
            }
        }
    }

    /// Provider-mode bootstrap: apply the provider's current auth state,
    /// then follow changes until the returned listener is dropped.
    /// `on_change` fires for every change after the initial one.
    pub async fn run_with_provider(
        &self,
        provider: Arc<dyn IdentityProvider>,
        on_change: AuthChangeCallback,
    ) -> (BootstrapOutcome, ProviderListener) {
        self.set(BootstrapState::CheckingProvider);

        let mut rx = provider.auth_state();
        let initial = rx.borrow_and_update().clone();
        let outcome = match initial {
            Some(provider_user) => {
                self.set(BootstrapState::FetchingUser);
                match Self::adopt_provider_user(&self.store, provider.as_ref(), &provider_user)
                    .await
                {
                    Ok(user) => {
                        self.set(BootstrapState::Ready);
                        BootstrapOutcome::Ready(user)
                    }
                    Err(e) => {
                        debug!(error = %e, "provider credential mint failed during bootstrap");
                        self.set(BootstrapState::Unauthenticated);
                        BootstrapOutcome::Unauthenticated
                    }
                }
            }
            None => {
                self.set(BootstrapState::Unauthenticated);
                BootstrapOutcome::Unauthenticated
            }
        };

        let store = self.store.clone();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let current = rx.borrow_and_update().clone();
                match current {
                    Some(provider_user) => {
                        match Self::adopt_provider_user(&store, provider.as_ref(), &provider_user)
                            .await
                        {
                            Ok(user) => on_change(Some(user)),
                            Err(e) => {
                                debug!(error = %e, "provider credential mint failed");
                                store.clear_access();
                                on_change(None);
                            }
                        }
                    }
                    None => {
                        store.clear_access();
                        on_change(None);
                    }
                }
            }
        });

        (outcome, ProviderListener { task })
    }

    /// Mint an access credential for the provider user and derive the
    /// current-user record from it.
    async fn adopt_provider_user(
        store: &SessionStore,
        provider: &dyn IdentityProvider,
        provider_user: &ProviderUser,
    ) -> Result<CurrentUser, ApiError> {
        let minted = provider.id_token(false).await?;
        let claims = AccessClaims::decode(&minted.token)
            .map_err(|e| ApiError::InvalidResponse(format!("provider credential: {}", e)))?;
        store.set_access(minted.token.clone());

        // Provider claims carry no account-created date; the credential's
        // issue time is the closest stamp available.
        Ok(CurrentUser {
            id: provider_user.uid.clone(),
            email: provider_user
                .email
                .clone()
                .or(claims.email.clone())
                .unwrap_or_default(),
            display_name: provider_user
                .display_name
                .clone()
                .or(claims.name.clone()),
            role: UserRole::from_claim(claims.role.as_deref()),
            created_at: claims.issued_at().unwrap_or_else(chrono::Utc::now),
            last_login_at: None,
        })
    }
}
