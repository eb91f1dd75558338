//! Session service object.
//!
//! One `Session` per client instance, constructed at startup and dropped
//! at teardown. It owns the store, the renewal gate, the proactive
//! scheduler, and the local cache, and is the only place session state
//! transitions happen. Tests build fresh instances; nothing here is
//! process-global.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use chrono::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::api::AuthBackend;
use crate::cache::CacheManager;
use crate::models::{CredentialPair, CurrentUser, SignInOutcome};

use super::bootstrap::{BootstrapOutcome, Bootstrapper, ProviderListener};
use super::claims::RENEW_LEAD_SECONDS;
use super::provider::IdentityProvider;
use super::renewal::RenewalGate;
use super::scheduler::ExpiryScheduler;
use super::storage::{StorageEvent, StorageMode};
use super::store::SessionStore;

/// Session phase as a single tagged union. Invalid combinations such as
/// "loading and authenticated at once" cannot be represented.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    /// Sign-in succeeded up to the second factor; no credentials exist yet.
    AwaitingSecondFactor { challenge: String },
    /// A restore or renewal is in flight.
    Refreshing,
    Authenticated { user: CurrentUser },
}

impl SessionState {
    pub fn user(&self) -> Option<&CurrentUser> {
        match self {
            SessionState::Authenticated { user } => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::AwaitingSecondFactor { .. } => "awaiting-second-factor",
            SessionState::Refreshing => "refreshing",
            SessionState::Authenticated { .. } => "authenticated",
        }
    }
}

pub struct Session {
    store: Arc<SessionStore>,
    backend: Arc<dyn AuthBackend>,
    gate: Arc<RenewalGate>,
    scheduler: ExpiryScheduler,
    cache: CacheManager,
    bootstrapper: Bootstrapper,
    provider: Option<Arc<dyn IdentityProvider>>,
    provider_listener: Mutex<Option<ProviderListener>>,
    state: watch::Sender<SessionState>,
    bootstrapped: AtomicBool,
}

impl Session {
    pub fn new(
        store: Arc<SessionStore>,
        backend: Arc<dyn AuthBackend>,
        cache: CacheManager,
    ) -> Self {
        Self::build(store, backend, cache, None)
    }

    /// Construct a session that authenticates through a hosted identity
    /// provider instead of the local auth endpoints.
    pub fn with_identity_provider(
        store: Arc<SessionStore>,
        backend: Arc<dyn AuthBackend>,
        cache: CacheManager,
        provider: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self::build(store, backend, cache, Some(provider))
    }

    fn build(
        store: Arc<SessionStore>,
        backend: Arc<dyn AuthBackend>,
        cache: CacheManager,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        let gate = Arc::new(RenewalGate::new(store.clone(), backend.clone()));

        // Proactive renewal failing means the renewal credential is dead:
        // clear locally, no server round-trip with a credential that just
        // failed to renew.
        let failure_store = store.clone();
        let failure_state = state.clone();
        let scheduler = ExpiryScheduler::new(
            gate.clone(),
            Duration::seconds(RENEW_LEAD_SECONDS),
            Arc::new(move || {
                failure_store.clear_all();
                failure_state.send_replace(SessionState::Unauthenticated);
            }),
        );

        let bootstrapper = Bootstrapper::new(store.clone(), gate.clone(), backend.clone());

        Self {
            store,
            backend,
            gate,
            scheduler,
            cache,
            bootstrapper,
            provider,
            provider_listener: Mutex::new(None),
            state,
            bootstrapped: AtomicBool::new(false),
        }
    }

    // ===== Observation =====

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        self.state.borrow().user().cloned()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn store(&self) -> Arc<SessionStore> {
        self.store.clone()
    }

    pub fn renewal_gate(&self) -> Arc<RenewalGate> {
        self.gate.clone()
    }

    pub fn storage_events(&self) -> broadcast::Receiver<StorageEvent> {
        self.store.subscribe_events()
    }

    fn transition(&self, next: SessionState) {
        let from = self.state.borrow().label();
        debug!(from, to = next.label(), "session transition");
        self.state.send_replace(next);
    }

    // ===== Sign-in =====

    /// Sign in with an identifier and secret. `mode` decides where the
    /// renewal credential lands, so it is applied before anything is
    /// written. Credential errors (wrong password) propagate to the
    /// caller; they are the actionable kind.
    pub async fn sign_in(
        &self,
        identifier: &str,
        secret: &str,
        mode: StorageMode,
    ) -> Result<SessionState> {
        self.store.set_storage_mode(mode);
        match self
            .backend
            .sign_in(identifier, secret)
            .await
            .context("sign-in request failed")?
        {
            SignInOutcome::SecondFactorRequired { challenge } => {
                debug!("second factor required");
                self.transition(SessionState::AwaitingSecondFactor { challenge });
                Ok(self.state())
            }
            SignInOutcome::Credentials(pair) => self.install_pair(pair).await,
        }
    }

    /// Complete a pending second-factor challenge.
    pub async fn verify_second_factor(&self, code: &str) -> Result<SessionState> {
        let challenge = match self.state() {
            SessionState::AwaitingSecondFactor { challenge } => challenge,
            other => bail!("no second-factor challenge pending (state: {})", other.label()),
        };
        let pair = self
            .backend
            .verify_second_factor(&challenge, code)
            .await
            .context("second-factor verification failed")?;
        self.install_pair(pair).await
    }

    async fn install_pair(&self, pair: CredentialPair) -> Result<SessionState> {
        self.store.set_access(pair.access.clone());
        if let Some(renewal) = pair.renewal.as_deref() {
            self.store.set_renewal(renewal);
        }
        let user = self
            .backend
            .fetch_current_user(&pair.access)
            .await
            .context("who-am-I after sign-in failed")?;
        self.scheduler.arm(&pair.access);
        self.adopt_user(user);
        Ok(self.state())
    }

    /// Make `user` the authenticated subject. A different subject than
    /// the one cached locally invalidates every cached record first.
    fn adopt_user(&self, user: CurrentUser) {
        match self.cache.load_current_user() {
            Ok(Some(cached)) if cached.data.id != user.id => {
                info!(
                    previous = %cached.data.id,
                    current = %user.id,
                    last_seen = %cached.cached_at,
                    "authenticated subject changed, dropping local cache"
                );
                if let Err(e) = self.cache.clear_all() {
                    warn!(error = %e, "failed to drop local cache");
                }
            }
            Err(e) => debug!(error = %e, "cached current user unreadable"),
            _ => {}
        }
        if let Err(e) = self.cache.save_current_user(&user) {
            debug!(error = %e, "failed to cache current user");
        }
        self.transition(SessionState::Authenticated { user });
    }

    // ===== Sign-out =====

    /// End the session. The server call is best-effort; local state is
    /// cleared regardless of its result.
    pub async fn sign_out(&self) {
        let access = self.store.access();
        self.scheduler.disarm();
        if let Err(e) = self.backend.sign_out(access.as_deref()).await {
            debug!(error = %e, "server sign-out failed, clearing locally anyway");
        }
        self.store.clear_all();
        self.transition(SessionState::Unauthenticated);
    }

    // ===== Restore =====

    /// Restore the session at application start. Runs at most once; later
    /// calls return the current state unchanged.
    pub async fn bootstrap(&self) -> SessionState {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            return self.state();
        }

        if let Some(provider) = self.provider.clone() {
            let change_state = self.state.clone();
            let on_change: super::bootstrap::AuthChangeCallback = Arc::new(move |user| {
                let next = match user {
                    Some(user) => SessionState::Authenticated { user },
                    None => SessionState::Unauthenticated,
                };
                change_state.send_replace(next);
            });
            let (outcome, listener) = self
                .bootstrapper
                .run_with_provider(provider, on_change)
                .await;
            *self
                .provider_listener
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(listener);
            match outcome {
                BootstrapOutcome::Ready(user) => self.adopt_user(user),
                BootstrapOutcome::Unauthenticated => {
                    self.transition(SessionState::Unauthenticated)
                }
            }
            return self.state();
        }

        self.transition(SessionState::Refreshing);
        match self.bootstrapper.run().await {
            BootstrapOutcome::Ready(user) => {
                if let Some(access) = self.store.access() {
                    self.scheduler.arm(&access);
                }
                self.adopt_user(user);
            }
            BootstrapOutcome::Unauthenticated => {
                self.transition(SessionState::Unauthenticated)
            }
        }
        self.state()
    }

    /// React to the API client clearing the session after a failed
    /// renewal on the 401 path. Wire this as the client's
    /// session-expired hook so the observed state reaches
    /// `Unauthenticated` and the UI can show its sign-in surface.
    pub fn handle_session_expired(&self) {
        self.scheduler.disarm();
        self.store.clear_all();
        self.transition(SessionState::Unauthenticated);
    }

    /// Restore triggered by a sibling instance's storage write. Unlike
    /// [`Session::bootstrap`] this is re-entrant and silent: every failure
    /// leaves the session signed out and returns false.
    pub async fn restore_from_storage(&self) -> bool {
        if self.is_authenticated() {
            return true;
        }

        let access = match self.store.access() {
            Some(access) => access,
            None => match self.gate.renew(None).await {
                Ok(access) => access,
                Err(e) => {
                    debug!(error = %e, "storage restore failed at exchange");
                    return false;
                }
            },
        };

        match self.backend.fetch_current_user(&access).await {
            Ok(user) => {
                self.scheduler.arm(&access);
                self.adopt_user(user);
                true
            }
            Err(e) => {
                debug!(error = %e, "storage restore failed at who-am-I");
                false
            }
        }
    }
}
