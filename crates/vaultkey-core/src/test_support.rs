//! Shared fixtures for the crate's tests: credential builders, a
//! scriptable auth backend, a scriptable HTTP transport, and a
//! temp-directory store harness.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use crate::api::client::{ApiRequest, ApiResponse, HttpTransport};
use crate::api::{ApiError, AuthBackend};
use crate::auth::claims::AccessClaims;
use crate::auth::storage::{CredentialStorage, StorageBus, StorageMode};
use crate::auth::store::SessionStore;
use crate::models::{CredentialPair, CurrentUser, SignInOutcome, UserRole};

/// Build a decodable access credential for `sub` expiring at `exp`.
pub(crate) fn access_token(sub: &str, exp: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({
            "sub": sub,
            "email": format!("{}@example.com", sub),
            "role": "member",
            "exp": exp.timestamp(),
            "iat": Utc::now().timestamp(),
        })
        .to_string(),
    );
    format!("{}.{}.sig", header, payload)
}

pub(crate) fn pair(access: &str, renewal: Option<&str>) -> CredentialPair {
    CredentialPair {
        access: access.to_string(),
        renewal: renewal.map(|r| r.to_string()),
    }
}

/// A session store over temp directories. `sibling()` creates a second
/// instance sharing the durable area and the event bus, the way a second
/// running client would.
pub(crate) struct TestStore {
    pub store: Arc<SessionStore>,
    pub bus: StorageBus,
    durable: Arc<TempDir>,
    _session: TempDir,
}

impl TestStore {
    pub fn new() -> Self {
        let durable = Arc::new(TempDir::new().expect("failed to create durable dir"));
        Self::with_shared(durable, StorageBus::new())
    }

    fn with_shared(durable: Arc<TempDir>, bus: StorageBus) -> Self {
        let session = TempDir::new().expect("failed to create session dir");
        let storage = CredentialStorage::new(
            durable.path().to_path_buf(),
            session.path().to_path_buf(),
            bus.clone(),
        );
        Self {
            store: Arc::new(SessionStore::new(storage, StorageMode::Session)),
            bus,
            durable,
            _session: session,
        }
    }

    pub fn sibling(&self) -> Self {
        Self::with_shared(self.durable.clone(), self.bus.clone())
    }
}

/// Scriptable [`AuthBackend`]: queue exchange results, set sign-in
/// outcomes, flip failure flags, count everything.
pub(crate) struct MockBackend {
    sign_in_outcome: Mutex<Option<SignInOutcome>>,
    second_factor_pair: Mutex<Option<CredentialPair>>,
    second_factor_codes: Mutex<Vec<(String, String)>>,
    exchanges: Mutex<VecDeque<CredentialPair>>,
    exchange_args: Mutex<Vec<String>>,
    exchange_count: AtomicUsize,
    fail_exchange: AtomicBool,
    fail_fetch: AtomicBool,
    fail_sign_out: AtomicBool,
    sign_out_count: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            sign_in_outcome: Mutex::new(None),
            second_factor_pair: Mutex::new(None),
            second_factor_codes: Mutex::new(Vec::new()),
            exchanges: Mutex::new(VecDeque::new()),
            exchange_args: Mutex::new(Vec::new()),
            exchange_count: AtomicUsize::new(0),
            fail_exchange: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            sign_out_count: AtomicUsize::new(0),
        }
    }

    pub fn set_sign_in(&self, outcome: SignInOutcome) {
        *self.sign_in_outcome.lock().expect("mock poisoned") = Some(outcome);
    }

    pub fn set_second_factor(&self, pair: CredentialPair) {
        *self.second_factor_pair.lock().expect("mock poisoned") = Some(pair);
    }

    pub fn queue_exchange(&self, pair: CredentialPair) {
        self.exchanges.lock().expect("mock poisoned").push_back(pair);
    }

    pub fn fail_exchanges(&self) {
        self.fail_exchange.store(true, Ordering::SeqCst);
    }

    pub fn fail_fetch_user(&self) {
        self.fail_fetch.store(true, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self) {
        self.fail_sign_out.store(true, Ordering::SeqCst);
    }

    pub fn exchange_count(&self) -> usize {
        self.exchange_count.load(Ordering::SeqCst)
    }

    pub fn exchange_renewals(&self) -> Vec<String> {
        self.exchange_args.lock().expect("mock poisoned").clone()
    }

    pub fn second_factor_codes(&self) -> Vec<(String, String)> {
        self.second_factor_codes.lock().expect("mock poisoned").clone()
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_out_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthBackend for MockBackend {
    async fn sign_in(&self, _identifier: &str, _secret: &str) -> Result<SignInOutcome, ApiError> {
        match self.sign_in_outcome.lock().expect("mock poisoned").clone() {
            Some(outcome) => Ok(outcome),
            None => Err(ApiError::Unauthorized),
        }
    }

    async fn verify_second_factor(
        &self,
        challenge: &str,
        code: &str,
    ) -> Result<CredentialPair, ApiError> {
        self.second_factor_codes
            .lock()
            .expect("mock poisoned")
            .push((challenge.to_string(), code.to_string()));
        match self.second_factor_pair.lock().expect("mock poisoned").clone() {
            Some(pair) => Ok(pair),
            None => Err(ApiError::Unauthorized),
        }
    }

    async fn exchange_renewal(&self, renewal: &str) -> Result<CredentialPair, ApiError> {
        self.exchange_count.fetch_add(1, Ordering::SeqCst);
        self.exchange_args
            .lock()
            .expect("mock poisoned")
            .push(renewal.to_string());
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized);
        }
        match self.exchanges.lock().expect("mock poisoned").pop_front() {
            Some(pair) => Ok(pair),
            None => Err(ApiError::ServerError("no exchange scripted".to_string())),
        }
    }

    async fn fetch_current_user(&self, access: &str) -> Result<CurrentUser, ApiError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ApiError::ServerError("who-am-I unavailable".to_string()));
        }
        let claims = AccessClaims::decode(access)
            .map_err(|e| ApiError::InvalidResponse(format!("mock credential: {}", e)))?;
        Ok(CurrentUser {
            id: claims.sub.clone(),
            email: claims
                .email
                .clone()
                .unwrap_or_else(|| format!("{}@example.com", claims.sub)),
            display_name: claims.name.clone(),
            role: UserRole::from_claim(claims.role.as_deref()),
            created_at: Utc::now(),
            last_login_at: None,
        })
    }

    async fn sign_out(&self, _access: Option<&str>) -> Result<(), ApiError> {
        self.sign_out_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(ApiError::ServerError("logout unavailable".to_string()));
        }
        Ok(())
    }
}

/// Scriptable [`HttpTransport`]: returns queued responses in order and
/// records every request it saw.
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<(u16, String)>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<(u16, String)>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("mock poisoned").len()
    }

    pub fn bearers(&self) -> Vec<Option<String>> {
        self.requests
            .lock()
            .expect("mock poisoned")
            .iter()
            .map(|r| r.bearer.clone())
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.lock().expect("mock poisoned").push(request);
        match self.responses.lock().expect("mock poisoned").pop_front() {
            Some((status, body)) => Ok(ApiResponse { status, body }),
            None => Err(ApiError::ServerError("transport script exhausted".to_string())),
        }
    }
}
