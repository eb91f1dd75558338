//! Coalesced renewal exchange.
//!
//! The proactive timer and any number of 401-handling requests can all
//! decide to renew at the same moment. Exactly one exchange must reach
//! the server; everyone else waits on it and reuses the resulting
//! credential.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::api::{ApiError, AuthBackend};

use super::store::SessionStore;

pub struct RenewalGate {
    store: Arc<SessionStore>,
    backend: Arc<dyn AuthBackend>,
    /// Serializes exchanges. Held across the network call.
    inflight: Mutex<()>,
}

impl RenewalGate {
    pub fn new(store: Arc<SessionStore>, backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            store,
            backend,
            inflight: Mutex::new(()),
        }
    }

    /// Produce a usable access credential.
    ///
    /// `stale` is the credential the caller last saw fail (or None when
    /// the caller had none). When a concurrent renewal already replaced
    /// it, the replacement is returned without touching the network;
    /// otherwise exactly one exchange runs under the in-flight lock.
    pub async fn renew(&self, stale: Option<&str>) -> Result<String, ApiError> {
        let _inflight = self.inflight.lock().await;

        if let Some(current) = self.store.access() {
            let already_renewed = match stale {
                Some(seen) => seen != current,
                None => true,
            };
            if already_renewed {
                return Ok(current);
            }
        }

        let (renewal, area) = match self.store.renewal_with_area() {
            Some(found) => found,
            None => return Err(ApiError::Unauthorized),
        };
        // Keep the rotated credential in the area the original lived in,
        // even when this instance booted with a different default mode
        self.store.set_storage_mode(area);

        debug!("exchanging renewal credential");
        let pair = self.backend.exchange_renewal(&renewal).await?;
        self.store.set_access(pair.access.clone());
        if let Some(rotated) = pair.renewal.as_deref() {
            self.store.set_renewal(rotated);
        }
        Ok(pair.access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pair, MockBackend, TestStore};

    #[tokio::test]
    async fn test_concurrent_callers_share_one_exchange() {
        let harness = TestStore::new();
        let store = harness.store.clone();
        store.set_access("A1".to_string());
        store.set_renewal("R1");

        let backend = Arc::new(MockBackend::new());
        backend.queue_exchange(pair("A2", Some("R2")));
        let gate = Arc::new(RenewalGate::new(store.clone(), backend.clone()));

        let (a, b, c) = tokio::join!(
            gate.renew(Some("A1")),
            gate.renew(Some("A1")),
            gate.renew(Some("A1")),
        );
        for result in [a, b, c] {
            assert_eq!(result.expect("renewal failed"), "A2");
        }
        assert_eq!(backend.exchange_count(), 1);
        assert_eq!(store.renewal().as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_caller_without_credential_reuses_existing_access() {
        let harness = TestStore::new();
        let store = harness.store.clone();
        store.set_access("A1".to_string());

        let backend = Arc::new(MockBackend::new());
        let gate = RenewalGate::new(store, backend.clone());

        let access = gate.renew(None).await.expect("renewal failed");
        assert_eq!(access, "A1");
        assert_eq!(backend.exchange_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_renewal_credential_is_unauthorized() {
        let harness = TestStore::new();
        let backend = Arc::new(MockBackend::new());
        let gate = RenewalGate::new(harness.store.clone(), backend.clone());

        let result = gate.renew(None).await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert_eq!(backend.exchange_count(), 0);
    }

    #[tokio::test]
    async fn test_unrotated_renewal_credential_is_kept() {
        let harness = TestStore::new();
        let store = harness.store.clone();
        store.set_access("A1".to_string());
        store.set_renewal("R1");

        let backend = Arc::new(MockBackend::new());
        backend.queue_exchange(pair("A2", None));
        let gate = RenewalGate::new(store.clone(), backend.clone());

        let access = gate.renew(Some("A1")).await.expect("renewal failed");
        assert_eq!(access, "A2");
        assert_eq!(store.renewal().as_deref(), Some("R1"));
        assert_eq!(backend.exchange_renewals(), vec!["R1".to_string()]);
    }
}
