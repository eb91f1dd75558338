//! Proactive renewal timer.
//!
//! Arms one deferred renewal at `expiry - lead` and re-arms itself from
//! each fresh credential. A deadline already in the past arms nothing;
//! the 401 path covers that case reactively. The timer task is aborted on
//! disarm, on re-arm, and on drop, so a renewal can never fire for a
//! session that ended.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::claims::AccessClaims;
use super::renewal::RenewalGate;

pub type FailureCallback = Arc<dyn Fn() + Send + Sync>;

pub struct ExpiryScheduler {
    gate: Arc<RenewalGate>,
    lead: Duration,
    on_failure: FailureCallback,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ExpiryScheduler {
    pub fn new(gate: Arc<RenewalGate>, lead: Duration, on_failure: FailureCallback) -> Self {
        Self {
            gate,
            lead,
            on_failure,
            task: Mutex::new(None),
        }
    }

    /// Arm the renewal timer from the given access credential's embedded
    /// expiry. Replaces any previously armed timer.
    pub fn arm(&self, access: &str) {
        self.disarm();

        let claims = match AccessClaims::decode(access) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "credential claims undecodable, not arming renewal timer");
                return;
            }
        };
        let renew_at = claims.renew_at(self.lead);
        if renew_at <= Utc::now() {
            debug!("renewal deadline already passed, relying on reactive renewal");
            return;
        }

        let gate = self.gate.clone();
        let lead = self.lead;
        let on_failure = self.on_failure.clone();
        let mut current = access.to_string();
        let mut deadline = renew_at;

        let handle = tokio::spawn(async move {
            loop {
                let wait = (deadline - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                tokio::time::sleep(wait).await;

                match gate.renew(Some(&current)).await {
                    Ok(fresh) => {
                        let next = match AccessClaims::decode(&fresh) {
                            Ok(claims) => claims.renew_at(lead),
                            Err(e) => {
                                debug!(error = %e, "renewed credential undecodable, stopping timer");
                                break;
                            }
                        };
                        if next <= Utc::now() {
                            debug!("renewed credential expires too soon to re-arm");
                            break;
                        }
                        debug!(renew_at = %next, "renewal timer re-armed");
                        current = fresh;
                        deadline = next;
                    }
                    Err(e) => {
                        warn!(error = %e, "proactive renewal failed, signing out");
                        on_failure();
                        break;
                    }
                }
            }
        });

        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        *task = Some(handle);
    }

    /// Cancel the pending renewal, if any.
    pub fn disarm(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
