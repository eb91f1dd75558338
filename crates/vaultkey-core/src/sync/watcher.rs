use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::auth::session::Session;
use crate::auth::storage::{StorageEvent, StorageMode, KEY_NAMESPACE};

/// Observer of sibling-instance storage changes.
///
/// While this instance is signed out, a credential-namespace write or a
/// sibling's switch to durable storage triggers the same restore chain
/// the bootstrapper runs. Failures stay silent; the instance just remains
/// signed out. Dropping the watcher aborts the observer task.
pub struct StorageWatcher {
    task: JoinHandle<()>,
}

impl StorageWatcher {
    pub fn spawn(session: Arc<Session>) -> Self {
        let mut events = session.storage_events();
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => Self::handle(&session, event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "storage event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { task }
    }

    async fn handle(session: &Arc<Session>, event: StorageEvent) {
        if session.is_authenticated() {
            return;
        }
        match event {
            StorageEvent::KeyChanged { key, .. } if key.starts_with(KEY_NAMESPACE) => {
                if session.restore_from_storage().await {
                    info!("session restored after sibling storage change");
                }
            }
            StorageEvent::ModeChanged {
                mode: StorageMode::Durable,
            } => {
                if session.store().renewal().is_some() && session.restore_from_storage().await {
                    info!("session restored after sibling switched to durable storage");
                }
            }
            _ => {}
        }
    }
}

impl Drop for StorageWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
