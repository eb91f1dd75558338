//! In-process session store.
//!
//! Single shared mutable resource of one client instance. The access
//! credential is memory-only and synchronous to read; the renewal
//! credential is delegated to the file-backed storage areas. Writes are
//! idempotent replacements, last write wins.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use super::storage::{CredentialStorage, StorageEvent, StorageMode, RENEWAL_KEY};

pub type ModeCallback = Box<dyn Fn(StorageMode) + Send + Sync>;

pub struct SessionStore {
    /// Memory-only; never written to either storage area.
    access: Mutex<Option<String>>,
    mode: Mutex<StorageMode>,
    mode_listeners: Mutex<Vec<ModeCallback>>,
    storage: CredentialStorage,
}

impl SessionStore {
    pub fn new(storage: CredentialStorage, initial_mode: StorageMode) -> Self {
        Self {
            access: Mutex::new(None),
            mode: Mutex::new(initial_mode),
            mode_listeners: Mutex::new(Vec::new()),
            storage,
        }
    }

    // ===== Access credential (memory only) =====

    pub fn set_access(&self, credential: String) {
        let mut access = self.access.lock().unwrap_or_else(|e| e.into_inner());
        *access = Some(credential);
    }

    pub fn access(&self) -> Option<String> {
        self.access
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear_access(&self) {
        let mut access = self.access.lock().unwrap_or_else(|e| e.into_inner());
        *access = None;
    }

    // ===== Renewal credential (storage-backed) =====

    /// Persist the renewal credential into the area the current mode
    /// selects, and make sure no copy lingers in the other one.
    pub fn set_renewal(&self, credential: &str) {
        let mode = self.storage_mode();
        self.storage.write(mode, RENEWAL_KEY, credential);
        self.storage.remove(mode.other(), RENEWAL_KEY);
    }

    /// Read the renewal credential. The current mode's area wins; the
    /// other area is still consulted so a restore can pick up a credential
    /// a sibling wrote under a different mode.
    pub fn renewal(&self) -> Option<String> {
        self.renewal_with_area().map(|(credential, _)| credential)
    }

    /// Like [`SessionStore::renewal`], but also reports which area the
    /// credential was found in. Callers that rotate the credential use
    /// the area to keep the rotation where the original lived.
    pub fn renewal_with_area(&self) -> Option<(String, StorageMode)> {
        let mode = self.storage_mode();
        self.storage
            .read(mode, RENEWAL_KEY)
            .map(|credential| (credential, mode))
            .or_else(|| {
                self.storage
                    .read(mode.other(), RENEWAL_KEY)
                    .map(|credential| (credential, mode.other()))
            })
    }

    // ===== Storage mode =====

    pub fn storage_mode(&self) -> StorageMode {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch the storage mode. An existing renewal credential migrates to
    /// the newly selected area. Listeners fire synchronously, and only on
    /// an actual transition.
    pub fn set_storage_mode(&self, mode: StorageMode) {
        {
            let mut current = self.mode.lock().unwrap_or_else(|e| e.into_inner());
            if *current == mode {
                return;
            }
            *current = mode;
        }
        if let Some(credential) = self.storage.read(mode.other(), RENEWAL_KEY) {
            self.storage.write(mode, RENEWAL_KEY, &credential);
            self.storage.remove(mode.other(), RENEWAL_KEY);
        }
        debug!(mode = ?mode, "storage mode changed");
        let listeners = self.mode_listeners.lock().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener(mode);
        }
        self.storage.bus().publish(StorageEvent::ModeChanged { mode });
    }

    pub fn on_storage_mode_change(&self, callback: ModeCallback) {
        self.mode_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    // ===== Lifecycle =====

    /// Drop the in-memory credential and wipe both storage areas,
    /// including legacy key names. Safe to call repeatedly.
    pub fn clear_all(&self) {
        self.clear_access();
        self.storage.wipe();
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StorageEvent> {
        self.storage.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::StorageBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store_with_dirs() -> (SessionStore, TempDir, TempDir) {
        let durable = TempDir::new().expect("failed to create durable dir");
        let session = TempDir::new().expect("failed to create session dir");
        let storage = CredentialStorage::new(
            durable.path().to_path_buf(),
            session.path().to_path_buf(),
            StorageBus::new(),
        );
        (
            SessionStore::new(storage, StorageMode::Session),
            durable,
            session,
        )
    }

    /// Collect the contents of every file under both storage areas.
    fn all_stored_bytes(durable: &TempDir, session: &TempDir) -> String {
        let mut combined = String::new();
        for dir in [durable.path(), session.path()] {
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    if let Ok(contents) = std::fs::read_to_string(entry.path()) {
                        combined.push_str(&contents);
                    }
                }
            }
        }
        combined
    }

    #[test]
    fn test_access_credential_never_persisted() {
        let (store, durable, session) = store_with_dirs();
        store.set_access("ACCESS-SECRET-A1".to_string());
        store.set_renewal("R1");

        let on_disk = all_stored_bytes(&durable, &session);
        assert!(!on_disk.contains("ACCESS-SECRET-A1"));
        assert_eq!(store.access().as_deref(), Some("ACCESS-SECRET-A1"));
    }

    #[test]
    fn test_clear_all_is_idempotent() {
        let (store, durable, session) = store_with_dirs();
        store.set_access("A1".to_string());
        store.set_renewal("R1");

        store.clear_all();
        assert!(store.access().is_none());
        assert!(store.renewal().is_none());
        assert!(all_stored_bytes(&durable, &session).is_empty());

        // Second clear on already-empty state behaves identically
        store.clear_all();
        assert!(store.access().is_none());
        assert!(store.renewal().is_none());
        assert!(all_stored_bytes(&durable, &session).is_empty());
    }

    #[test]
    fn test_session_mode_write_does_not_leak_into_durable_area() {
        let durable = TempDir::new().expect("failed to create durable dir");
        let session = TempDir::new().expect("failed to create session dir");
        let bus = StorageBus::new();

        let store = SessionStore::new(
            CredentialStorage::new(
                durable.path().to_path_buf(),
                session.path().to_path_buf(),
                bus.clone(),
            ),
            StorageMode::Session,
        );
        store.set_renewal("R1");

        // Simulate a restart where only the durable area survives
        let fresh_session = TempDir::new().expect("failed to create fresh session dir");
        let restored = SessionStore::new(
            CredentialStorage::new(
                durable.path().to_path_buf(),
                fresh_session.path().to_path_buf(),
                bus,
            ),
            StorageMode::Session,
        );
        assert!(restored.renewal().is_none());
    }

    #[test]
    fn test_durable_mode_survives_restart() {
        let durable = TempDir::new().expect("failed to create durable dir");
        let session = TempDir::new().expect("failed to create session dir");
        let bus = StorageBus::new();

        let store = SessionStore::new(
            CredentialStorage::new(
                durable.path().to_path_buf(),
                session.path().to_path_buf(),
                bus.clone(),
            ),
            StorageMode::Durable,
        );
        store.set_renewal("R1");

        let fresh_session = TempDir::new().expect("failed to create fresh session dir");
        let restored = SessionStore::new(
            CredentialStorage::new(
                durable.path().to_path_buf(),
                fresh_session.path().to_path_buf(),
                bus,
            ),
            StorageMode::Session,
        );
        assert_eq!(restored.renewal().as_deref(), Some("R1"));
    }

    #[test]
    fn test_mode_change_migrates_credential() {
        let (store, durable, _session) = store_with_dirs();
        store.set_renewal("R1");
        assert!(!durable.path().join(RENEWAL_KEY).exists());

        store.set_storage_mode(StorageMode::Durable);
        assert!(durable.path().join(RENEWAL_KEY).exists());
        assert_eq!(store.renewal().as_deref(), Some("R1"));
    }

    #[test]
    fn test_mode_listeners_fire_on_transition_only() {
        let (store, _durable, _session) = store_with_dirs();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_cb = fired.clone();
        store.on_storage_mode_change(Box::new(move |mode| {
            assert_eq!(mode, StorageMode::Durable);
            fired_in_cb.fetch_add(1, Ordering::SeqCst);
        }));

        // Unrelated storage writes must not fire the callback
        store.set_renewal("R1");
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        // Re-asserting the current mode must not fire it either
        store.set_storage_mode(StorageMode::Session);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        store.set_storage_mode(StorageMode::Durable);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
