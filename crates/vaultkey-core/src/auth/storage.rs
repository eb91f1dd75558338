//! Credential storage areas.
//!
//! The renewal credential lives in exactly one of two file-backed areas:
//! the durable area (under the user's data directory, shared by every
//! client instance, survives restarts) or the session area (a
//! per-instance directory that does not survive a restart). Which one is
//! governed by [`StorageMode`], the "remember me" choice.
//!
//! Writes go through a reversible obfuscation. This is NOT a security
//! boundary - it only keeps the raw credential out of casual directory
//! listings and backup greps. The access credential never reaches either
//! area.
//!
//! Every write and removal is published on the [`StorageBus`] so sibling
//! instances can re-derive their own session state.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Namespace prefix for every session storage key.
pub const KEY_NAMESPACE: &str = "vk.session.";

/// Storage key for the renewal credential.
pub const RENEWAL_KEY: &str = "vk.session.renewal";

/// Key names written by earlier client versions, some as plaintext.
/// Checked during wipe only.
const LEGACY_KEYS: &[&str] = &["refresh_token", "vk_refresh", "renewal.json"];

/// Envelope prefix marking an obfuscated payload.
const OBFUSCATION_PREFIX: &str = "vk1:";

/// Cycling pad for the reversible obfuscation.
const OBFUSCATION_PAD: &[u8] = b"vaultkey-at-rest-pad";

/// Capacity of the storage event bus. Events are advisory; a slow
/// receiver that lags simply re-derives from storage on the next event.
const EVENT_CAPACITY: usize = 16;

/// Where the renewal credential survives to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Per-instance area only; gone after a restart.
    Session,
    /// Shared data-directory area; survives restarts.
    Durable,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::Session
    }
}

impl StorageMode {
    pub fn other(self) -> Self {
        match self {
            StorageMode::Session => StorageMode::Durable,
            StorageMode::Durable => StorageMode::Session,
        }
    }
}

/// Change notification published to sibling instances.
#[derive(Debug, Clone)]
pub enum StorageEvent {
    /// A storage key was written or removed.
    KeyChanged { key: String, area: StorageMode },
    /// The storage mode was switched.
    ModeChanged { mode: StorageMode },
}

/// Broadcast bus connecting the storage areas of sibling instances.
#[derive(Clone)]
pub struct StorageBus {
    tx: broadcast::Sender<StorageEvent>,
}

impl StorageBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, event: StorageEvent) {
        // No receivers is fine - events are advisory
        let _ = self.tx.send(event);
    }
}

impl Default for StorageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// The two file-backed credential areas of one client instance.
pub struct CredentialStorage {
    durable_dir: PathBuf,
    session_dir: PathBuf,
    bus: StorageBus,
}

impl CredentialStorage {
    pub fn new(durable_dir: PathBuf, session_dir: PathBuf, bus: StorageBus) -> Self {
        Self {
            durable_dir,
            session_dir,
            bus,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.bus.subscribe()
    }

    pub(crate) fn bus(&self) -> &StorageBus {
        &self.bus
    }

    fn area_dir(&self, area: StorageMode) -> &Path {
        match area {
            StorageMode::Session => &self.session_dir,
            StorageMode::Durable => &self.durable_dir,
        }
    }

    fn key_path(&self, area: StorageMode, key: &str) -> PathBuf {
        self.area_dir(area).join(key)
    }

    /// Write an obfuscated value. Failures are swallowed: a full disk or
    /// unwritable directory degrades to a memory-only session.
    pub fn write(&self, area: StorageMode, key: &str, value: &str) {
        let path = self.key_path(area, key);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                debug!(area = ?area, key, error = %e, "failed to create storage area");
                return;
            }
        }
        if let Err(e) = std::fs::write(&path, obfuscate(value)) {
            debug!(area = ?area, key, error = %e, "failed to write storage key");
            return;
        }
        self.bus.publish(StorageEvent::KeyChanged {
            key: key.to_string(),
            area,
        });
    }

    /// Read and de-obfuscate a value. Absent, unreadable, or malformed
    /// payloads all come back as None.
    pub fn read(&self, area: StorageMode, key: &str) -> Option<String> {
        let path = self.key_path(area, key);
        let raw = std::fs::read_to_string(path).ok()?;
        let value = deobfuscate(raw.trim());
        if value.is_none() {
            debug!(area = ?area, key, "malformed storage payload ignored");
        }
        value
    }

    /// Remove a key. Publishes only when something was actually removed.
    pub fn remove(&self, area: StorageMode, key: &str) {
        let path = self.key_path(area, key);
        if !path.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_file(&path) {
            debug!(area = ?area, key, error = %e, "failed to remove storage key");
            return;
        }
        self.bus.publish(StorageEvent::KeyChanged {
            key: key.to_string(),
            area,
        });
    }

    /// Remove the credential key and every legacy key name from both
    /// areas. Defense against partially-migrated state from older client
    /// versions.
    pub fn wipe(&self) {
        for area in [StorageMode::Session, StorageMode::Durable] {
            self.remove(area, RENEWAL_KEY);
            for legacy in LEGACY_KEYS {
                let path = self.key_path(area, legacy);
                if path.exists() {
                    if let Err(e) = std::fs::remove_file(&path) {
                        debug!(area = ?area, key = legacy, error = %e, "failed to remove legacy key");
                    }
                }
            }
        }
    }
}

fn xor_pad(bytes: &mut [u8]) {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b ^= OBFUSCATION_PAD[i % OBFUSCATION_PAD.len()];
    }
}

fn obfuscate(plain: &str) -> String {
    let mut bytes = plain.as_bytes().to_vec();
    xor_pad(&mut bytes);
    format!("{}{}", OBFUSCATION_PREFIX, STANDARD.encode(bytes))
}

fn deobfuscate(stored: &str) -> Option<String> {
    let encoded = stored.strip_prefix(OBFUSCATION_PREFIX)?;
    let mut bytes = STANDARD.decode(encoded).ok()?;
    xor_pad(&mut bytes);
    String::from_utf8(bytes).ok()
}
