//! Authentication module: the session lifecycle of a client instance.
//!
//! This module provides:
//! - `SessionStore` / `CredentialStorage`: the access credential in
//!   memory, the renewal credential obfuscated at rest in the area the
//!   storage mode selects
//! - `Bootstrapper`: one-shot session restore at startup
//! - `RenewalGate`: the single in-flight renewal exchange every caller
//!   waits on
//! - `ExpiryScheduler`: proactive renewal ahead of the credential expiry
//! - `Session`: the service object owning all of the above
//!
//! The access credential never touches disk; it lives in memory for the
//! life of the process. The renewal credential may persist, governed by
//! the user's "remember me" choice.

pub mod bootstrap;
pub mod claims;
pub mod provider;
pub mod renewal;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod store;

pub use bootstrap::{BootstrapOutcome, BootstrapState, Bootstrapper, ProviderListener};
pub use claims::{AccessClaims, RENEW_LEAD_SECONDS};
pub use provider::{IdentityProvider, ProviderToken, ProviderUser};
pub use renewal::RenewalGate;
pub use scheduler::ExpiryScheduler;
pub use session::{Session, SessionState};
pub use storage::{CredentialStorage, StorageBus, StorageEvent, StorageMode};
pub use store::SessionStore;
