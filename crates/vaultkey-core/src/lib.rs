//! VaultKey client core.
//!
//! The session lifecycle (sign-in with optional second factor, silent
//! renewal, restore at startup, cross-instance synchronization), the
//! authenticated API client, local caching, and configuration shared by
//! VaultKey client frontends. UI layers sit on top of this crate and
//! observe [`auth::SessionState`] to decide what to show.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiClient, ApiError};
pub use auth::{Session, SessionState, StorageMode};
pub use config::Config;
pub use models::{CurrentUser, UserRole};
