//! Local caching module for server-provided data.
//!
//! Holds the records the client keeps between fetches, most importantly
//! the current-user record that subject-change detection compares
//! against. Everything here is wiped when a different account signs in.

pub mod manager;

pub use manager::{CacheManager, CachedData};
