//! Cross-instance session synchronization.
//!
//! Sibling client instances share the durable credential area and a
//! broadcast bus of storage-change events. The watcher here lets a
//! signed-out instance pick up a session a sibling just established.
//! Everything is advisory: an instance that misses an event simply
//! re-bootstraps on its own.

pub mod watcher;

pub use watcher::StorageWatcher;
