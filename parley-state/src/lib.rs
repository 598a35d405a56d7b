//! Session state with pluggable persistence.
//!
//! A [`StateManager`] keeps live sessions in memory, expires them by TTL,
//! and flushes them through a [`StorageBackend`] both on demand and from a
//! background auto-save task. [`JsonFileStorage`] is the bundled backend,
//! writing one JSON document per key.

pub mod manager;
pub mod session;
pub mod storage;

pub use manager::{StateManager, StateManagerConfig};
pub use session::SessionState;
pub use storage::{JsonFileStorage, StorageBackend};
