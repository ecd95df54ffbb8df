pub mod db;
pub mod entities;
pub mod snapshot;
pub mod store;

pub use snapshot::{SnapshotCache, StoreSnapshot};
pub use store::{Store, StoreError};

use std::sync::{OnceLock, RwLock};

static GLOBAL_STORE: OnceLock<RwLock<Option<Store>>> = OnceLock::new();

/// Process-wide store handle for callers that don't plug in alternatives.
/// Explicitly constructed collaborators are still preferred; this exists
/// for the binary's wiring convenience.
pub fn set_global_store(store: Store) {
    let lock = GLOBAL_STORE.get_or_init(|| RwLock::new(None));
    let mut guard = lock.write().expect("global store lock poisoned");
    *guard = Some(store);
}

pub fn global_store() -> Option<Store> {
    let lock = GLOBAL_STORE.get_or_init(|| RwLock::new(None));
    let guard = lock.read().expect("global store lock poisoned");
    guard.clone()
}
