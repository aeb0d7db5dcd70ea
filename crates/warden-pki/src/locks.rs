//! Per-identity mutual exclusion for CA engine calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// One lock per identity id, created on first use and kept for the
/// lifetime of the table. Calls for the same id are serialized; calls
/// for different ids never contend beyond the map lookup.
#[derive(Default)]
pub struct IdentityLockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdentityLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide table shared by every manager that does not inject
    /// its own.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<IdentityLockTable>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(IdentityLockTable::new())))
    }

    /// Lock handle for `identity_id`, inserted if absent under the map lock
    /// so two first callers always share one handle.
    fn handle(&self, identity_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(identity_id.to_string()).or_default())
    }

    /// Run `f` while holding the identity's lock. Blocks without timeout.
    pub fn with_lock<T>(&self, identity_id: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.handle(identity_id);
        // The mutex guards no data, so a poisoned lock is still usable.
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Number of identities that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
