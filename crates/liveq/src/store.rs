//! The store handle.

use std::sync::Arc;

use liveq_store::{Db, Store};

/// Process-wide handle to the reactive query store.
///
/// One handle per gateway process, passed explicitly to every caller.
/// Lifecycle is `new` → use → drop; a restart is a fresh handle with
/// every index empty (clients must resubscribe).
///
/// All mutating entry points are transaction boundaries: they either
/// commit fully or leave state unchanged, and they are totally ordered
/// with respect to each other. Reads run on an immutable snapshot and
/// never block.
pub struct ReactiveStore {
    store: Store,
}

impl ReactiveStore {
    #[must_use]
    pub fn new() -> Self {
        Self { store: Store::new() }
    }

    /// Snapshot of the current database state.
    #[must_use]
    pub fn db(&self) -> Arc<Db> {
        self.store.db()
    }

    pub(crate) fn inner(&self) -> &Store {
        &self.store
    }
}

impl Default for ReactiveStore {
    fn default() -> Self {
        Self::new()
    }
}
