//! Single-flight coordinator.
//!
//! At-most-one concurrent operation per key. Built on `futures::Shared`
//! over a locally-boxed future, keyed by `String` (URL) for folder fetches
//! and `PathBuf` (final cache path) for file downloads. Entries are purged
//! from the map as soon as the shared future resolves, success or
//! failure, so a later caller always starts a fresh attempt instead of
//! reusing a failed one.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture, Shared};

use crate::error::EngineError;

type SharedResult<V> = Result<V, Rc<EngineError>>;
type SharedFuture<V> = Shared<LocalBoxFuture<'static, SharedResult<V>>>;

pub struct SingleFlight<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    inflight: Rc<RefCell<HashMap<K, SharedFuture<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + 'static,
{
    pub fn new() -> Self {
        Self { inflight: Rc::new(RefCell::new(HashMap::new())) }
    }

    /// Returns the in-flight future for `key` if one exists; otherwise
    /// starts `make()` and registers it. All callers (existing or new)
    /// share one execution and see the same result.
    pub fn by_key(
        &self,
        key: K,
        make: impl FnOnce() -> LocalBoxFuture<'static, Result<V, EngineError>>,
    ) -> SharedFuture<V> {
        if let Some(existing) = self.inflight.borrow().get(&key) {
            return existing.clone();
        }

        let map = self.inflight.clone();
        let cleanup_key = key.clone();
        let inner = make();
        let wrapped: LocalBoxFuture<'static, SharedResult<V>> = async move {
            let result = inner.await.map_err(Rc::new);
            map.borrow_mut().remove(&cleanup_key);
            result
        }
        .boxed_local();

        let shared = wrapped.shared();
        self.inflight.borrow_mut().insert(key, shared.clone());
        shared
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.borrow().len()
    }
}
