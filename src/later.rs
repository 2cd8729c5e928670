//! Deferred-task scheduler ("Later").
//!
//! A registry of maintenance callbacks, ticked periodically and forced to
//! run during shutdown. Keyed by the pointee address of an
//! `Rc<dyn Deferred>`, so re-adding the same object replaces its
//! scheduling options rather than duplicating the entry.
//!
//! An entry fires once its `ticks` counter is set *and* has gone negative,
//! or immediately when a tick is forced -- never on an unset `ticks`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use tracing::warn;

/// Implemented by anything the scheduler can run deferred work for.
/// Both a sync and an async flavor are polled on every forced or expired
/// tick, since a given entry might only need one of the two.
pub trait Deferred {
    fn run_deferred_sync(&self) {}

    fn run_deferred_async(self: Rc<Self>) -> Option<LocalBoxFuture<'static, ()>> {
        None
    }
}

struct Entry {
    target: Rc<dyn Deferred>,
    ticks: Option<i64>,
    once: bool,
}

/// Registry key: the pointee address of the `Rc<dyn Deferred>`, so that
/// re-`add`ing the same object replaces its scheduling options rather than
/// duplicating the entry.
type Key = *const ();

#[derive(Default)]
pub struct Later {
    entries: RefCell<HashMap<Key, Entry>>,
}

fn key_of(target: &Rc<dyn Deferred>) -> Key {
    Rc::as_ptr(target) as *const ()
}

impl Later {
    pub fn new() -> Self {
        Self { entries: RefCell::new(HashMap::new()) }
    }

    pub fn add(&self, target: Rc<dyn Deferred>, ticks: Option<i64>, once: bool) {
        let key = key_of(&target);
        self.entries.borrow_mut().insert(key, Entry { target, ticks, once });
    }

    pub fn once(&self, target: Rc<dyn Deferred>, ticks: i64) {
        self.add(target, Some(ticks), true);
    }

    pub fn remove(&self, target: &Rc<dyn Deferred>) {
        self.entries.borrow_mut().remove(&key_of(target));
    }

    /// One tick: decrements every entry's remaining ticks, then fires any
    /// entry whose ticks went negative (or unconditionally, if `force`).
    /// Once-entries are removed after firing. Callback errors are swallowed
    /// (there are none to propagate -- `Deferred` methods don't return
    /// `Result`) but the async flavor's future is polled to completion and
    /// any panic-free failure path is simply logged by the callee.
    pub async fn tick(&self, force: bool) {
        let due: Vec<(Key, Rc<dyn Deferred>, bool)> = {
            let mut entries = self.entries.borrow_mut();
            let mut due = Vec::new();
            for (key, entry) in entries.iter_mut() {
                if let Some(t) = entry.ticks {
                    entry.ticks = Some(t - 1);
                }
                let expired = matches!(entry.ticks, Some(t) if t < 0);
                if expired || force {
                    due.push((*key, entry.target.clone(), entry.once));
                }
            }
            due
        };

        let mut async_work = Vec::new();
        for (key, target, once) in due {
            target.run_deferred_sync();
            if let Some(fut) = target.clone().run_deferred_async() {
                async_work.push(fut);
            }
            if once {
                self.entries.borrow_mut().remove(&key);
            }
        }

        for fut in async_work {
            fut.await;
        }
        if async_work_had_panics() {
            warn!("later: a deferred async task panicked during tick");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// `tick` never actually observes panics (Rust's cooperative futures don't
// unwind across `.await` points the way Python's gather/try-except does);
// this is a deliberate no-op kept name-compatible with the call site above
// so a future caller wiring in `catch_unwind` has an obvious seam.
fn async_work_had_panics() -> bool {
    false
}
