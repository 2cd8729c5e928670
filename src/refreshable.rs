//! Refreshable weak handle.
//!
//! Caches a derived value produced by an async recreate operation. There
//! is only one concrete kind of folder node, so this is one concrete
//! type, `RefreshableChildren`, holding a strong or weak reference to a
//! folder's derived children mapping rather than a generic `Refreshable<T>`.
//!
//! `get()` returns the strong ref if set, else upgrades the weak ref, else
//! recreates; every successful `get()` (re)starts a 60-tick once-timer
//! under `Later` whose deferred action demotes the strong ref to weak.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::EngineError;
use crate::folder::{ChildrenData, LazyFolder};
use crate::later::{Deferred, Later};

const IDLE_TICKS: i64 = 60;

pub struct RefreshableChildren {
    folder: Weak<LazyFolder>,
    strong: RefCell<Option<Rc<ChildrenData>>>,
    weak: RefCell<Option<Weak<ChildrenData>>>,
    later: Rc<Later>,
}

impl RefreshableChildren {
    pub fn new(folder: Weak<LazyFolder>, later: Rc<Later>) -> Rc<Self> {
        Rc::new(Self {
            folder,
            strong: RefCell::new(None),
            weak: RefCell::new(None),
            later,
        })
    }

    /// Retrieves the children mapping, refreshing the idle timer. Recreates
    /// it via the owning `LazyFolder` if neither the strong nor the weak
    /// reference is alive.
    pub async fn get(self: &Rc<Self>) -> Result<Rc<ChildrenData>, EngineError> {
        if let Some(strong) = self.strong.borrow().clone() {
            self.refresh();
            return Ok(strong);
        }
        if let Some(upgraded) = self.weak.borrow().as_ref().and_then(Weak::upgrade) {
            *self.strong.borrow_mut() = Some(upgraded.clone());
            self.refresh();
            return Ok(upgraded);
        }

        let folder = self
            .folder
            .upgrade()
            .expect("RefreshableChildren outlived its owning LazyFolder");
        let fresh = folder.compute_children_uncached().await?;
        *self.strong.borrow_mut() = Some(fresh.clone());
        *self.weak.borrow_mut() = None;
        self.refresh();
        Ok(fresh)
    }

    fn refresh(self: &Rc<Self>) {
        self.later.once(self.clone() as Rc<dyn Deferred>, IDLE_TICKS);
    }

    fn demote_to_weak(&self) {
        if let Some(strong) = self.strong.borrow_mut().take() {
            *self.weak.borrow_mut() = Some(Rc::downgrade(&strong));
        }
    }
}

impl Deferred for RefreshableChildren {
    fn run_deferred_sync(&self) {
        self.demote_to_weak();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    // `RefreshableChildren` is exercised end-to-end (including recreation
    // after demotion) via `folder.rs`'s tests, which have an actual
    // `LazyFolder` to recreate from. Here we only check the demotion
    // bookkeeping in isolation using a bare counter in place of real data.

    #[test]
    fn demote_clears_strong_and_weak_expires_once_last_owner_drops() {
        let data = Rc::new(Cell::new(7));
        let strong = RefCell::new(Some(data.clone()));
        let weak = RefCell::new(None::<Weak<Cell<i32>>>);

        // Mirror demote_to_weak's logic directly against Cell<i32> to avoid
        // constructing a full LazyFolder for this unit-level check.
        if let Some(s) = strong.borrow_mut().take() {
            *weak.borrow_mut() = Some(Rc::downgrade(&s));
        }
        assert!(strong.borrow().is_none());
        // `data` is still a live strong owner, so the weak ref upgrades.
        assert!(weak.borrow().as_ref().unwrap().upgrade().is_some());
        drop(data);
        // No strong owners remain: the derived value is now collectible.
        assert!(weak.borrow().as_ref().unwrap().upgrade().is_none());
    }
}
