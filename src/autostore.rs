//! Cache-entry store (`AutoStore`).
//!
//! Wraps a mutable `CachedFolderData` record with debounced, crash-safe
//! JSON persistence (write to `.tmp`, then atomically rename). Every
//! `mark_changed` both (re)starts a ~4s debounce timer *and* registers a
//! `once, ticks=5` entry with the engine's `Later` scheduler. In the common
//! case the debounce timer fires first and persists; the `Later` entry is
//! the forced-shutdown backstop that guarantees a dirty store is flushed
//! even if the debounce timer never got to run.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::folder::CachedFolderData;
use crate::later::{Deferred, Later};

const LATER_TICKS: i64 = 5;

pub struct AutoStore {
    pub data: RefCell<CachedFolderData>,
    json_path: PathBuf,
    dirty: Cell<bool>,
    generation: Cell<u64>,
    later: Rc<Later>,
    debounce: Duration,
}

impl AutoStore {
    pub fn new(
        data: CachedFolderData,
        json_path: PathBuf,
        later: Rc<Later>,
        debounce: Duration,
    ) -> Rc<Self> {
        Rc::new(Self {
            data: RefCell::new(data),
            json_path,
            dirty: Cell::new(false),
            generation: Cell::new(0),
            later,
            debounce,
        })
    }

    /// Applies `f` to the wrapped record, then schedules persistence.
    pub fn mutate(self: &Rc<Self>, f: impl FnOnce(&mut CachedFolderData)) {
        f(&mut self.data.borrow_mut());
        self.mark_changed();
    }

    /// Schedules persistence: restarts the debounce timer and (re)registers
    /// the forced-shutdown backstop entry with `Later`.
    pub fn mark_changed(self: &Rc<Self>) {
        self.dirty.set(true);
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        self.later.once(self.clone() as Rc<dyn Deferred>, LATER_TICKS);

        let this = self.clone();
        let debounce = self.debounce;
        tokio::task::spawn_local(async move {
            tokio::time::sleep(debounce).await;
            // A newer `mark_changed` call bumped the generation while we
            // slept: our write would be stale, so we yield to the later
            // timer that superseded us.
            if this.generation.get() != generation {
                return;
            }
            if let Err(e) = this.persist_if_dirty().await {
                warn!(path = %this.json_path.display(), error = %e, "failed to persist folder cache");
            }
        });
    }

    /// Serializes the current record and atomically renames it into place,
    /// if and only if there are unpersisted changes.
    pub async fn persist_if_dirty(self: &Rc<Self>) -> Result<(), EngineError> {
        if !self.dirty.get() {
            return Ok(());
        }
        let serialized = {
            let data = self.data.borrow();
            serde_json::to_vec(&*data)?
        };
        if let Some(parent) = self.json_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = tmp_path_for(&self.json_path);
        {
            let mut f = tokio::fs::File::create(&tmp_path).await?;
            f.write_all(&serialized).await?;
            f.flush().await?;
        }
        tokio::fs::rename(&tmp_path, &self.json_path).await?;
        self.dirty.set(false);
        debug!(path = %self.json_path.display(), "persisted folder cache");
        Ok(())
    }
}

fn tmp_path_for(final_path: &std::path::Path) -> PathBuf {
    let mut tmp = final_path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

impl Deferred for AutoStore {
    fn run_deferred_sync(&self) {}

    fn run_deferred_async(self: Rc<Self>) -> Option<LocalBoxFuture<'static, ()>> {
        Some(Box::pin(async move {
            if let Err(e) = self.persist_if_dirty().await {
                warn!(path = %self.json_path.display(), error = %e, "forced persist failed");
            }
        }))
    }
}
