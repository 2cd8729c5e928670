//! Lazy folder node.
//!
//! The virtual directory: on-demand listing, size resolution, byte access.
//! All mutable state lives behind `Rc`/`RefCell`/`Cell` -- this type only
//! ever runs on the engine's single cooperative-loop thread, so none of
//! it needs a mutex.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture, Shared, TryFutureExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::autostore::AutoStore;
use crate::engine::EngineShared;
use crate::error::EngineError;
use crate::html_parser::parse_directory_html;
use crate::path::Path;
use crate::refreshable::RefreshableChildren;
use crate::size_parser::{approximate_size_bytes, exact_size_bytes};

/// Per-file cached size data, persisted in `.directory_contents_cached_v2.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedFileData {
    #[serde(default)]
    pub size: Option<u64>,
    pub size_approximate: u64,
}

/// The persisted folder record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedFolderData {
    pub folders: Vec<String>,
    pub files: HashMap<String, CachedFileData>,
}

/// The derived children mapping: one `LazyFolder` per subfolder, and the
/// ordered file names (the B/D record's name sets are disjoint by
/// invariant, so there's no ambiguity resolving a name against either).
pub struct ChildrenData {
    pub folders: HashMap<String, Rc<LazyFolder>>,
    pub files: Vec<String>,
}

pub(crate) const CACHE_FILE_NAME: &str = ".directory_contents_cached_v2.json";
/// Latch value stored in `prefetch_count` once batch refinement has fired,
/// so later calls don't re-trigger it.
const BATCH_REFINEMENT_LATCHED: i64 = -1;

type SharedOf<V> = Shared<LocalBoxFuture<'static, Result<V, Rc<EngineError>>>>;

pub struct LazyFolder {
    pub path: Path,
    engine: Rc<EngineShared>,
    store: RefCell<Option<SharedOf<Rc<AutoStore>>>>,
    wait_size: RefCell<HashMap<String, SharedOf<u64>>>,
    children: Rc<RefreshableChildren>,
    prefetch_count: Cell<i64>,
}

impl LazyFolder {
    pub fn new(path: Path, engine: Rc<EngineShared>) -> Rc<Self> {
        Rc::new_cyclic(|weak| {
            let children = RefreshableChildren::new(weak.clone(), engine.later.clone());
            LazyFolder {
                path,
                engine,
                store: RefCell::new(None),
                wait_size: RefCell::new(HashMap::new()),
                children,
                prefetch_count: Cell::new(0),
            }
        })
    }

    /// The last path segment, for human-readable CLI output only (no
    /// semantic effect on the engine).
    pub fn folder_display_name(&self) -> &str {
        self.path.name().unwrap_or("/")
    }

    /// Lazily creates (and thereafter shares) the promise that loads or
    /// fetches this folder's cache record.
    fn cached(self: &Rc<Self>) -> SharedOf<Rc<AutoStore>> {
        if let Some(existing) = self.store.borrow().clone() {
            return existing;
        }
        let engine = self.engine.clone();
        let path = self.path.clone();
        let fut: LocalBoxFuture<'static, Result<Rc<AutoStore>, EngineError>> =
            Box::pin(async move { load_or_fetch_folder(engine, path).await });
        let shared = fut.map_err(Rc::new).boxed_local().shared();
        *self.store.borrow_mut() = Some(shared.clone());
        shared
    }

    /// `children()`: the derived folders/files mapping, refreshed through
    /// the refreshable weak handle (Module G).
    pub async fn children(self: &Rc<Self>) -> Result<Rc<ChildrenData>, EngineError> {
        self.children.get().await
    }

    pub(crate) async fn compute_children_uncached(
        self: &Rc<Self>,
    ) -> Result<Rc<ChildrenData>, EngineError> {
        let store = self.cached().await.map_err(|e| (*e).clone())?;
        let data = store.data.borrow();
        let mut folders = HashMap::with_capacity(data.folders.len());
        for name in &data.folders {
            let child_path = self.path.join(name);
            folders.insert(name.clone(), LazyFolder::new(child_path, self.engine.clone()));
        }
        let files: Vec<String> = data.files.keys().cloned().collect();
        Ok(Rc::new(ChildrenData { folders, files }))
    }

    /// `approximate_size(name)`: the exact size if known, else the
    /// approximate size parsed from the listing. Relies on the folder
    /// already being cached (via `children()`/`cached()`); performs no
    /// further network I/O.
    pub async fn approximate_size(self: &Rc<Self>, name: &str) -> Result<u64, EngineError> {
        let store = self.cached().await.map_err(|e| (*e).clone())?;
        let data = store.data.borrow();
        let file = data
            .files
            .get(name)
            .ok_or_else(|| EngineError::NotFound(format!("{}/{}", self.path, name)))?;
        Ok(file.size.unwrap_or(file.size_approximate))
    }

    /// `exact_size(name)`: the exact byte count, fetching it via HEAD (at
    /// most once per name, single-flighted through `wait_size`) if not
    /// already known. Every 4th call on this node triggers a batch HEAD
    /// refinement of every still-unknown file in the directory.
    pub async fn exact_size(self: &Rc<Self>, name: &str) -> Result<u64, EngineError> {
        let store = self.cached().await.map_err(|e| (*e).clone())?;
        {
            let data = store.data.borrow();
            let file = data
                .files
                .get(name)
                .ok_or_else(|| EngineError::NotFound(format!("{}/{}", self.path, name)))?;
            if let Some(size) = file.size {
                return Ok(size);
            }
        }

        let fut = {
            let mut wait_size = self.wait_size.borrow_mut();
            if let Some(existing) = wait_size.get(name) {
                existing.clone()
            } else {
                let shared = self.spawn_head_fetch(store.clone(), name.to_string());
                wait_size.insert(name.to_string(), shared.clone());
                shared
            }
        };
        let result = fut.await;
        self.wait_size.borrow_mut().remove(name);
        let size = result.map_err(|e| (*e).clone())?;

        self.maybe_trigger_batch_refinement(&store);
        Ok(size)
    }

    fn maybe_trigger_batch_refinement(self: &Rc<Self>, store: &Rc<AutoStore>) {
        let count = self.prefetch_count.get();
        if count < 0 {
            return; // already latched
        }
        let next = count + 1;
        self.prefetch_count.set(next);
        if next >= self.engine.config.batch_refinement_threshold {
            self.prefetch_count.set(BATCH_REFINEMENT_LATCHED);
            self.trigger_batch_refinement(store.clone());
        }
    }

    /// Issues HEADs for every file in this directory whose exact size is
    /// still unknown and which has no HEAD already in flight. Each one is
    /// driven to completion in the background (not just registered),
    /// because nobody may ever call `exact_size` on most of these names
    /// directly.
    fn trigger_batch_refinement(self: &Rc<Self>, store: Rc<AutoStore>) {
        let unresolved: Vec<String> = {
            let data = store.data.borrow();
            data.files
                .iter()
                .filter(|(_, f)| f.size.is_none())
                .map(|(name, _)| name.clone())
                .collect()
        };

        for name in unresolved {
            if self.wait_size.borrow().contains_key(&name) {
                continue;
            }
            let shared = self.spawn_head_fetch(store.clone(), name.clone());
            self.wait_size.borrow_mut().insert(name.clone(), shared.clone());

            let this = self.clone();
            let cleanup_name = name.clone();
            tokio::task::spawn_local(async move {
                let _ = shared.await;
                this.wait_size.borrow_mut().remove(&cleanup_name);
            });
        }
    }

    fn spawn_head_fetch(self: &Rc<Self>, store: Rc<AutoStore>, name: String) -> SharedOf<u64> {
        let engine = self.engine.clone();
        let path = self.path.clone();
        let fut: LocalBoxFuture<'static, Result<u64, EngineError>> = Box::pin(async move {
            let url = engine.file_url(&path, &name);
            let size = engine.fetcher.fetch_headers_content_length(&url).await?;
            store.mutate(|d| {
                if let Some(f) = d.files.get_mut(&name) {
                    f.size = Some(size);
                }
            });
            Ok(size)
        });
        fut.map_err(Rc::new).boxed_local().shared()
    }

    /// `ensure_fetched(name)`: downloads the file into the local cache if
    /// it isn't already present, single-flighted on the final cache path.
    pub async fn ensure_fetched(self: &Rc<Self>, name: &str) -> Result<(), EngineError> {
        let final_path = self.engine.cache_file_path(&self.path, name);
        if tokio::fs::metadata(&final_path).await.is_ok() {
            return Ok(());
        }
        let url = self.engine.file_url(&self.path, name);
        let shared = self.engine.download_single_flight.by_key(final_path.clone(), {
            let engine = self.engine.clone();
            let final_path = final_path.clone();
            move || {
                Box::pin(async move {
                    engine.fetcher.download_to_cache_path(&url, &final_path).await
                })
            }
        });
        shared.await.map_err(|e| (*e).clone())
    }

    /// `cache_path(name)`: ensures the file is fetched, then returns its
    /// local cache path.
    pub async fn cache_path(self: &Rc<Self>, name: &str) -> Result<PathBuf, EngineError> {
        self.ensure_fetched(name).await?;
        Ok(self.engine.cache_file_path(&self.path, name))
    }

    pub(crate) fn cache_path_sync(&self, name: &str) -> PathBuf {
        self.engine.cache_file_path(&self.path, name)
    }

    /// `read_bytes(name, offset, length)`: ensures the file is downloaded,
    /// then reads a byte range from the local cache file.
    pub async fn read_bytes(
        self: &Rc<Self>,
        name: &str,
        offset: u64,
        length: u32,
    ) -> Result<Vec<u8>, EngineError> {
        self.ensure_fetched(name).await?;
        let path = self.engine.cache_file_path(&self.path, name);
        let mut file = tokio::fs::File::open(&path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        let n = file.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// Walks from `root` down to the folder node at `path`, fetching each
/// level's listing on demand. Used both by the FUSE adapter (resolving a
/// kernel-supplied inode's path on every lookup) and by the traversal
/// helpers in `walk.rs`.
pub async fn resolve(root: &Rc<LazyFolder>, path: &Path) -> Result<Rc<LazyFolder>, EngineError> {
    let mut current = root.clone();
    for segment in path.segments() {
        let children = current.children().await?;
        let next = children
            .folders
            .get(segment)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("{segment} is not a folder")))?;
        current = next;
    }
    Ok(current)
}

/// Loads the persisted cache record for `path`, or fetches and parses the
/// remote listing (single-flighted by URL) if no cache file exists yet.
async fn load_or_fetch_folder(
    engine: Rc<EngineShared>,
    path: Path,
) -> Result<Rc<AutoStore>, EngineError> {
    let json_path = engine.folder_json_path(&path);

    let data = match tokio::fs::read(&json_path).await {
        Ok(bytes) => serde_json::from_slice::<CachedFolderData>(&bytes)?,
        Err(_) => fetch_and_convert_folder(&engine, &path).await?,
    };

    let debounce = std::time::Duration::from_secs(engine.config.debounce_seconds);
    Ok(AutoStore::new(data, json_path, engine.later.clone(), debounce))
}

async fn fetch_and_convert_folder(
    engine: &Rc<EngineShared>,
    path: &Path,
) -> Result<CachedFolderData, EngineError> {
    let url = engine.folder_url(path);
    let shared = engine.folder_fetch_single_flight.by_key(url.clone(), {
        let engine = engine.clone();
        let url = url.clone();
        move || {
            Box::pin(async move {
                let html = engine.fetcher.fetch_text(&url).await?;
                let parsed = parse_directory_html(&html)?;
                convert_parsed_folder(parsed)
            })
        }
    });
    let data = shared.await.map_err(|e| (*e).clone())?;

    // Persist immediately so a restart finds the cache file rather than
    // re-fetching: write-then-rename, same discipline AutoStore uses.
    let json_path = engine.folder_json_path(path);
    if let Some(parent) = json_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = {
        let mut s = json_path.as_os_str().to_owned();
        s.push(".tmp");
        PathBuf::from(s)
    };
    tokio::fs::write(&tmp_path, serde_json::to_vec(&data)?).await?;
    tokio::fs::rename(&tmp_path, &json_path).await?;
    debug!(path = %path, "fetched and cached directory listing");

    Ok(data)
}

fn convert_parsed_folder(
    parsed: crate::html_parser::ParsedFolder,
) -> Result<CachedFolderData, EngineError> {
    let mut files = HashMap::with_capacity(parsed.files.len());
    for (name, entry) in parsed.files {
        let size = exact_size_bytes(&entry.size_text);
        let size_approximate = approximate_size_bytes(&entry.size_text)?;
        files.insert(name, CachedFileData { size, size_approximate });
    }
    Ok(CachedFolderData { folders: parsed.folders, files })
}
