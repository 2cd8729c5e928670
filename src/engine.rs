//! Engine shared state and cooperative-loop host.
//!
//! The engine runs on a single dedicated OS thread driving a
//! `current_thread` Tokio runtime under one `LocalSet`: everything in
//! `EngineShared`/`LazyFolder`/`AutoStore`/`Later` is `Rc`/`RefCell`-based
//! and only ever touched from that thread. `EngineHost` is the one `Send`
//! boundary -- FUSE callbacks (sync, invoked from arbitrary kernel-request
//! threads) submit a boxed job over an unbounded channel and block on a
//! oneshot reply (`run_sync`); the serialization point is the
//! single-threaded executor itself, rather than a mutex around shared
//! state.

use std::future::Future;
use std::path::PathBuf;
use std::rc::Rc;
use std::thread::JoinHandle;

use futures::future::LocalBoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fetcher::RemoteFetcher;
use crate::folder::{CachedFolderData, LazyFolder, CACHE_FILE_NAME};
use crate::later::Later;
use crate::path::Path;
use crate::single_flight::SingleFlight;

/// State reachable from every `LazyFolder`: the fetcher, the debounce/
/// demotion scheduler, and the two single-flight coordinators keyed
/// respectively by remote URL (folder listings) and local cache path
/// (file downloads).
pub struct EngineShared {
    pub cache_root: PathBuf,
    pub root_url: String,
    pub fetcher: Rc<RemoteFetcher>,
    pub later: Rc<Later>,
    pub folder_fetch_single_flight: SingleFlight<String, CachedFolderData>,
    pub download_single_flight: SingleFlight<PathBuf, ()>,
    pub config: EngineConfig,
}

impl EngineShared {
    fn new(config: EngineConfig, cache_root: PathBuf, root_url: String) -> Rc<Self> {
        Rc::new(Self {
            cache_root,
            root_url,
            fetcher: Rc::new(RemoteFetcher::new(&config)),
            later: Rc::new(Later::new()),
            folder_fetch_single_flight: SingleFlight::new(),
            download_single_flight: SingleFlight::new(),
            config,
        })
    }

    pub fn folder_url(&self, path: &Path) -> String {
        let suffix = path.to_url_suffix();
        if suffix.is_empty() {
            format!("{}/", self.root_url.trim_end_matches('/'))
        } else {
            format!("{}/{}/", self.root_url.trim_end_matches('/'), suffix)
        }
    }

    pub fn file_url(&self, path: &Path, name: &str) -> String {
        use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
        let encoded_name = utf8_percent_encode(name, NON_ALPHANUMERIC).to_string();
        format!("{}{}", self.folder_url(path), encoded_name)
    }

    pub fn folder_json_path(&self, path: &Path) -> PathBuf {
        self.cache_root.join(path.to_path_buf()).join(CACHE_FILE_NAME)
    }

    pub fn cache_file_path(&self, path: &Path, name: &str) -> PathBuf {
        self.cache_root.join(path.to_path_buf()).join(name)
    }
}

/// A unit of work submitted from a FUSE callback thread to the engine
/// loop. Carries everything it needs (root folder handle, shared state);
/// the reply channel is captured inside the closure by `run_sync`.
type Job = Box<dyn FnOnce(Rc<LazyFolder>, Rc<EngineShared>) -> LocalBoxFuture<'static, ()> + Send>;

pub struct EngineHost {
    job_tx: mpsc::UnboundedSender<Job>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHost {
    /// Spawns the dedicated engine thread and its `current_thread` runtime.
    pub fn spawn(config: EngineConfig, cache_root: PathBuf, root_url: String) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("engine-loop".to_string())
            .spawn(move || run_engine_loop(config, cache_root, root_url, job_rx, shutdown_rx))
            .expect("failed to spawn engine thread");

        Self { job_tx, shutdown_tx: Some(shutdown_tx), thread: Some(thread) }
    }

    /// Submits `job` to the engine loop. Only used by `run_sync`.
    fn submit(&self, job: Job) -> Result<(), EngineError> {
        self.job_tx.send(job).map_err(|_| EngineError::ShuttingDown)
    }

    /// Signals the engine loop to drain its `Later` backstop (flushing any
    /// dirty `AutoStore`) and stop, then joins the thread.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("engine thread panicked during shutdown");
            }
        }
    }
}

impl Drop for EngineHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_engine_loop(
    config: EngineConfig,
    cache_root: PathBuf,
    root_url: String,
    mut job_rx: mpsc::UnboundedReceiver<Job>,
    shutdown_rx: oneshot::Receiver<()>,
) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build current-thread runtime");

    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        let engine = EngineShared::new(config.clone(), cache_root, root_url);
        let root = LazyFolder::new(Path::root(), engine.clone());

        let maintenance = {
            let engine = engine.clone();
            let interval = std::time::Duration::from_secs(config.later_tick_seconds.max(1));
            tokio::task::spawn_local(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    engine.later.tick(false).await;
                    engine.fetcher.log_inflight();
                }
            })
        };

        tokio::pin!(shutdown_rx);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    info!("engine shutting down, flushing deferred work");
                    break;
                }
                job = job_rx.recv() => {
                    match job {
                        Some(job) => {
                            tokio::task::spawn_local(job(root.clone(), engine.clone()));
                        }
                        None => break,
                    }
                }
            }
        }

        maintenance.abort();
        engine.later.tick(true).await;
    });
}

/// Runs `f` to completion on the engine thread and blocks the calling
/// (FUSE) thread for the result. `R` must be `Send` because it crosses
/// the oneshot channel back out of the single-threaded executor.
pub fn run_sync<R, F, Fut>(host: &EngineHost, f: F) -> Result<R, EngineError>
where
    R: Send + 'static,
    F: FnOnce(Rc<LazyFolder>, Rc<EngineShared>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, EngineError>> + 'static,
{
    let (tx, rx) = oneshot::channel::<Result<R, EngineError>>();
    let job: Job = Box::new(move |root, engine| {
        Box::pin(async move {
            let result = f(root, engine).await;
            let _ = tx.send(result);
        })
    });
    host.submit(job)?;
    rx.blocking_recv().map_err(|_| EngineError::ShuttingDown)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path as wpath};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn host_answers_run_sync_calls_and_shuts_down_cleanly() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(wpath("/"))
                .respond_with(ResponseTemplate::new(200).set_body_string(
                    r#"<table id="list"><tbody>
                        <tr><td><a href="c.txt">c.txt</a></td><td>5 B</td><td>-</td></tr>
                       </tbody></table>"#,
                ))
                .mount(&server)
                .await;
            server
        });

        let cache_dir = tempfile::tempdir().unwrap();
        let mut host = EngineHost::spawn(EngineConfig::default(), cache_dir.path().to_path_buf(), server.uri());

        let size = run_sync(&host, |root, _engine| async move {
            root.children().await?;
            root.approximate_size("c.txt").await
        })
        .unwrap();
        assert_eq!(size, 5);

        host.shutdown();
        // `rt` keeps driving the mock server task; it must outlive `host`.
        let _ = &rt;
    }
}
