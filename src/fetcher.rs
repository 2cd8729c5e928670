//! Remote fetcher.
//!
//! The engine's only source of outbound HTTP. A single `reqwest::Client`
//! with its own connection pool, gated by a semaphore capping the number
//! of requests in flight at once, independent of how many logical callers
//! are waiting on `SingleFlight`.

use std::collections::HashMap;
use std::path::Path as StdPath;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Buffered writes are flushed in chunks around this size rather than on
/// every network read, so a download of many small TCP segments doesn't
/// turn into many small disk writes.
const WRITE_CHUNK_HINT: usize = 10 * 1024 * 1024;

pub struct RemoteFetcher {
    client: Client,
    gate: Arc<Semaphore>,
    /// label -> start time, for strictly observational instrumentation.
    /// No behavior depends on this map.
    inflight: Mutex<HashMap<String, Instant>>,
}

/// RAII guard registering/deregistering one entry in the instrumentation
/// map, so every early return (including `?`) still cleans up.
struct InflightGuard<'a> {
    fetcher: &'a RemoteFetcher,
    label: String,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.fetcher.inflight.lock().unwrap().remove(&self.label);
    }
}

impl RemoteFetcher {
    pub fn new(config: &EngineConfig) -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .expect("reqwest client config is static and always valid");
        Self {
            client,
            gate: Arc::new(Semaphore::new(config.fetch_gate_capacity)),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// How many requests are currently permitted to run concurrently but
    /// aren't (i.e. queued behind the gate). Used for instrumentation.
    pub fn gate_capacity(&self) -> usize {
        self.gate.available_permits()
    }

    fn track(&self, label: impl Into<String>) -> InflightGuard<'_> {
        let label = label.into();
        self.inflight.lock().unwrap().insert(label.clone(), Instant::now());
        InflightGuard { fetcher: self, label }
    }

    /// Logs every currently in-flight fetch and its age. Driven by
    /// `EngineHost`'s maintenance loop on the same ~10s cadence as the
    /// `Later` tick; purely observational, never consulted by any caller.
    pub fn log_inflight(&self) {
        let inflight = self.inflight.lock().unwrap();
        if inflight.is_empty() {
            return;
        }
        let now = Instant::now();
        info!(count = inflight.len(), "fetches in flight");
        for (label, started) in inflight.iter() {
            info!(label = %label, age_secs = now.duration_since(*started).as_secs_f64(), "in-flight fetch");
        }
    }

    #[instrument(skip(self))]
    pub async fn fetch_text(&self, url: &str) -> Result<String, EngineError> {
        let _tracked = self.track(format!("GET {url}"));
        let _permit = self.gate.acquire().await.expect("semaphore is never closed");
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    #[instrument(skip(self))]
    pub async fn fetch_headers_content_length(&self, url: &str) -> Result<u64, EngineError> {
        let _tracked = self.track(format!("HEAD {url}"));
        let _permit = self.gate.acquire().await.expect("semaphore is never closed");
        let response = self.client.head(url).send().await?.error_for_status()?;
        response
            .content_length()
            .ok_or_else(|| EngineError::Http(format!("no content-length header from {url}")))
    }

    /// Downloads `url` into `final_path`, writing to a sibling `.tmp` file
    /// first and renaming atomically so a crash mid-download never leaves
    /// behind a file that looks complete but isn't (the same discipline
    /// `AutoStore` applies to its JSON cache).
    #[instrument(skip(self))]
    pub async fn download_to_cache_path(
        &self,
        url: &str,
        final_path: &StdPath,
    ) -> Result<(), EngineError> {
        let _tracked = self.track(format!("GET(stream) {url}"));
        let _permit = self.gate.acquire().await.expect("semaphore is never closed");

        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = tmp_path_for(final_path);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut writer = BufWriter::with_capacity(64 * 1024, tokio::fs::File::create(&tmp_path).await?);

        let mut written: usize = 0;
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len();
            if written >= WRITE_CHUNK_HINT {
                writer.flush().await?;
                written = 0;
            }
        }
        writer.flush().await?;
        drop(writer);

        tokio::fs::rename(&tmp_path, final_path).await?;
        debug!(url, path = %final_path.display(), "downloaded file into cache");
        Ok(())
    }
}

fn tmp_path_for(final_path: &StdPath) -> std::path::PathBuf {
    let mut tmp = final_path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::path::PathBuf::from(tmp)
}

/// Brief sleep used by `EngineHost`'s instrumentation loop, kept here so
/// the interval doesn't drift from what the fetcher itself considers
/// "a reasonable log cadence".
pub const INSTRUMENTATION_INTERVAL: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path as wpath};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_text_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wpath("/x"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let fetcher = RemoteFetcher::new(&EngineConfig::default());
        let body = fetcher.fetch_text(&format!("{}/x", server.uri())).await.unwrap();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn head_without_content_length_errors() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(wpath("/x"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let fetcher = RemoteFetcher::new(&EngineConfig::default());
        let err = fetcher
            .fetch_headers_content_length(&format!("{}/x", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Http(_)));
    }

    #[tokio::test]
    async fn download_writes_atomically_via_tmp_rename() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wpath("/blob"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("blob.bin");
        let fetcher = RemoteFetcher::new(&EngineConfig::default());
        fetcher
            .download_to_cache_path(&format!("{}/blob", server.uri()), &dest)
            .await
            .unwrap();

        assert!(dest.exists());
        assert!(!tmp_path_for(&dest).exists());
        let bytes = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(bytes.len(), 4096);
    }
}
