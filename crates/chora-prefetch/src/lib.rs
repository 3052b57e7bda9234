//! # Chora Prefetch
//!
//! Background prefetcher for critical third-party assets.
//!
//! The request-interception layer pre-caches these assets at install time,
//! but its partitions may not exist yet on a first visit, and a cache reset
//! wipes them. The prefetcher is the second, independent path: it runs once
//! per page load as a detached task, downloads every critical asset that is
//! not already present in its own flat URL → blob store, and never blocks or
//! fails the main flow. Writes are idempotent (skip-if-exists keyed by URL),
//! so racing the interception layer over the same logical asset is harmless.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use hashbrown::HashMap;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use chora_common::{retry_with_backoff, Result, RetryConfig};
use chora_net::NetworkClient;

// ==================== Store ====================

/// Flat persistent mapping of absolute URL → raw blob.
///
/// Records are created once and never updated or expired here. With a
/// backing file the whole map is snapshotted on every insert (temp file,
/// then rename).
#[derive(Clone)]
pub struct PrefetchStore {
    records: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    path: Option<PathBuf>,
    // Serializes snapshot writes; never held while the record lock is.
    disk: Arc<Mutex<()>>,
}

impl PrefetchStore {
    /// Create a store with no persistence.
    pub fn in_memory() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            path: None,
            disk: Arc::new(Mutex::new(())),
        }
    }

    /// Open a store backed by the given snapshot file, loading existing
    /// records. A missing file starts empty; an unreadable one is discarded
    /// with a warning.
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let records = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, Vec<u8>>>(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding unreadable prefetch snapshot");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), records = records.len(), "prefetch store opened");

        Ok(Self {
            records: Arc::new(RwLock::new(records)),
            path: Some(path),
            disk: Arc::new(Mutex::new(())),
        })
    }

    /// Check whether a URL already has a record.
    pub async fn contains(&self, url: &str) -> bool {
        self.records.read().await.contains_key(url)
    }

    /// Get a stored blob.
    pub async fn get(&self, url: &str) -> Option<Bytes> {
        self.records
            .read()
            .await
            .get(url)
            .map(|blob| Bytes::from(blob.clone()))
    }

    /// Insert a record unless one already exists. Returns whether the blob
    /// was inserted.
    pub async fn put_if_absent(&self, url: &str, blob: Bytes) -> bool {
        {
            let mut records = self.records.write().await;
            if records.contains_key(url) {
                return false;
            }
            records.insert(url.to_string(), blob.to_vec());
        }
        self.persist_records().await;
        true
    }

    /// Snapshot the whole map to disk without holding the record lock across
    /// the write. The disk mutex keeps snapshots in insertion order; the
    /// blocking I/O runs on the blocking thread pool. Failures degrade
    /// persistence, not the in-memory store.
    async fn persist_records(&self) {
        let Some(path) = self.path.clone() else {
            return;
        };
        let shown = path.display().to_string();
        let _guard = self.disk.lock().await;
        let snapshot = self.records.read().await.clone();
        let write = tokio::task::spawn_blocking(move || persist(&path, &snapshot)).await;
        match write {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(path = %shown, error = %e, "failed to persist prefetch snapshot");
            }
            Err(e) => {
                warn!(path = %shown, error = %e, "snapshot writer stopped");
            }
        }
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn persist(path: &Path, records: &HashMap<String, Vec<u8>>) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(records)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ==================== Prefetcher ====================

/// Outcome of one prefetch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Assets downloaded and stored during this run.
    pub fetched: usize,
    /// Assets already present, skipped without a network fetch.
    pub skipped: usize,
    /// Assets that could not be downloaded (after retries).
    pub failed: usize,
}

/// Background downloader of critical assets into a [`PrefetchStore`].
pub struct Prefetcher {
    store: PrefetchStore,
    client: NetworkClient,
    assets: Vec<Url>,
    retry: RetryConfig,
}

impl Prefetcher {
    pub fn new(store: PrefetchStore, client: NetworkClient, assets: Vec<Url>) -> Self {
        Self {
            store,
            client,
            assets,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy for failed downloads.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Download every asset not already present. One asset's failure never
    /// aborts the loop over the rest.
    pub async fn run(&self) -> PrefetchReport {
        let mut report = PrefetchReport::default();

        for url in &self.assets {
            if self.store.contains(url.as_str()).await {
                debug!(%url, "asset already prefetched");
                report.skipped += 1;
                continue;
            }

            let client = self.client.clone();
            let target = url.clone();
            let outcome = retry_with_backoff(&self.retry, move || {
                let client = client.clone();
                let target = target.clone();
                async move {
                    let response = client.get(&target).await.map_err(|e| e.to_string())?;
                    if !response.ok() {
                        return Err(format!("status {}", response.status));
                    }
                    Ok(response.body)
                }
            })
            .await;

            match outcome {
                Ok(blob) => {
                    if self.store.put_if_absent(url.as_str(), blob).await {
                        debug!(%url, "asset prefetched");
                        report.fetched += 1;
                    } else {
                        // The interception layer or a concurrent run won the race.
                        report.skipped += 1;
                    }
                }
                Err(e) => {
                    warn!(%url, error = %e, "asset prefetch failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Spawn the prefetcher as a detached task with its own error boundary.
    /// The main control flow never awaits it.
    pub fn spawn(self) -> JoinHandle<PrefetchReport> {
        tokio::spawn(async move {
            let report = self.run().await;
            info!(
                fetched = report.fetched,
                skipped = report.skipped,
                failed = report.failed,
                "prefetch run complete"
            );
            report
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn asset_urls(server: &MockServer, paths: &[&str]) -> Vec<Url> {
        paths
            .iter()
            .map(|p| Url::parse(&format!("{}{}", server.uri(), p)).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_store_put_if_absent() {
        let store = PrefetchStore::in_memory();

        assert!(store.put_if_absent("https://cdn.example/a.js", Bytes::from("one")).await);
        assert!(!store.put_if_absent("https://cdn.example/a.js", Bytes::from("two")).await);

        // First write wins; records are never updated.
        assert_eq!(store.get("https://cdn.example/a.js").await.unwrap().as_ref(), b"one");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_store_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("prefetch.json");

        {
            let store = PrefetchStore::open_at(&snapshot).unwrap();
            store.put_if_absent("https://cdn.example/a.js", Bytes::from("blob")).await;
        }

        let reopened = PrefetchStore::open_at(&snapshot).unwrap();
        assert!(reopened.contains("https://cdn.example/a.js").await);
        assert_eq!(reopened.get("https://cdn.example/a.js").await.unwrap().as_ref(), b"blob");
    }

    #[tokio::test]
    async fn test_store_concurrent_inserts_persist() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("prefetch.json");
        let store = PrefetchStore::open_at(&snapshot).unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put_if_absent(&format!("https://cdn.example/{i}.js"), Bytes::from("blob"))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // The snapshot on disk reflects every completed insert.
        let reopened = PrefetchStore::open_at(&snapshot).unwrap();
        assert_eq!(reopened.len().await, 8);
    }

    #[tokio::test]
    async fn test_prefetch_downloads_missing_assets() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pdf.min.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("lib"))
            .mount(&server)
            .await;

        let store = PrefetchStore::in_memory();
        let client = NetworkClient::with_defaults().unwrap();
        let assets = asset_urls(&server, &["/pdf.min.js"]);

        let report = Prefetcher::new(store.clone(), client, assets).run().await;

        assert_eq!(report, PrefetchReport { fetched: 1, skipped: 0, failed: 0 });
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_prefetch_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pdf.min.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("lib"))
            .expect(1)
            .mount(&server)
            .await;

        let store = PrefetchStore::in_memory();
        let client = NetworkClient::with_defaults().unwrap();
        let assets = asset_urls(&server, &["/pdf.min.js"]);
        let prefetcher = Prefetcher::new(store.clone(), client, assets);

        let first = prefetcher.run().await;
        let second = prefetcher.run().await;

        // One record, one network fetch (wiremock verifies expect(1) on drop).
        assert_eq!(first, PrefetchReport { fetched: 1, skipped: 0, failed: 0 });
        assert_eq!(second, PrefetchReport { fetched: 0, skipped: 1, failed: 0 });
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_loop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bad.js"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = PrefetchStore::in_memory();
        let client = NetworkClient::with_defaults().unwrap();
        let assets = asset_urls(&server, &["/bad.js", "/good.js"]);

        let report = Prefetcher::new(store.clone(), client, assets)
            .with_retry(RetryConfig::none())
            .run()
            .await;

        assert_eq!(report, PrefetchReport { fetched: 1, skipped: 0, failed: 1 });
        assert!(store.contains(&format!("{}/good.js", server.uri())).await);
        assert!(!store.contains(&format!("{}/bad.js", server.uri())).await);
    }

    #[tokio::test]
    async fn test_spawn_is_detached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pdf.min.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("lib"))
            .mount(&server)
            .await;

        let store = PrefetchStore::in_memory();
        let client = NetworkClient::with_defaults().unwrap();
        let assets = asset_urls(&server, &["/pdf.min.js"]);

        let handle = Prefetcher::new(store.clone(), client, assets).spawn();
        let report = handle.await.unwrap();

        assert_eq!(report.fetched, 1);
        assert!(store.contains(&format!("{}/pdf.min.js", server.uri())).await);
    }
}
