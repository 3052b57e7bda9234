//! # Chora Cache
//!
//! Named, versioned cache partitions holding request/response pairs for the
//! offline caching subsystem.
//!
//! ## Architecture
//!
//! ```text
//! CacheStore
//!     ├── static-v2.2   (app shell, populated at install)
//!     ├── offline-v2.2  (critical third-party assets, populated at install)
//!     └── dynamic-v2.2  (runtime fetches, created lazily)
//! ```
//!
//! Partitions are named deterministically as `<role>-<version>`; activating a
//! new generation evicts every partition whose name does not belong to it.
//! All access is an atomic get/put on a single key behind one `RwLock`, so
//! concurrent request handlers and the background prefetcher need no
//! additional coordination.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use chora_common::{now_millis, ChoraError, Result};

// ==================== Versioning ====================

/// Opaque version tag identifying one generation of partitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheVersion(String);

impl CacheVersion {
    /// Create a version from a tag such as `"v2.2"`.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheVersion {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Role of a partition within a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionRole {
    /// First-party app shell.
    Static,
    /// Runtime fetches, populated lazily.
    Dynamic,
    /// Critical third-party assets.
    Offline,
}

impl PartitionRole {
    pub const ALL: [PartitionRole; 3] =
        [PartitionRole::Static, PartitionRole::Dynamic, PartitionRole::Offline];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionRole::Static => "static",
            PartitionRole::Dynamic => "dynamic",
            PartitionRole::Offline => "offline",
        }
    }
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generation of partitions: the three partitions belonging to a single
/// cache version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    version: CacheVersion,
}

impl Generation {
    pub fn new(version: CacheVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> &CacheVersion {
        &self.version
    }

    /// Deterministic partition name: `<role>-<version>`.
    pub fn name(&self, role: PartitionRole) -> String {
        format!("{}-{}", role, self.version)
    }

    /// All three partition names of this generation.
    pub fn names(&self) -> [String; 3] {
        PartitionRole::ALL.map(|role| self.name(role))
    }

    /// Whether the given partition name belongs to this generation.
    pub fn contains(&self, partition_name: &str) -> bool {
        PartitionRole::ALL
            .iter()
            .any(|role| self.name(*role) == partition_name)
    }
}

// ==================== Entries ====================

/// A cached response, keyed by absolute GET URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Stored-at timestamp (ms since epoch).
    pub stored_at: u64,
}

impl CachedResponse {
    pub fn new(status: u16, headers: HashMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            stored_at: now_millis(),
        }
    }

    /// Stored size in bytes: body plus header names and values.
    pub fn size(&self) -> u64 {
        let header_bytes: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        (self.body.len() + header_bytes) as u64
    }
}

/// A named partition: URL → cached response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachePartition {
    name: String,
    entries: HashMap<String, CachedResponse>,
}

impl CachePartition {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }
}

// ==================== Store ====================

/// The partitioned cache store shared by all request handlers.
///
/// Cloning is cheap; every clone operates on the same partitions. With a
/// backing directory each partition is persisted as a JSON snapshot, written
/// atomically (temp file, then rename).
#[derive(Clone)]
pub struct CacheStore {
    partitions: Arc<RwLock<HashMap<String, CachePartition>>>,
    root: Option<PathBuf>,
    // Serializes snapshot writes; never held while the partition lock is.
    disk: Arc<Mutex<()>>,
}

impl CacheStore {
    /// Create a store with no persistence.
    pub fn in_memory() -> Self {
        Self {
            partitions: Arc::new(RwLock::new(HashMap::new())),
            root: None,
            disk: Arc::new(Mutex::new(())),
        }
    }

    /// Open a store backed by the given directory, loading any existing
    /// partition snapshots.
    ///
    /// Failure to create or read the directory is fatal: callers abort the
    /// version upgrade and the previous generation stays in control.
    /// Individual unreadable snapshots are discarded with a warning.
    pub fn open_at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let mut partitions = HashMap::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<CachePartition>(&bytes).map_err(|e| e.to_string())
                }) {
                Ok(partition) => {
                    debug!(partition = %partition.name, entries = partition.entries.len(),
                        "loaded partition snapshot");
                    partitions.insert(partition.name.clone(), partition);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding unreadable partition snapshot");
                }
            }
        }

        info!(root = %root.display(), partitions = partitions.len(), "cache store opened");

        Ok(Self {
            partitions: Arc::new(RwLock::new(partitions)),
            root: Some(root),
            disk: Arc::new(Mutex::new(())),
        })
    }

    /// Open (create if missing) a partition by name.
    pub async fn open_partition(&self, name: &str) -> Result<()> {
        {
            let mut partitions = self.partitions.write().await;
            if partitions.contains_key(name) {
                return Ok(());
            }
            partitions.insert(name.to_string(), CachePartition::new(name));
            debug!(partition = %name, "partition created");
        }
        self.persist_partition(name).await
    }

    /// Store a response under the given URL key.
    ///
    /// The partition is created lazily if it does not exist (the dynamic
    /// partition's lifecycle). The write is all-or-nothing per key: the entry
    /// is complete before the lock is taken.
    pub async fn put(&self, partition: &str, url: &str, response: CachedResponse) {
        {
            let mut partitions = self.partitions.write().await;
            let part = partitions
                .entry(partition.to_string())
                .or_insert_with(|| CachePartition::new(partition));
            part.entries.insert(url.to_string(), response);
        }

        // Snapshot failures degrade persistence, not the in-memory cache.
        if let Err(e) = self.persist_partition(partition).await {
            warn!(partition = %partition, error = %e, "failed to persist partition snapshot");
        }
    }

    /// Look up a cached response by URL.
    pub async fn lookup(&self, partition: &str, url: &str) -> Option<CachedResponse> {
        let partitions = self.partitions.read().await;
        partitions
            .get(partition)
            .and_then(|p| p.entries.get(url))
            .cloned()
    }

    /// Check whether a URL is cached in a partition.
    pub async fn contains(&self, partition: &str, url: &str) -> bool {
        let partitions = self.partitions.read().await;
        partitions
            .get(partition)
            .map(|p| p.entries.contains_key(url))
            .unwrap_or(false)
    }

    /// Number of entries in a partition (0 if it does not exist).
    pub async fn entry_count(&self, partition: &str) -> usize {
        let partitions = self.partitions.read().await;
        partitions.get(partition).map(|p| p.entries.len()).unwrap_or(0)
    }

    /// All partition names, sorted.
    pub async fn partition_names(&self) -> Vec<String> {
        let partitions = self.partitions.read().await;
        let mut names: Vec<String> = partitions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Delete a partition wholesale. Returns whether it existed.
    pub async fn delete_partition(&self, name: &str) -> bool {
        let existed = self.partitions.write().await.remove(name).is_some();
        if existed {
            if let Some(root) = self.root.clone() {
                let _guard = self.disk.lock().await;
                let path = root.join(format!("{name}.json"));
                let removal =
                    tokio::task::spawn_blocking(move || std::fs::remove_file(&path)).await;
                match removal {
                    Ok(Err(e)) if e.kind() != std::io::ErrorKind::NotFound => {
                        warn!(partition = %name, error = %e, "failed to remove partition snapshot");
                    }
                    Err(e) => {
                        warn!(partition = %name, error = %e, "snapshot remover stopped");
                    }
                    _ => {}
                }
            }
        }
        existed
    }

    /// Delete every partition. Returns how many were removed.
    pub async fn clear_all(&self) -> usize {
        let names = self.partition_names().await;
        let mut removed = 0;
        for name in names {
            if self.delete_partition(&name).await {
                removed += 1;
            }
        }
        removed
    }

    /// Total stored size in bytes across every partition.
    pub async fn total_size(&self) -> u64 {
        let partitions = self.partitions.read().await;
        partitions
            .values()
            .flat_map(|p| p.entries.values())
            .map(|e| e.size())
            .sum()
    }

    /// Snapshot a partition to disk without holding the partition lock
    /// across the write. The disk mutex keeps snapshots in insertion order,
    /// so a slower earlier write cannot clobber a newer one; the blocking
    /// I/O runs on the blocking thread pool.
    async fn persist_partition(&self, name: &str) -> Result<()> {
        let Some(root) = self.root.clone() else {
            return Ok(());
        };
        let _guard = self.disk.lock().await;
        let snapshot = {
            let partitions = self.partitions.read().await;
            match partitions.get(name) {
                Some(partition) => partition.clone(),
                // Deleted in the meantime; nothing to snapshot.
                None => return Ok(()),
            }
        };
        tokio::task::spawn_blocking(move || write_snapshot(&root, &snapshot))
            .await
            .map_err(|e| ChoraError::cache(format!("snapshot writer stopped: {e}")))?
    }
}

fn write_snapshot(root: &Path, partition: &CachePartition) -> Result<()> {
    let bytes = serde_json::to_vec(partition)
        .map_err(|e| ChoraError::cache(format!("snapshot encode failed: {e}")))?;
    let tmp = root.join(format!("{}.json.tmp", partition.name));
    let dest = root.join(format!("{}.json", partition.name));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, &dest)?;
    Ok(())
}
