//! Offline worker core for Chora Planner.
//!
//! Ties the other crates together into a single worker: the
//! [`LifecycleController`] installs and activates cache generations, the
//! [`RequestRouter`] answers fetch events from cache or network, and the
//! control channel lets controlled pages trigger upgrades and cache
//! maintenance.
//!
//! The [`WorkerHost`] facade owns all of it and is what an embedding shell
//! drives:
//!
//! ```text
//! pages ──messages──► WorkerHost ──► LifecycleController ──► CacheStore
//!       ──fetches───►            ──► RequestRouter ──► strategies ──► NetworkClient
//! ```

pub mod control;
pub mod lifecycle;
pub mod router;
pub mod strategy;

pub use control::{handle_control_message, ControlReply};
pub use lifecycle::{
    ActivationReport, ClientRegistry, InstallReport, LifecycleController, PageClient, WorkerEvent,
    WorkerState,
};
pub use router::RequestRouter;

use bytes::Bytes;
use hashbrown::HashMap;
use http::Method;
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use chora_cache::{CacheStore, CacheVersion, CachedResponse, Generation, PartitionRole};
use chora_common::Result;
use chora_manifest::AssetManifest;
use chora_net::{FetchedResponse, NetworkClient};

// ==================== Constants ====================

/// Cache version tag baked into this build. Bumping it makes the next
/// activation evict every partition of the previous generation.
pub const CACHE_VERSION: &str = "v2.2";

/// Body of the synthesized response served when a resource is unreachable
/// and nothing cached can stand in for it.
pub const OFFLINE_BODY: &str = "Contenuto non disponibile offline.";

// ==================== Worker Context ====================

/// Shared handles every worker component operates on.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: CacheStore,
    pub client: NetworkClient,
    pub manifest: AssetManifest,
    pub generation: Generation,
}

impl WorkerContext {
    pub fn new(
        store: CacheStore,
        client: NetworkClient,
        manifest: AssetManifest,
        version: CacheVersion,
    ) -> Self {
        Self {
            store,
            client,
            manifest,
            generation: Generation::new(version),
        }
    }

    /// Partition name for `role` under the current generation.
    pub fn partition(&self, role: PartitionRole) -> String {
        self.generation.name(role)
    }
}

// ==================== Fetch Events ====================

/// A request intercepted on behalf of a controlled page.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub url: Url,
    pub method: Method,
    /// Top-level document loads get the root-document fallback when
    /// everything else fails; sub-resources do not.
    pub is_navigation: bool,
}

impl FetchEvent {
    pub fn new(method: Method, url: Url, is_navigation: bool) -> Self {
        Self {
            url,
            method,
            is_navigation,
        }
    }

    /// A plain GET for a sub-resource.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, false)
    }

    /// A top-level document load.
    pub fn navigation(url: Url) -> Self {
        Self::new(Method::GET, url, true)
    }
}

// ==================== Worker Responses ====================

/// Where a response came from, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseSource {
    /// Fetched from the network on this request.
    Network,
    /// Served from the named cache partition.
    Cache(String),
    /// Navigation fallback to the cached root document.
    RootFallback,
    /// Synthesized offline placeholder.
    Synthesized,
}

/// Response handed back to the page for a [`FetchEvent`].
#[derive(Debug, Clone)]
pub struct WorkerResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl WorkerResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn from_network(resp: FetchedResponse) -> Self {
        Self {
            status: resp.status,
            headers: resp.headers,
            body: resp.body,
            source: ResponseSource::Network,
        }
    }

    pub fn from_cached(partition: &str, entry: CachedResponse) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers,
            body: Bytes::from(entry.body),
            source: ResponseSource::Cache(partition.to_string()),
        }
    }

    pub(crate) fn root_fallback(entry: CachedResponse) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers,
            body: Bytes::from(entry.body),
            source: ResponseSource::RootFallback,
        }
    }

    /// The synthesized 404 served when nothing else is available.
    pub fn offline_fallback() -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        );
        Self {
            status: 404,
            headers,
            body: Bytes::from_static(OFFLINE_BODY.as_bytes()),
            source: ResponseSource::Synthesized,
        }
    }
}

/// Snapshot a network response into cacheable form.
pub(crate) fn cacheable(resp: &FetchedResponse) -> CachedResponse {
    CachedResponse::new(resp.status, resp.headers.clone(), resp.body.to_vec())
}

// ==================== Worker Host ====================

/// Owns the lifecycle controller and router for one worker instance.
pub struct WorkerHost {
    lifecycle: LifecycleController,
    router: RequestRouter,
}

impl WorkerHost {
    /// Builds a host and the receiver its lifecycle events arrive on.
    pub fn new(ctx: WorkerContext) -> (Self, UnboundedReceiver<WorkerEvent>) {
        let router = RequestRouter::new(ctx.clone());
        let (lifecycle, events) = LifecycleController::new(ctx);
        (Self { lifecycle, router }, events)
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    pub fn register_client(&mut self, id: impl Into<String>, url: Url) {
        self.lifecycle.register_client(id, url);
    }

    pub async fn install(&mut self) -> Result<InstallReport> {
        self.lifecycle.install().await
    }

    pub async fn activate(&mut self) -> Result<ActivationReport> {
        self.lifecycle.activate().await
    }

    pub async fn handle_fetch(&self, event: &FetchEvent) -> Result<WorkerResponse> {
        self.router.handle(event).await
    }

    /// Dispatches a raw control-channel message from a page.
    pub async fn handle_message(&mut self, raw: &str) -> Result<Option<ControlReply>> {
        handle_control_message(&mut self.lifecycle, raw).await
    }
}

// ==================== Tests ====================
