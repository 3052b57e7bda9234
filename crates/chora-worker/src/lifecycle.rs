//! Worker lifecycle: install, activate, skip-waiting, retirement.
//!
//! Install pre-caches the app shell and the critical third-party assets into
//! the current generation's partitions. Activation evicts every partition of
//! older generations and takes control of all registered pages immediately,
//! without waiting for them to reload.

use hashbrown::HashMap;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};
use url::Url;

use chora_cache::{CacheVersion, PartitionRole};
use chora_common::{ChoraError, Result};

use crate::{cacheable, WorkerContext};

// ==================== States and Events ====================

/// Lifecycle state of one worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, install not yet started.
    Parsed,
    /// Pre-caching in progress.
    Installing,
    /// Pre-caching done, waiting to take control.
    Installed,
    /// Evicting stale generations and claiming pages.
    Activating,
    /// In control of page requests.
    Activated,
    /// Superseded by a newer worker.
    Redundant,
}

/// Broadcast to the embedding shell as the worker advances.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Pre-caching finished; the worker is ready to activate.
    Installed {
        version: CacheVersion,
        report: InstallReport,
    },
    /// The worker took control of all pages.
    Activated {
        version: CacheVersion,
        report: ActivationReport,
    },
}

/// Per-asset outcome counts of an install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub static_cached: usize,
    pub static_failed: usize,
    pub offline_cached: usize,
    pub offline_failed: usize,
}

impl InstallReport {
    pub fn failed(&self) -> usize {
        self.static_failed + self.offline_failed
    }
}

/// What an activation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Partition names evicted as stale.
    pub evicted: Vec<String>,
    /// Pages claimed.
    pub claimed: usize,
}

// ==================== Clients ====================

/// A page under (or eligible for) this worker's control.
#[derive(Debug, Clone)]
pub struct PageClient {
    pub id: String,
    pub url: Url,
    /// Version of the worker controlling this page, if any.
    pub controller: Option<CacheVersion>,
}

/// Registry of known pages.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, PageClient>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, url: Url) {
        let id = id.into();
        self.clients.insert(
            id.clone(),
            PageClient {
                id,
                url,
                controller: None,
            },
        );
    }

    pub fn remove(&mut self, id: &str) -> Option<PageClient> {
        self.clients.remove(id)
    }

    /// Take control of every registered page. Returns how many changed hands.
    pub fn claim_all(&mut self, version: &CacheVersion) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.controller.as_ref() != Some(version) {
                client.controller = Some(version.clone());
                claimed += 1;
            }
        }
        claimed
    }

    pub fn controlled_by(&self, version: &CacheVersion) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller.as_ref() == Some(version))
            .count()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ==================== Controller ====================

/// Drives one worker through its lifecycle.
pub struct LifecycleController {
    ctx: WorkerContext,
    state: WorkerState,
    clients: ClientRegistry,
    event_tx: UnboundedSender<WorkerEvent>,
}

impl LifecycleController {
    /// Create a controller and the receiver its events arrive on.
    pub fn new(ctx: WorkerContext) -> (Self, UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = unbounded_channel();
        (
            Self {
                ctx,
                state: WorkerState::Parsed,
                clients: ClientRegistry::new(),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    pub fn register_client(&mut self, id: impl Into<String>, url: Url) {
        self.clients.register(id, url);
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    fn set_state(&mut self, state: WorkerState) {
        debug!(from = ?self.state, to = ?state, "lifecycle transition");
        self.state = state;
    }

    fn emit(&self, event: WorkerEvent) {
        // The shell may have dropped the receiver; that is not an error here.
        let _ = self.event_tx.send(event);
    }

    /// Pre-cache the app shell and critical third-party assets.
    ///
    /// Opening the target partitions must succeed or the install fails and
    /// any previous generation stays in control. Individual asset failures
    /// only degrade coverage: they are counted and logged, and the install
    /// still completes.
    pub async fn install(&mut self) -> Result<InstallReport> {
        if self.state == WorkerState::Redundant {
            return Err(ChoraError::lifecycle("redundant worker cannot install"));
        }
        self.set_state(WorkerState::Installing);
        info!(version = %self.ctx.generation.version(), "install started");

        let static_name = self.ctx.partition(PartitionRole::Static);
        let offline_name = self.ctx.partition(PartitionRole::Offline);
        self.ctx.store.open_partition(&static_name).await?;
        self.ctx.store.open_partition(&offline_name).await?;

        let mut report = InstallReport::default();
        for url in self.ctx.manifest.static_urls() {
            if self.cache_asset(&static_name, &url).await {
                report.static_cached += 1;
            } else {
                report.static_failed += 1;
            }
        }
        for url in self.ctx.manifest.critical_remote() {
            if self.cache_asset(&offline_name, url).await {
                report.offline_cached += 1;
            } else {
                report.offline_failed += 1;
            }
        }

        self.set_state(WorkerState::Installed);
        info!(
            cached = report.static_cached + report.offline_cached,
            failed = report.failed(),
            "install complete, waiting to activate"
        );
        self.emit(WorkerEvent::Installed {
            version: self.ctx.generation.version().clone(),
            report: report.clone(),
        });
        Ok(report)
    }

    async fn cache_asset(&self, partition: &str, url: &Url) -> bool {
        match self.ctx.client.get(url).await {
            Ok(resp) if resp.ok() => {
                self.ctx.store.put(partition, url.as_str(), cacheable(&resp)).await;
                true
            }
            Ok(resp) => {
                warn!(%url, status = resp.status, "pre-cache fetch returned error status");
                false
            }
            Err(e) => {
                warn!(%url, error = %e, "pre-cache fetch failed");
                false
            }
        }
    }

    /// Evict stale generations and take control of every registered page.
    pub async fn activate(&mut self) -> Result<ActivationReport> {
        if self.state == WorkerState::Redundant {
            return Err(ChoraError::lifecycle("redundant worker cannot activate"));
        }
        self.set_state(WorkerState::Activating);

        let mut evicted = Vec::new();
        for name in self.ctx.store.partition_names().await {
            if !self.ctx.generation.contains(&name) {
                self.ctx.store.delete_partition(&name).await;
                info!(partition = %name, "evicted stale partition");
                evicted.push(name);
            }
        }

        let claimed = self.clients.claim_all(self.ctx.generation.version());
        self.set_state(WorkerState::Activated);
        info!(
            version = %self.ctx.generation.version(),
            evicted = evicted.len(),
            claimed,
            "activated"
        );

        let report = ActivationReport { evicted, claimed };
        self.emit(WorkerEvent::Activated {
            version: self.ctx.generation.version().clone(),
            report: report.clone(),
        });
        Ok(report)
    }

    /// Promote an installed-and-waiting worker immediately.
    ///
    /// Returns whether a promotion happened. In any state other than
    /// `Installed` there is nothing to promote and the request is ignored.
    pub async fn skip_waiting(&mut self) -> Result<bool> {
        if self.state != WorkerState::Installed {
            debug!(state = ?self.state, "skip-waiting ignored, no worker waiting");
            return Ok(false);
        }
        self.activate().await?;
        Ok(true)
    }

    /// Mark this worker as superseded. Terminal.
    pub fn retire(&mut self) {
        self.set_state(WorkerState::Redundant);
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use chora_cache::{CacheStore, CacheVersion};
    use chora_manifest::AssetManifest;
    use chora_net::NetworkClient;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn shell_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/styles.css"))
            .respond_with(ResponseTemplate::new(200).set_body_string("body{}"))
            .mount(&server)
            .await;
        server
    }

    fn controller_for(
        server: &MockServer,
        store: CacheStore,
        version: &str,
    ) -> (LifecycleController, UnboundedReceiver<WorkerEvent>) {
        let origin: Url = server.uri().parse().unwrap();
        let manifest = AssetManifest::new(origin)
            .with_static_local(["/index.html", "/styles.css"]);
        let ctx = WorkerContext::new(
            store,
            NetworkClient::with_defaults().unwrap(),
            manifest,
            CacheVersion::new(version),
        );
        LifecycleController::new(ctx)
    }

    #[tokio::test]
    async fn test_install_precaches_app_shell() {
        let server = shell_server().await;
        let store = CacheStore::in_memory();
        let (mut lc, mut events) = controller_for(&server, store.clone(), "v2.2");

        let report = lc.install().await.unwrap();
        assert_eq!(lc.state(), WorkerState::Installed);
        assert_eq!(report.static_cached, 2);
        assert_eq!(report.failed(), 0);

        let index = format!("{}/index.html", server.uri());
        assert!(store.contains("static-v2.2", &index).await);

        match events.recv().await.unwrap() {
            WorkerEvent::Installed { version, report } => {
                assert_eq!(version.as_str(), "v2.2");
                assert_eq!(report.static_cached, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_install_tolerates_missing_asset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;
        // /styles.css not mounted: wiremock answers 404.
        let store = CacheStore::in_memory();
        let (mut lc, _events) = controller_for(&server, store.clone(), "v2.2");

        let report = lc.install().await.unwrap();
        assert_eq!(lc.state(), WorkerState::Installed);
        assert_eq!(report.static_cached, 1);
        assert_eq!(report.static_failed, 1);

        let css = format!("{}/styles.css", server.uri());
        assert!(!store.contains("static-v2.2", &css).await);
    }

    #[tokio::test]
    async fn test_install_fails_when_store_unavailable() {
        let server = shell_server().await;
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open_at(dir.path()).unwrap();

        // Backing directory disappears before install runs.
        std::fs::remove_dir_all(dir.path()).unwrap();

        let (mut lc, _events) = controller_for(&server, store, "v2.2");
        assert!(lc.install().await.is_err());
    }

    #[tokio::test]
    async fn test_activation_evicts_previous_generation() {
        let server = shell_server().await;
        let store = CacheStore::in_memory();

        // Leftovers from the previous generation.
        store.open_partition("static-v2.1").await.unwrap();
        store.open_partition("dynamic-v2.1").await.unwrap();
        store.open_partition("offline-v2.1").await.unwrap();

        let (mut lc, _events) = controller_for(&server, store.clone(), "v2.2");
        lc.install().await.unwrap();
        let report = lc.activate().await.unwrap();

        assert_eq!(lc.state(), WorkerState::Activated);
        assert_eq!(report.evicted.len(), 3);
        assert!(report.evicted.contains(&"static-v2.1".to_string()));

        let names = store.partition_names().await;
        assert!(names.contains(&"static-v2.2".to_string()));
        assert!(!names.iter().any(|n| n.ends_with("v2.1")));
    }

    #[tokio::test]
    async fn test_activation_claims_registered_clients() {
        let server = shell_server().await;
        let (mut lc, _events) = controller_for(&server, CacheStore::in_memory(), "v2.2");
        let page: Url = format!("{}/index.html", server.uri()).parse().unwrap();
        lc.register_client("tab-1", page.clone());
        lc.register_client("tab-2", page);

        lc.install().await.unwrap();
        let report = lc.activate().await.unwrap();

        assert_eq!(report.claimed, 2);
        assert_eq!(lc.clients().controlled_by(&CacheVersion::new("v2.2")), 2);
    }

    #[tokio::test]
    async fn test_skip_waiting_only_from_installed() {
        let server = shell_server().await;
        let (mut lc, _events) = controller_for(&server, CacheStore::in_memory(), "v2.2");

        // Nothing installed yet: ignored.
        assert!(!lc.skip_waiting().await.unwrap());
        assert_eq!(lc.state(), WorkerState::Parsed);

        lc.install().await.unwrap();
        assert!(lc.skip_waiting().await.unwrap());
        assert_eq!(lc.state(), WorkerState::Activated);

        // Already active: ignored again.
        assert!(!lc.skip_waiting().await.unwrap());
    }

    #[tokio::test]
    async fn test_redundant_worker_cannot_install() {
        let server = shell_server().await;
        let (mut lc, _events) = controller_for(&server, CacheStore::in_memory(), "v2.2");
        lc.retire();

        assert!(lc.install().await.is_err());
        assert!(lc.activate().await.is_err());
        assert_eq!(lc.state(), WorkerState::Redundant);
    }
}
