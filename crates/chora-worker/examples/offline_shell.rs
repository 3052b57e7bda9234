//! End-to-end walkthrough: install a worker for the Chora Planner app shell,
//! kick off the background prefetcher, answer a navigation, then query the
//! cache over the control channel.
//!
//! ```text
//! cargo run --example offline_shell -- https://planner.example
//! ```

use tracing::{info, warn};
use url::Url;

use chora_cache::{CacheStore, CacheVersion};
use chora_common::{init_logging, LogConfig};
use chora_manifest::AssetManifest;
use chora_net::NetworkClient;
use chora_prefetch::{PrefetchStore, Prefetcher};
use chora_worker::{FetchEvent, WorkerContext, WorkerHost, CACHE_VERSION};

#[tokio::main]
async fn main() {
    init_logging(LogConfig::default().with_filter("info,chora_worker=debug"));

    let origin: Url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://planner.example".to_string())
        .parse()
        .expect("origin must be a valid URL");

    let store = CacheStore::in_memory();
    let client = NetworkClient::with_defaults().expect("client construction");
    let manifest = AssetManifest::app_shell(origin.clone());

    let ctx = WorkerContext::new(
        store,
        client.clone(),
        manifest.clone(),
        CacheVersion::new(CACHE_VERSION),
    );
    let (mut host, mut events) = WorkerHost::new(ctx);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(?event, "lifecycle event");
        }
    });

    // Second availability path: critical assets into the flat blob store.
    let prefetcher = Prefetcher::new(
        PrefetchStore::in_memory(),
        client,
        manifest.critical_remote().to_vec(),
    );
    let prefetch = prefetcher.spawn();

    match host.install().await {
        Ok(report) => info!(?report, "installed"),
        Err(e) => warn!(error = %e, "install degraded"),
    }
    host.activate().await.expect("activation");

    let response = host
        .handle_fetch(&FetchEvent::navigation(origin))
        .await
        .expect("navigation");
    info!(
        status = response.status,
        source = ?response.source,
        bytes = response.body.len(),
        "navigation answered"
    );

    if let Ok(Some(reply)) = host.handle_message(r#"{"type":"GET_CACHE_SIZE"}"#).await {
        info!(?reply, "control reply");
    }

    let report = prefetch.await.expect("prefetch task");
    info!(?report, "prefetch finished");
}
