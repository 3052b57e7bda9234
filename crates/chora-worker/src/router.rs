//! Request routing: classify each fetch event and dispatch it to a strategy.
//!
//! Only GET requests participate in caching. Everything else passes straight
//! through to the network, errors included.

use http::Method;
use tracing::debug;

use chora_cache::PartitionRole;
use chora_common::{ChoraError, Result};
use chora_manifest::AssetClass;

use crate::strategy::{cache_first, network_first};
use crate::{FetchEvent, WorkerContext, WorkerResponse};

/// Routes fetch events for one worker.
#[derive(Clone)]
pub struct RequestRouter {
    ctx: WorkerContext,
}

impl RequestRouter {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Handle one intercepted request.
    pub async fn handle(&self, event: &FetchEvent) -> Result<WorkerResponse> {
        if event.method != Method::GET {
            debug!(url = %event.url, method = %event.method, "pass-through, non-GET");
            let resp = self
                .ctx
                .client
                .execute(event.method.clone(), &event.url)
                .await
                .map_err(|e| ChoraError::network(e.to_string()))?;
            return Ok(WorkerResponse::from_network(resp));
        }

        let class = self.ctx.manifest.classify(&event.url);
        debug!(url = %event.url, ?class, navigation = event.is_navigation, "routing");
        match class {
            AssetClass::StaticLocal => {
                let partition = self.ctx.partition(PartitionRole::Static);
                // A bare-origin request must hit the key the root document
                // was installed under, not a key for "/".
                let url = self.ctx.manifest.canonical_url(&event.url);
                let event = FetchEvent::new(event.method.clone(), url, event.is_navigation);
                cache_first(&self.ctx, &partition, &event).await
            }
            AssetClass::CriticalRemote => {
                let partition = self.ctx.partition(PartitionRole::Offline);
                cache_first(&self.ctx, &partition, event).await
            }
            AssetClass::Other => {
                let partition = self.ctx.partition(PartitionRole::Dynamic);
                Ok(network_first(&self.ctx, &partition, event).await)
            }
        }
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResponseSource;
    use chora_cache::{CacheStore, CacheVersion, CachedResponse};
    use chora_manifest::AssetManifest;
    use chora_net::NetworkClient;
    use hashbrown::HashMap;
    use url::Url;
    use wiremock::matchers::{method as http_method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn router_for(origin: &str, store: CacheStore) -> RequestRouter {
        let origin: Url = origin.parse().unwrap();
        let manifest = AssetManifest::new(origin)
            .with_static_local(["/index.html", "/assets/js/app.js"])
            .with_critical_remote([Url::parse("https://cdn.example/pdf.min.js").unwrap()]);
        RequestRouter::new(WorkerContext::new(
            store,
            NetworkClient::with_defaults().unwrap(),
            manifest,
            CacheVersion::new("v2.2"),
        ))
    }

    fn entry(body: &str) -> CachedResponse {
        CachedResponse::new(200, HashMap::new(), body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_static_asset_served_cache_first() {
        let store = CacheStore::in_memory();
        let router = router_for("http://127.0.0.1:1", store.clone());
        let url: Url = "http://127.0.0.1:1/assets/js/app.js".parse().unwrap();
        store.put("static-v2.2", url.as_str(), entry("export {};")).await;

        // Origin unreachable: only a cache hit can answer.
        let resp = router.handle(&FetchEvent::get(url)).await.unwrap();
        assert_eq!(resp.source, ResponseSource::Cache("static-v2.2".into()));
    }

    #[tokio::test]
    async fn test_bare_origin_navigation_served_from_cache_offline() {
        let store = CacheStore::in_memory();
        let router = router_for("http://127.0.0.1:1", store.clone());

        // Install caches the shell under its full URL, never under "/".
        store
            .put(
                "static-v2.2",
                "http://127.0.0.1:1/index.html",
                entry("<html>shell</html>"),
            )
            .await;

        // Origin unreachable: a navigation to the bare origin must still
        // resolve to the cached root document, not a network error.
        let bare: Url = "http://127.0.0.1:1/".parse().unwrap();
        let resp = router.handle(&FetchEvent::navigation(bare)).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.source, ResponseSource::Cache("static-v2.2".into()));
        assert_eq!(resp.body.as_ref(), b"<html>shell</html>");
    }

    #[tokio::test]
    async fn test_critical_remote_targets_offline_partition() {
        let store = CacheStore::in_memory();
        let router = router_for("http://127.0.0.1:1", store.clone());
        let url: Url = "https://cdn.example/pdf.min.js".parse().unwrap();
        store.put("offline-v2.2", url.as_str(), entry("lib")).await;

        let resp = router.handle(&FetchEvent::get(url)).await.unwrap();
        assert_eq!(resp.source, ResponseSource::Cache("offline-v2.2".into()));
    }

    #[tokio::test]
    async fn test_other_requests_route_network_first() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(path("/api/events.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let store = CacheStore::in_memory();
        let router = router_for(server.uri().as_str(), store.clone());
        let url: Url = format!("{}/api/events.json", server.uri()).parse().unwrap();

        let resp = router.handle(&FetchEvent::get(url.clone())).await.unwrap();
        assert_eq!(resp.source, ResponseSource::Network);
        assert!(store.contains("dynamic-v2.2", url.as_str()).await);
    }

    #[tokio::test]
    async fn test_non_get_passes_through_uncached() {
        let server = MockServer::start().await;
        Mock::given(http_method("POST"))
            .and(path("/api/events"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .mount(&server)
            .await;

        let store = CacheStore::in_memory();
        let router = router_for(server.uri().as_str(), store.clone());
        let url: Url = format!("{}/api/events", server.uri()).parse().unwrap();
        let event = FetchEvent::new(Method::POST, url, false);

        let resp = router.handle(&event).await.unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(resp.source, ResponseSource::Network);
        assert!(store.partition_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_get_network_failure_propagates() {
        let router = router_for("http://127.0.0.1:1", CacheStore::in_memory());
        let url: Url = "http://127.0.0.1:1/api/events".parse().unwrap();
        let event = FetchEvent::new(Method::POST, url, false);

        assert!(router.handle(&event).await.is_err());
    }
}
