//! Retrieval strategies: Cache-First and Network-First.
//!
//! Cache-First serves app shell and critical assets without touching the
//! network once cached. Network-First keeps runtime data fresh while online
//! and degrades through a fixed cache fallback chain when the network goes
//! away.

use tracing::{debug, warn};

use chora_cache::PartitionRole;
use chora_common::{ChoraError, Result};

use crate::{cacheable, FetchEvent, WorkerContext, WorkerResponse};

/// Serve from the target partition; on a miss, fetch and cache.
///
/// Only successful fetches are cached, so a transient error never poisons the
/// partition. A miss with the network down is a hard error: for shell assets
/// there is no meaningful fallback.
pub async fn cache_first(
    ctx: &WorkerContext,
    partition: &str,
    event: &FetchEvent,
) -> Result<WorkerResponse> {
    let url = event.url.as_str();
    if let Some(hit) = ctx.store.lookup(partition, url).await {
        debug!(%url, partition, "cache hit");
        return Ok(WorkerResponse::from_cached(partition, hit));
    }

    debug!(%url, partition, "cache miss, fetching");
    let resp = ctx
        .client
        .get(&event.url)
        .await
        .map_err(|e| ChoraError::network(e.to_string()))?;
    if resp.ok() {
        ctx.store.put(partition, url, cacheable(&resp)).await;
    }
    Ok(WorkerResponse::from_network(resp))
}

/// Fetch from the network; on success cache into the target partition and
/// serve. On failure, walk the cache fallback chain.
///
/// The chain is the target partition, then offline, static and dynamic of the
/// current generation. When every lookup misses, a navigation gets the cached
/// root document; anything else gets the synthesized offline response. This
/// strategy never returns an error.
pub async fn network_first(
    ctx: &WorkerContext,
    partition: &str,
    event: &FetchEvent,
) -> WorkerResponse {
    let url = event.url.as_str();
    match ctx.client.get(&event.url).await {
        Ok(resp) if resp.ok() => {
            ctx.store.put(partition, url, cacheable(&resp)).await;
            return WorkerResponse::from_network(resp);
        }
        Ok(resp) => {
            debug!(%url, status = resp.status, "network answered with error status, trying cache");
        }
        Err(e) => {
            warn!(%url, error = %e, "network fetch failed, trying cache");
        }
    }

    for name in fallback_chain(ctx, partition) {
        if let Some(hit) = ctx.store.lookup(&name, url).await {
            debug!(%url, partition = %name, "served from fallback cache");
            return WorkerResponse::from_cached(&name, hit);
        }
    }

    if event.is_navigation {
        let root = ctx.manifest.root_document();
        let static_name = ctx.partition(PartitionRole::Static);
        if let Some(hit) = ctx.store.lookup(&static_name, root.as_str()).await {
            debug!(%url, "navigation fallback to cached root document");
            return WorkerResponse::root_fallback(hit);
        }
    }

    debug!(%url, "nothing cached, synthesizing offline response");
    WorkerResponse::offline_fallback()
}

/// Target partition first, then the remaining partitions of the current
/// generation in fixed order, deduplicated.
fn fallback_chain(ctx: &WorkerContext, partition: &str) -> Vec<String> {
    let mut chain = vec![partition.to_string()];
    for role in [PartitionRole::Offline, PartitionRole::Static, PartitionRole::Dynamic] {
        let name = ctx.partition(role);
        if !chain.contains(&name) {
            chain.push(name);
        }
    }
    chain
}

// ==================== Tests ====================
