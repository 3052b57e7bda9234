//! Control channel between pages and the worker.
//!
//! Messages are JSON objects tagged by a `type` field. Unknown types and
//! malformed payloads are logged and dropped; the channel must never take the
//! worker down.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use chora_common::Result;

use crate::lifecycle::LifecycleController;

/// Message type tags accepted from pages.
const MSG_SKIP_WAITING: &str = "SKIP_WAITING";
const MSG_GET_CACHE_SIZE: &str = "GET_CACHE_SIZE";
const MSG_CLEAR_CACHE: &str = "CLEAR_CACHE";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

/// Reply sent back to the requesting page, when the message warrants one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ControlReply {
    /// Total bytes stored across every cache partition.
    #[serde(rename = "CACHE_SIZE")]
    CacheSize { size: u64 },
    /// All partitions were dropped.
    #[serde(rename = "CACHE_CLEARED")]
    CacheCleared { removed: usize },
}

/// Dispatch one raw control message.
///
/// `SKIP_WAITING` promotes a waiting worker and replies with nothing; the
/// lifecycle event stream carries the outcome. `GET_CACHE_SIZE` and
/// `CLEAR_CACHE` reply directly.
pub async fn handle_control_message(
    lifecycle: &mut LifecycleController,
    raw: &str,
) -> Result<Option<ControlReply>> {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "dropping malformed control message");
            return Ok(None);
        }
    };

    match envelope.kind.as_str() {
        MSG_SKIP_WAITING => {
            lifecycle.skip_waiting().await?;
            Ok(None)
        }
        MSG_GET_CACHE_SIZE => {
            let size = lifecycle.context().store.total_size().await;
            debug!(size, "reporting cache size");
            Ok(Some(ControlReply::CacheSize { size }))
        }
        MSG_CLEAR_CACHE => {
            let removed = lifecycle.context().store.clear_all().await;
            info!(removed, "cleared all cache partitions");
            Ok(Some(ControlReply::CacheCleared { removed }))
        }
        other => {
            debug!(kind = %other, "ignoring unknown control message");
            Ok(None)
        }
    }
}

// ==================== Tests ====================
