//! # Claim registry and per-claim refreshers.
//!
//! Ownership of a task is a single short-TTL key in the store; locally it is
//! mirrored by a [`ClaimRegistry`] entry holding the cancellation token and
//! join handle of that claim's refresher worker.
//!
//! A refresher extends the owner marker every `claim_ttl / 2` (min 1 s).
//! When a refresh fails the claim is gone for good: the worker forgets the
//! registry entry, signals claim-lost through the context, and exits. It
//! never attempts to reclaim.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::{select, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::coordinator::CoordinatorContext;
use crate::kv::KvStore;

/// Serialized owner-marker value, e.g. `{"node":"worker-1"}`.
pub(crate) fn owner_value(node: &str) -> String {
    serde_json::json!({ "node": node }).to_string()
}

struct ClaimHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Live claims held by this coordinator, keyed by task id.
#[derive(Default)]
pub(crate) struct ClaimRegistry {
    claims: DashMap<String, ClaimHandle>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this coordinator currently holds a claim on `id`.
    pub fn owns(&self, id: &str) -> bool {
        self.claims.contains_key(id)
    }

    /// Records a freshly won claim and its refresher worker.
    pub fn register(&self, id: &str, cancel: CancellationToken, join: JoinHandle<()>) {
        self.claims
            .insert(id.to_string(), ClaimHandle { cancel, join });
    }

    /// Drops the entry and stops its refresher without waiting for it.
    ///
    /// Used when the claim is already gone on the store side (expired or
    /// externally deleted); the detached worker exits at its next tick.
    pub fn forget(&self, id: &str) {
        if let Some((_, handle)) = self.claims.remove(id) {
            handle.cancel.cancel();
        }
    }

    /// Stops the refresher for `id` and waits for it to exit.
    pub async fn drop_claim(&self, id: &str) {
        if let Some((_, handle)) = self.claims.remove(id) {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }
    }

    /// Cancels every refresher and waits for all of them.
    pub async fn close_all(&self) {
        let handles: Vec<ClaimHandle> = {
            let ids: Vec<String> = self.claims.iter().map(|e| e.key().clone()).collect();
            ids.into_iter()
                .filter_map(|id| self.claims.remove(&id).map(|(_, h)| h))
                .collect()
        };

        for h in &handles {
            h.cancel.cancel();
        }
        join_all(handles.into_iter().map(|h| h.join)).await;
    }
}

/// Keeps one owner marker alive until cancelled or the claim is lost.
pub(crate) async fn claim_refresher<S: KvStore>(
    store: Arc<S>,
    registry: Arc<ClaimRegistry>,
    ctx: CoordinatorContext,
    id: String,
    owner_path: String,
    ttl: Duration,
    period: Duration,
    cancel: CancellationToken,
) {
    loop {
        select! {
            _ = cancel.cancelled() => return,
            _ = time::sleep(period) => {}
        }

        if let Err(e) = store.refresh_ttl(&owner_path, ttl, false).await {
            warn!("claim refresh for task '{}' failed: {}", id, e);
            registry.forget(&id);
            ctx.lost(&id);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_value_wire_format() {
        assert_eq!(owner_value("worker-1"), r#"{"node":"worker-1"}"#);
    }
}
