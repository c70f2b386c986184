//! # Node-liveness refresher.
//!
//! One worker per coordinator, started by `init`. Extends the TTL on
//! `nodes/<name>` every `node_ttl / 2` (min 1 s). The node directory's
//! presence *is* this node's liveness: when a refresh fails (the directory
//! was deleted, expired, or the store rejected the update) the worker
//! raises the fatal signal and exits, and the consumer loop tears everything
//! down.

use std::{sync::Arc, time::Duration};

use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::coordinator::CoordinatorContext;
use crate::error::CoordinatorError;
use crate::kv::KvStore;

/// Keeps `nodes/<name>` alive until `close` fires or liveness is lost.
pub(crate) async fn node_refresher<S: KvStore>(
    store: Arc<S>,
    ctx: CoordinatorContext,
    name: String,
    node_path: String,
    ttl: Duration,
    period: Duration,
    close: CancellationToken,
) {
    loop {
        select! {
            _ = close.cancelled() => return,
            _ = time::sleep(period) => {}
        }

        match store.refresh_ttl(&node_path, ttl, true).await {
            Ok(()) => debug!("refreshed liveness for node '{}'", name),
            Err(e) => {
                error!("node '{}' failed to refresh liveness: {}", name, e);
                ctx.fatal(CoordinatorError::LivenessLost { name, source: e });
                return;
            }
        }
    }
}
