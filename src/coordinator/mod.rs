//! Per-node coordinator: liveness, discovery, and claim contention.
//!
//! ## Files & responsibilities
//! - **kv.rs**: [`KvCoordinator`], the store-backed facade implementing the
//!   [`Coordinator`] contract; composes the pieces below.
//! - **refresher.rs**: node-liveness worker; extends the node directory's
//!   TTL and raises the fatal signal when that stops working.
//! - **watcher.rs**: task discovery; enumerate-then-watch with index resume,
//!   reconnect backoff and full resync on index compaction.
//! - **claims.rs**: claim registry plus the per-claim TTL refresher workers.
//!
//! ## Wiring
//! ```text
//! Consumer::run()
//!   ├─ coordinator.init(ctx)      spawns the node refresher
//!   ├─ coordinator.watch(out) ──► TaskWatcher ──► out: mpsc<Task>
//!   └─ claim / release / done ──► ClaimRegistry + store CAS
//!
//! node refresher ── refresh failure ──► ctx.fatal ──► consumer shutdown
//! claim refresher ─ refresh failure ──► ctx.lost ───► handler stopped
//! watcher ── owned marker deleted ────► ctx.lost ───► handler stopped
//! ```
//!
//! ## Rules
//! - Claim contention is a value (`claim → false`), never an error.
//! - Every blocking operation observes the facade's close token; `close`
//!   propagates within one refresh interval in the worst case.
//! - After `close`, all operations are no-ops (`claim → false`, `watch →
//!   Ok(())`).

mod claims;
mod kv;
mod refresher;
mod watcher;

pub use kv::KvCoordinator;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CoordinatorError;
use crate::tasks::Task;

/// Consumer-side handle the coordinator signals through.
///
/// Bound at [`Coordinator::init`]; carries the claim-lost channel (stop the
/// handler, do not release) and the fatal channel (liveness is gone, shut
/// the consumer down).
#[derive(Clone)]
pub struct CoordinatorContext {
    lost_tx: mpsc::UnboundedSender<String>,
    fatal_tx: mpsc::UnboundedSender<CoordinatorError>,
}

impl CoordinatorContext {
    /// Creates a context from the consumer's signal channels.
    pub fn new(
        lost_tx: mpsc::UnboundedSender<String>,
        fatal_tx: mpsc::UnboundedSender<CoordinatorError>,
    ) -> Self {
        Self { lost_tx, fatal_tx }
    }

    /// Signals that this node's claim on `id` is gone; the consumer stops
    /// the handler without releasing.
    pub fn lost(&self, id: &str) {
        let _ = self.lost_tx.send(id.to_string());
    }

    /// Signals an unrecoverable coordinator failure; the consumer shuts
    /// down and surfaces `err` from `run`.
    pub fn fatal(&self, err: CoordinatorError) {
        let _ = self.fatal_tx.send(err);
    }
}

/// The per-node coordination contract.
///
/// Implemented by [`KvCoordinator`] (store-backed) and
/// [`EmbeddedCoordinator`](crate::EmbeddedCoordinator) (in-process); the
/// consumer loop drives either through this trait alone.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// This node's name within the namespace.
    fn name(&self) -> &str;

    /// Binds the consumer context, creates the namespace subtrees and the
    /// node's liveness entry, and starts background refreshing.
    ///
    /// Fails with [`CoordinatorError::NameCollision`] when another live node
    /// holds the same name.
    async fn init(&self, ctx: CoordinatorContext) -> Result<(), CoordinatorError>;

    /// Streams claimable tasks onto `out` until closed.
    ///
    /// Blocks the caller for the lifetime of the coordinator. Returns
    /// `Ok(())` after [`close`](Coordinator::close) (callers must not treat
    /// that as a cue to restart) and `Err` only on unrecoverable store
    /// failure.
    async fn watch(&self, out: mpsc::Sender<Task>) -> Result<(), CoordinatorError>;

    /// Attempts atomic ownership of `task`.
    ///
    /// `false` on contention *and* on store errors: if the failure was
    /// transient the task will be re-offered through the watch.
    async fn claim(&self, task: &Task) -> bool;

    /// Releases this node's claim so any node (including this one) may
    /// reclaim. Best-effort: the marker TTL is the backstop.
    async fn release(&self, task: &Task);

    /// Marks `task` consumed and removes it from the namespace entirely.
    async fn done(&self, task: &Task);

    /// Shuts the coordinator down: stops refreshers, unblocks `watch`,
    /// removes the liveness entry. Idempotent; further operations are
    /// no-ops.
    async fn close(&self);
}
