//! # Store-backed coordinator facade.
//!
//! [`KvCoordinator`] composes the node refresher, the task watcher and the
//! claim registry over any [`KvStore`] and exposes the
//! [`Coordinator`](crate::Coordinator) contract to the consumer loop.
//!
//! The first coordinator to touch a namespace creates its `tasks/` and
//! `nodes/` subtrees. `init` then registers this node's liveness directory,
//! refusing to proceed when a live node already holds the name, and starts
//! refreshing it in the background.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, OnceLock,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::coordinator::claims::{claim_refresher, owner_value, ClaimRegistry};
use crate::coordinator::refresher::node_refresher;
use crate::coordinator::watcher::TaskWatcher;
use crate::coordinator::{Coordinator, CoordinatorContext};
use crate::error::CoordinatorError;
use crate::kv::paths::Paths;
use crate::kv::{KvError, KvStore};
use crate::tasks::Task;

/// Coordinator riding on a watchable, TTL-aware key-value store.
pub struct KvCoordinator<S: KvStore> {
    cfg: Config,
    store: Arc<S>,
    paths: Paths,
    claims: Arc<ClaimRegistry>,
    ctx: OnceLock<CoordinatorContext>,
    close_token: CancellationToken,
    closed: AtomicBool,
    watching: AtomicBool,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl<S: KvStore> KvCoordinator<S> {
    /// Creates a coordinator for `cfg.namespace` backed by `store`.
    ///
    /// Nothing touches the store until [`init`](Coordinator::init).
    pub fn new(cfg: Config, store: Arc<S>) -> Arc<Self> {
        let paths = Paths::new(&cfg.namespace);
        Arc::new(Self {
            cfg,
            store,
            paths,
            claims: Arc::new(ClaimRegistry::new()),
            ctx: OnceLock::new(),
            close_token: CancellationToken::new(),
            closed: AtomicBool::new(false),
            watching: AtomicBool::new(false),
            refresher: Mutex::new(None),
        })
    }

    /// Creates a directory, treating "already there" as success.
    async fn ensure_dir(&self, path: &str) -> Result<(), CoordinatorError> {
        match self.store.create_if_absent(path, None, None).await {
            Ok(()) | Err(KvError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<S: KvStore> Coordinator for KvCoordinator<S> {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    async fn init(&self, ctx: CoordinatorContext) -> Result<(), CoordinatorError> {
        if self.ctx.set(ctx.clone()).is_err() {
            return Err(CoordinatorError::AlreadyInitialized);
        }

        self.ensure_dir(&self.paths.tasks()).await?;
        self.ensure_dir(&self.paths.nodes()).await?;

        let node_path = self.paths.node(&self.cfg.name);
        match self
            .store
            .create_if_absent(&node_path, None, Some(self.cfg.node_ttl_clamped()))
            .await
        {
            Ok(()) => {}
            Err(KvError::AlreadyExists { .. }) => {
                return Err(CoordinatorError::NameCollision {
                    name: self.cfg.name.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        }

        let join = tokio::spawn(node_refresher(
            Arc::clone(&self.store),
            ctx,
            self.cfg.name.clone(),
            node_path,
            self.cfg.node_ttl_clamped(),
            self.cfg.node_refresh_period(),
            self.close_token.clone(),
        ));
        *self.refresher.lock().unwrap() = Some(join);

        info!(
            "node '{}' joined namespace '{}'",
            self.cfg.name, self.cfg.namespace
        );
        Ok(())
    }

    async fn watch(&self, out: mpsc::Sender<Task>) -> Result<(), CoordinatorError> {
        if self.close_token.is_cancelled() {
            return Ok(());
        }
        let Some(ctx) = self.ctx.get() else {
            return Err(CoordinatorError::NotInitialized);
        };
        if self.watching.swap(true, Ordering::SeqCst) {
            return Err(CoordinatorError::WatchInProgress);
        }

        let watcher = TaskWatcher::new(
            Arc::clone(&self.store),
            self.paths.clone(),
            Arc::clone(&self.claims),
            ctx.clone(),
            self.cfg.watch_backoff(),
            self.close_token.clone(),
        );
        let result = watcher.run(&out).await;
        self.watching.store(false, Ordering::SeqCst);
        result
    }

    async fn claim(&self, task: &Task) -> bool {
        if self.close_token.is_cancelled() {
            return false;
        }
        let Some(ctx) = self.ctx.get() else {
            return false;
        };

        let id = task.id();
        let owner_path = self.paths.owner(id);
        let value = owner_value(&self.cfg.name);
        let ttl = self.cfg.claim_ttl_clamped();

        match self
            .store
            .create_if_absent(&owner_path, Some(&value), Some(ttl))
            .await
        {
            Ok(()) => {}
            Err(KvError::AlreadyExists { .. }) => {
                debug!("task '{}' already claimed", id);
                return false;
            }
            Err(e) => {
                warn!("claim attempt for task '{}' failed: {}", id, e);
                return false;
            }
        }

        let cancel = CancellationToken::new();
        let join = tokio::spawn(claim_refresher(
            Arc::clone(&self.store),
            Arc::clone(&self.claims),
            ctx.clone(),
            id.to_string(),
            owner_path,
            ttl,
            self.cfg.claim_refresh_period(),
            cancel.clone(),
        ));
        self.claims.register(id, cancel, join);

        debug!("node '{}' claimed task '{}'", self.cfg.name, id);
        true
    }

    async fn release(&self, task: &Task) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let id = task.id();
        self.claims.drop_claim(id).await;

        match self.store.delete(&self.paths.owner(id), false).await {
            Ok(()) | Err(KvError::NotFound { .. }) => {
                debug!("released task '{}'", id);
            }
            // Best-effort: the marker TTL cleans up eventually.
            Err(e) => warn!("release of task '{}' failed: {}", id, e),
        }
    }

    async fn done(&self, task: &Task) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let id = task.id();
        self.claims.drop_claim(id).await;

        match self.store.delete(&self.paths.task(id), true).await {
            Ok(()) | Err(KvError::NotFound { .. }) => {
                debug!("task '{}' done, removed from namespace", id);
            }
            Err(e) => warn!("removing finished task '{}' failed: {}", id, e),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.close_token.cancel();

        self.claims.close_all().await;
        let refresher = self.refresher.lock().unwrap().take();
        if let Some(join) = refresher {
            let _ = join.await;
        }

        if self.ctx.get().is_some() {
            let node_path = self.paths.node(&self.cfg.name);
            match self.store.delete(&node_path, true).await {
                Ok(()) | Err(KvError::NotFound { .. }) => {}
                Err(e) => warn!("removing node entry '{}' failed: {}", node_path, e),
            }
        }

        info!("node '{}' left namespace '{}'", self.cfg.name, self.cfg.namespace);
    }
}
