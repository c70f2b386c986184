//! # Task discovery watcher.
//!
//! Streams claimable tasks from the `tasks/` subtree to the consumer:
//!
//! 1. Enumerate existing tasks (recursive get); emit every task without an
//!    owner marker; remember the store index of the read.
//! 2. Watch from `index + 1`. Per event:
//!    - task directory or payload leaf created → read the payload and emit
//!      (payload submissions surface as the props create; bare submissions
//!      as the directory create);
//!    - owner marker deleted or expired → emit the parent task (it is
//!      reclaimable); if *we* were the owner, route claim-lost as well;
//!    - task directory deleted/expired while we own it → claim-lost only
//!      (the task itself is gone, nothing to re-offer);
//!    - owner marker created → someone else claimed it, ignore.
//!
//! Transient store errors retry with jittered exponential backoff capped at
//! half the node TTL, resuming from the last observed index. An
//! index-compaction error triggers a full re-enumeration. Emission
//! cooperates with the close token and with the consumer dropping its
//! receiver; either ends the watch with `Ok(())`.

use std::sync::Arc;
use std::time::Duration;

use tokio::{select, sync::mpsc, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::coordinator::claims::ClaimRegistry;
use crate::coordinator::CoordinatorContext;
use crate::error::CoordinatorError;
use crate::kv::paths::{Paths, TaskKey};
use crate::kv::{KvError, KvEvent, KvEventKind, KvStore, OWNER_MARKER, PROPS_KEY};
use crate::policies::BackoffPolicy;
use crate::tasks::Task;

pub(crate) struct TaskWatcher<S: KvStore> {
    store: Arc<S>,
    paths: Paths,
    claims: Arc<ClaimRegistry>,
    ctx: CoordinatorContext,
    backoff: BackoffPolicy,
    close: CancellationToken,
}

impl<S: KvStore> TaskWatcher<S> {
    pub fn new(
        store: Arc<S>,
        paths: Paths,
        claims: Arc<ClaimRegistry>,
        ctx: CoordinatorContext,
        backoff: BackoffPolicy,
        close: CancellationToken,
    ) -> Self {
        Self {
            store,
            paths,
            claims,
            ctx,
            backoff,
            close,
        }
    }

    /// Runs until close (`Ok`) or unrecoverable store failure (`Err`).
    pub async fn run(&self, out: &mpsc::Sender<Task>) -> Result<(), CoordinatorError> {
        let tasks_path = self.paths.tasks();

        'resync: loop {
            let (pending, mut index) = self.enumerate().await?;
            for task in pending {
                if !self.emit(out, task).await {
                    return Ok(());
                }
            }

            let mut prev_delay: Option<Duration> = None;
            loop {
                let result = select! {
                    _ = self.close.cancelled() => return Ok(()),
                    r = self.store.watch(&tasks_path, index) => r,
                };

                match result {
                    Ok(event) => {
                        prev_delay = None;
                        index = event.index;
                        if !self.handle(out, event).await {
                            return Ok(());
                        }
                    }
                    Err(KvError::IndexCleared) => {
                        debug!("watch index compacted, re-enumerating tasks");
                        continue 'resync;
                    }
                    Err(e) => {
                        let delay = self.backoff.next(prev_delay);
                        prev_delay = Some(delay);
                        warn!("task watch failed: {}, retrying in {:?}", e, delay);
                        select! {
                            _ = self.close.cancelled() => return Ok(()),
                            _ = time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    /// Lists tasks without an owner marker, plus the index to watch from.
    async fn enumerate(&self) -> Result<(Vec<Task>, u64), CoordinatorError> {
        let resp = self.store.get(&self.paths.tasks(), true).await?;

        let mut pending = Vec::new();
        if let Some(root) = resp.node {
            for child in &root.nodes {
                if !child.dir {
                    continue;
                }
                let Some(id) = child.key.rsplit('/').next() else {
                    continue;
                };
                if child.child(OWNER_MARKER).is_some() {
                    continue;
                }
                let task = match child.child(PROPS_KEY).and_then(|p| p.value.clone()) {
                    Some(payload) => Task::with_payload(id, payload),
                    None => Task::new(id),
                };
                pending.push(task);
            }
        }
        Ok((pending, resp.index))
    }

    /// Reads the task's payload leaf and builds the task to offer.
    ///
    /// A payload read failure degrades to a payload-less task; the watch
    /// must not stall on a transient read error.
    async fn load_task(&self, id: &str) -> Task {
        match self.store.get(&self.paths.props(id), false).await {
            Ok(resp) => match resp.node.and_then(|n| n.value) {
                Some(payload) => Task::with_payload(id, payload),
                None => Task::new(id),
            },
            Err(e) => {
                debug!("payload read for task '{}' failed: {}", id, e);
                Task::new(id)
            }
        }
    }

    /// Routes one watch event. Returns `false` when the consumer is gone.
    async fn handle(&self, out: &mpsc::Sender<Task>, event: KvEvent) -> bool {
        let Some(key) = self.paths.classify(&event.path) else {
            return true;
        };

        match (event.kind, key) {
            // New unit of work. A payload submission's one create event is
            // the props leaf; a bare submission's is the directory.
            (KvEventKind::Create, TaskKey::Dir(id) | TaskKey::Props(id)) => {
                let task = self.load_task(&id).await;
                self.emit(out, task).await
            }

            // The claim is gone; the task is up for grabs again.
            (KvEventKind::Delete | KvEventKind::Expire, TaskKey::Owner(id)) => {
                if self.claims.owns(&id) {
                    debug!("own claim on task '{}' disappeared", id);
                    self.claims.forget(&id);
                    self.ctx.lost(&id);
                }
                let task = self.load_task(&id).await;
                self.emit(out, task).await
            }

            // The whole task is gone; stop the handler if it was ours.
            (KvEventKind::Delete | KvEventKind::Expire, TaskKey::Dir(id)) => {
                if self.claims.owns(&id) {
                    debug!("task '{}' deleted while owned, stopping handler", id);
                    self.claims.forget(&id);
                    self.ctx.lost(&id);
                }
                true
            }

            // Someone else won the claim.
            (KvEventKind::Create, TaskKey::Owner(_)) => true,

            _ => true,
        }
    }

    /// Sends one task to the consumer, cooperating with close.
    async fn emit(&self, out: &mpsc::Sender<Task>, task: Task) -> bool {
        select! {
            _ = self.close.cancelled() => false,
            sent = out.send(task) => sent.is_ok(),
        }
    }
}
