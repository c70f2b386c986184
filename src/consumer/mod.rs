//! # Consumer loop: drives a coordinator and runs handlers.
//!
//! [`Consumer`] is the merge point of the runtime. A single select-style
//! loop owns the `running` map; handlers execute as parallel tasks outside
//! it and report back through a [`JoinSet`].
//!
//! ## Architecture
//! ```text
//! coordinator.watch() ──► tasks ──┐
//! claim refreshers ────► lost ────┤
//! node refresher ──────► fatal ───┼──► Consumer::run() select loop
//! Consumer::shutdown() ► stop ────┤         │
//! handler returns ─────► joinset ─┘         ├─► balancer.can_claim?
//!                                           ├─► coordinator.claim?
//!                                           └─► spawn handler.run(task, stop)
//! ```
//!
//! ## Rules
//! - Only this loop mutates the `running` map; everything else communicates
//!   by sending events the loop consumes.
//! - A task already in `running` is never offered to the balancer again
//!   until its handler finishes (one handler per task per node).
//! - Handler outcome drives the claim: consumed → `done`, not consumed or
//!   error → `release`, claim lost → neither.
//! - On shutdown every running handler is stopped and its return treated as
//!   a release, so other nodes can pick the work up.
//! - Handler panics are caught and treated as failed runs; they never take
//!   the loop down.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::FutureExt;
use tokio::{
    select,
    sync::{mpsc, RwLock},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::coordinator::{Coordinator, CoordinatorContext};
use crate::error::{HandlerError, RuntimeError};
use crate::tasks::{Balancer, HandlerRef, Task};

/// Capacity of the discovery channel between watcher and loop.
///
/// Back-pressure on the watcher is acceptable; redelivery order is not
/// guaranteed anyway.
const TASK_CHANNEL_CAPACITY: usize = 64;

struct RunningHandler {
    task: Task,
    stop: CancellationToken,
    /// Set when the claim disappeared out from under us; the handler's
    /// return must then neither release nor complete the task.
    lost: bool,
}

type HandlerOutcome = (String, Result<bool, HandlerError>);

/// Runs handlers for tasks claimed through a [`Coordinator`].
pub struct Consumer {
    coord: Arc<dyn Coordinator>,
    handler: HandlerRef,
    balancer: Arc<dyn Balancer>,
    running: Arc<RwLock<HashMap<String, RunningHandler>>>,
    stop: CancellationToken,
    done: CancellationToken,
    started: AtomicBool,
}

impl Consumer {
    /// Creates a consumer over `coord`, executing tasks with `handler` and
    /// admitting claims through `balancer`.
    pub fn new(
        coord: Arc<dyn Coordinator>,
        handler: HandlerRef,
        balancer: Arc<dyn Balancer>,
    ) -> Self {
        Self {
            coord,
            handler,
            balancer,
            running: Arc::new(RwLock::new(HashMap::new())),
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Snapshot of the task ids currently being handled, sorted.
    ///
    /// Safe to call from any task at any time.
    pub async fn tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.read().await.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Requests shutdown and waits for [`run`](Consumer::run) to finish.
    ///
    /// Idempotent; callable from any task.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        if self.started.load(Ordering::SeqCst) {
            self.done.cancelled().await;
        }
    }

    /// Initializes the coordinator and runs until shutdown or fatal error.
    ///
    /// Returns `Ok(())` after [`shutdown`](Consumer::shutdown) (or after the
    /// coordinator was closed externally), `Err` when the coordinator lost
    /// liveness or failed. Either way the consumer has already stopped its
    /// handlers and closed the coordinator.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyRunning);
        }
        let result = self.run_inner().await;
        self.done.cancel();
        result
    }

    async fn run_inner(&self) -> Result<(), RuntimeError> {
        let (task_tx, mut task_rx) = mpsc::channel::<Task>(TASK_CHANNEL_CAPACITY);
        let (lost_tx, mut lost_rx) = mpsc::unbounded_channel::<String>();
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();

        let ctx = CoordinatorContext::new(lost_tx, fatal_tx.clone());
        self.coord
            .init(ctx)
            .await
            .map_err(|source| RuntimeError::InitFailed { source })?;

        // Watch blocks for the coordinator's lifetime; a watch error is as
        // fatal as losing liveness.
        let watch_join = {
            let coord = Arc::clone(&self.coord);
            tokio::spawn(async move {
                if let Err(e) = coord.watch(task_tx).await {
                    let _ = fatal_tx.send(e);
                }
            })
        };

        let mut handlers: JoinSet<HandlerOutcome> = JoinSet::new();
        let mut fatal = None;

        loop {
            select! {
                _ = self.stop.cancelled() => break,

                Some(err) = fatal_rx.recv() => {
                    error!("coordinator failure, shutting down: {}", err);
                    fatal = Some(err);
                    break;
                }

                Some(id) = lost_rx.recv() => self.claim_lost(&id).await,

                maybe_task = task_rx.recv() => match maybe_task {
                    Some(task) => self.offer(task, &mut handlers).await,
                    // Watch finished; the coordinator is closing down.
                    None => break,
                },

                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Ok((id, outcome)) = joined {
                        self.finalize(&id, outcome).await;
                    }
                }
            }
        }

        self.stop_all(&mut handlers).await;
        self.coord.close().await;
        let _ = watch_join.await;

        // A fatal signal may have raced the break we took.
        if fatal.is_none() {
            if let Ok(err) = fatal_rx.try_recv() {
                fatal = Some(err);
            }
        }
        match fatal {
            Some(source) => Err(RuntimeError::CoordinatorFailed { source }),
            None => Ok(()),
        }
    }

    /// Steps 2–5 of the dispatch path: dedup, balance, claim, spawn.
    async fn offer(&self, task: Task, handlers: &mut JoinSet<HandlerOutcome>) {
        let id = task.id().to_string();

        let snapshot: Vec<String> = {
            let running = self.running.read().await;
            if running.contains_key(&id) {
                return;
            }
            running.keys().cloned().collect()
        };

        if !self.balancer.can_claim(&id, &snapshot) {
            debug!("balancer declined task '{}'", id);
            return;
        }
        if !self.coord.claim(&task).await {
            return;
        }

        let stop = CancellationToken::new();
        self.running.write().await.insert(
            id.clone(),
            RunningHandler {
                task: task.clone(),
                stop: stop.clone(),
                lost: false,
            },
        );

        let fut = self.handler.run(task, stop);
        handlers.spawn(async move {
            match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                Ok(outcome) => (id, outcome),
                Err(_) => (
                    id,
                    Err(HandlerError::Fail {
                        reason: "handler panicked".to_string(),
                    }),
                ),
            }
        });
    }

    /// The claim is gone (expiry or external delete): stop the handler but
    /// do not release, there is no marker left to remove.
    async fn claim_lost(&self, id: &str) {
        let mut running = self.running.write().await;
        if let Some(h) = running.get_mut(id) {
            debug!("claim on task '{}' lost, stopping handler", id);
            h.lost = true;
            h.stop.cancel();
        }
    }

    /// Applies a handler's outcome to the claim.
    async fn finalize(&self, id: &str, outcome: Result<bool, HandlerError>) {
        let Some(h) = self.running.write().await.remove(id) else {
            return;
        };

        match outcome {
            Ok(true) => {
                if !h.lost {
                    self.coord.done(&h.task).await;
                }
            }
            Ok(false) => {
                if !h.lost {
                    self.coord.release(&h.task).await;
                }
            }
            Err(e) => {
                warn!("handler for task '{}' failed: {}", id, e);
                if !h.lost {
                    self.coord.release(&h.task).await;
                }
            }
        }
    }

    /// Stops every running handler and treats each return as a release, so
    /// another node can pick the work up.
    async fn stop_all(&self, handlers: &mut JoinSet<HandlerOutcome>) {
        {
            let running = self.running.read().await;
            for h in running.values() {
                h.stop.cancel();
            }
        }

        while let Some(joined) = handlers.join_next().await {
            let Ok((id, _outcome)) = joined else {
                continue;
            };
            let removed = self.running.write().await.remove(&id);
            if let Some(h) = removed {
                if !h.lost {
                    self.coord.release(&h.task).await;
                }
            }
        }
    }
}
