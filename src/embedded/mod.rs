//! # Embedded coordinator/client pair.
//!
//! The in-process rendition of the coordination contract: no store, just a
//! pair of unbounded channels (submissions, deletions) and a claim set
//! behind mutexes, shared by an [`EmbeddedCoordinator`] and its
//! [`EmbeddedClient`]. Because both sides mutate the same structure under
//! the same locks, linearizability holds trivially.
//!
//! Claims are first-come on the in-memory set; `release` re-enqueues the
//! task, which is how expiry-free redelivery is modeled. Use it for tests
//! and single-process deployments that do not need cross-process TTLs.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use taskgrid::{embedded_pair, ClaimAll, Client, Consumer, HandlerError, HandlerFn, Task};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let (coord, client) = embedded_pair("worker-1");
//! let handler = HandlerFn::arc("print", |task: Task, _stop: CancellationToken| async move {
//!     println!("running {task}");
//!     Ok::<_, HandlerError>(true)
//! });
//! let consumer = Arc::new(Consumer::new(coord, handler, Arc::new(ClaimAll)));
//!
//! client.submit_task(Task::new("hello")).await?;
//! consumer.run().await?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, OnceLock},
};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::coordinator::{Coordinator, CoordinatorContext};
use crate::error::{CoordinatorError, SubmitError};
use crate::tasks::Task;

/// State shared by the embedded pair.
struct Shared {
    /// Every live task in the "namespace", claimed or not.
    tasks: Mutex<HashMap<String, Task>>,
    /// Ids currently owned by the coordinator side.
    claims: Mutex<HashSet<String>>,
    submit_tx: mpsc::UnboundedSender<Task>,
    delete_tx: mpsc::UnboundedSender<String>,
}

struct Channels {
    task_rx: mpsc::UnboundedReceiver<Task>,
    delete_rx: mpsc::UnboundedReceiver<String>,
}

/// Creates a connected coordinator/client pair sharing one in-memory
/// namespace.
pub fn embedded_pair(name: impl Into<String>) -> (Arc<EmbeddedCoordinator>, EmbeddedClient) {
    let (submit_tx, task_rx) = mpsc::unbounded_channel();
    let (delete_tx, delete_rx) = mpsc::unbounded_channel();

    let shared = Arc::new(Shared {
        tasks: Mutex::new(HashMap::new()),
        claims: Mutex::new(HashSet::new()),
        submit_tx,
        delete_tx,
    });

    let coordinator = Arc::new(EmbeddedCoordinator {
        name: name.into(),
        shared: Arc::clone(&shared),
        channels: RwLock::new(Some(Channels { task_rx, delete_rx })),
        ctx: OnceLock::new(),
        close_token: CancellationToken::new(),
    });
    let client = EmbeddedClient { shared };

    (coordinator, client)
}

/// Channel-backed [`Coordinator`].
pub struct EmbeddedCoordinator {
    name: String,
    shared: Arc<Shared>,
    channels: RwLock<Option<Channels>>,
    ctx: OnceLock<CoordinatorContext>,
    close_token: CancellationToken,
}

#[async_trait]
impl Coordinator for EmbeddedCoordinator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, ctx: CoordinatorContext) -> Result<(), CoordinatorError> {
        if self.ctx.set(ctx).is_err() {
            return Err(CoordinatorError::AlreadyInitialized);
        }
        Ok(())
    }

    async fn watch(&self, out: mpsc::Sender<Task>) -> Result<(), CoordinatorError> {
        if self.close_token.is_cancelled() {
            return Ok(());
        }
        let Some(mut ch) = self.channels.write().await.take() else {
            return Err(CoordinatorError::WatchInProgress);
        };

        loop {
            tokio::select! {
                _ = self.close_token.cancelled() => return Ok(()),

                Some(task) = ch.task_rx.recv() => {
                    // Skip tasks deleted while they sat in the queue.
                    let live = self.shared.tasks.lock().unwrap().contains_key(task.id());
                    if !live {
                        continue;
                    }
                    tokio::select! {
                        _ = self.close_token.cancelled() => return Ok(()),
                        sent = out.send(task) => {
                            if sent.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }

                Some(id) = ch.delete_rx.recv() => {
                    self.shared.claims.lock().unwrap().remove(&id);
                    if let Some(ctx) = self.ctx.get() {
                        ctx.lost(&id);
                    }
                }
            }
        }
    }

    async fn claim(&self, task: &Task) -> bool {
        if self.close_token.is_cancelled() {
            return false;
        }
        let id = task.id();
        if !self.shared.tasks.lock().unwrap().contains_key(id) {
            return false;
        }

        let won = self.shared.claims.lock().unwrap().insert(id.to_string());
        if won {
            debug!("node '{}' claimed task '{}'", self.name, id);
        }
        won
    }

    async fn release(&self, task: &Task) {
        if self.close_token.is_cancelled() {
            return;
        }
        let id = task.id();
        self.shared.claims.lock().unwrap().remove(id);

        // Re-enqueue so any watcher (ours) can offer it again.
        let live = self.shared.tasks.lock().unwrap().get(id).cloned();
        if let Some(task) = live {
            let _ = self.shared.submit_tx.send(task);
        }
        debug!("released task '{}'", id);
    }

    async fn done(&self, task: &Task) {
        if self.close_token.is_cancelled() {
            return;
        }
        let id = task.id();
        self.shared.claims.lock().unwrap().remove(id);
        self.shared.tasks.lock().unwrap().remove(id);
        debug!("task '{}' done", id);
    }

    async fn close(&self) {
        self.close_token.cancel();
    }
}

/// Producer half of the embedded pair.
pub struct EmbeddedClient {
    shared: Arc<Shared>,
}

#[async_trait]
impl crate::client::Client for EmbeddedClient {
    async fn submit_task(&self, task: Task) -> Result<(), SubmitError> {
        let id = task.id().to_string();
        {
            let mut tasks = self.shared.tasks.lock().unwrap();
            if tasks.contains_key(&id) {
                return Err(SubmitError::TaskExists { id });
            }
            tasks.insert(id, task.clone());
        }

        self.shared
            .submit_tx
            .send(task)
            .map_err(|_| SubmitError::Closed)
    }

    async fn delete_task(&self, id: &str) -> Result<(), SubmitError> {
        let existed = self.shared.tasks.lock().unwrap().remove(id).is_some();
        if !existed {
            return Err(SubmitError::TaskNotFound { id: id.to_string() });
        }

        self.shared
            .delete_tx
            .send(id.to_string())
            .map_err(|_| SubmitError::Closed)
    }
}
