//! # taskgrid
//!
//! **Taskgrid** coordinates a pool of worker processes ("nodes") that
//! cooperatively execute opaque units of work ("tasks") on top of a strongly
//! consistent, watchable, TTL-aware key-value store.
//!
//! Any node may submit a task; exactly one live node claims and runs it at a
//! time; when the owner dies, releases, or loses its claim, another live node
//! reclaims the work.
//!
//! ## Features
//!
//! | Area             | Description                                                        | Key types / traits                      |
//! |------------------|--------------------------------------------------------------------|-----------------------------------------|
//! | **Coordination** | Liveness, discovery, and mutually exclusive claims per task.       | [`Coordinator`], [`KvCoordinator`]      |
//! | **Consuming**    | Select-loop dispatch of claimed tasks into parallel handlers.      | [`Consumer`]                            |
//! | **Handlers**     | User code with a run-until-stopped contract.                       | [`Handler`], [`HandlerFn`]              |
//! | **Balancing**    | Pluggable claim admission.                                         | [`Balancer`], [`ClaimAll`], [`MaxTasks`]|
//! | **Submission**   | Producer-side create/delete of tasks.                              | [`Client`], [`KvClient`]                |
//! | **Stores**       | Narrow KV gateway with etcd-like and in-memory backends.           | [`KvStore`], [`EtcdStore`], [`MemoryStore`] |
//! | **Embedded**     | Channel-backed coordinator/client pair, no store required.         | [`embedded_pair`]                       |
//! | **Errors**       | Typed errors per layer.                                            | [`CoordinatorError`], [`RuntimeError`]  |
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use taskgrid::{
//!     ClaimAll, Client, Config, Consumer, EtcdStore, HandlerError, HandlerFn, KvClient,
//!     KvCoordinator, Task,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(EtcdStore::new(vec!["http://127.0.0.1:2379".into()]));
//!     let coord = KvCoordinator::new(Config::new("/myapp", "worker-1"), Arc::clone(&store));
//!
//!     let handler = HandlerFn::arc("work", |task: Task, stop: CancellationToken| async move {
//!         if stop.is_cancelled() {
//!             return Ok(false); // released for another node
//!         }
//!         println!("working on {task}");
//!         Ok::<bool, HandlerError>(true) // consumed
//!     });
//!
//!     let client = KvClient::new("/myapp", store);
//!     client.submit_task(Task::new("job-1")).await?;
//!
//!     Consumer::new(coord, handler, Arc::new(ClaimAll)).run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod client;
mod config;
mod consumer;
mod coordinator;
mod embedded;
mod error;
mod kv;
mod policies;
mod tasks;

// ---- Public re-exports ----

pub use client::{Client, KvClient};
pub use config::{Config, DEFAULT_NODE_TTL, MIN_NODE_TTL, MIN_REFRESH_PERIOD};
pub use consumer::Consumer;
pub use coordinator::{Coordinator, CoordinatorContext, KvCoordinator};
pub use embedded::{embedded_pair, EmbeddedClient, EmbeddedCoordinator};
pub use error::{CoordinatorError, HandlerError, RuntimeError, SubmitError};
pub use kv::{
    EtcdStore, KvError, KvEvent, KvEventKind, KvNode, KvResponse, KvStore, MemoryStore,
    NODES_PATH, OWNER_MARKER, PROPS_KEY, TASKS_PATH,
};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use tasks::{Balancer, BoxHandlerFuture, ClaimAll, Handler, HandlerFn, HandlerRef, MaxTasks, Task};
