//! KV gateway: the narrow surface every other component uses to talk to the
//! backing store.
//!
//! ## Files & responsibilities
//! - **store.rs**: the [`KvStore`] trait plus the node/event/error types it
//!   traffics in. Four verbs: get, create-if-absent, refresh-ttl, delete,
//!   and a resumable blocking watch.
//! - **etcd.rs**: [`EtcdStore`], an HTTP client for an etcd-like v2 keys
//!   API.
//! - **memory.rs**: [`MemoryStore`], a linearizable in-process
//!   implementation with real TTL expiry; the test double and the backing
//!   for single-process deployments.
//! - **paths.rs**: namespace layout (`tasks/`, `nodes/`, owner markers) and
//!   key classification.
//!
//! Store-specific types never leak past this module: components only see
//! [`KvStore`], [`KvNode`], [`KvEvent`] and [`KvError`].

mod etcd;
mod memory;
pub(crate) mod paths;
mod store;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;
pub use paths::{NODES_PATH, OWNER_MARKER, PROPS_KEY, TASKS_PATH};
pub use store::{KvError, KvEvent, KvEventKind, KvNode, KvResponse, KvStore};
