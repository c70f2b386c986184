//! # The store abstraction.
//!
//! [`KvStore`] narrows a strongly consistent, watchable, TTL-aware
//! key-value store to the four verbs the coordinator needs. Keys are
//! hierarchical slash-separated paths; directories and leaves are distinct.
//!
//! ## Contract
//! - `create_if_absent` is linearizable and fails with
//!   [`KvError::AlreadyExists`] when the key (or directory) exists; this is
//!   the CAS that makes claims mutually exclusive.
//! - `refresh_ttl` extends a key's expiration while preserving its value and
//!   children, and emits **no** watch event.
//! - `watch` blocks until an event with index greater than `after_index`
//!   occurs under `prefix`; [`KvError::IndexCleared`] means the requested
//!   index was compacted away and the caller must re-enumerate.
//!
//! All other components interact with the store only through this surface,
//! so the backend can be swapped (etcd over HTTP, in-memory, ...).

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced by a [`KvStore`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum KvError {
    /// CAS failure: the key already exists.
    #[error("key already exists: {path}")]
    AlreadyExists {
        /// The contested path.
        path: String,
    },

    /// The key does not exist.
    #[error("key not found: {path}")]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// The watch index was compacted away; re-enumerate and resubscribe.
    #[error("watch index compacted, resync required")]
    IndexCleared,

    /// Transport or backend failure; retryable with backoff.
    #[error("store backend error: {reason}")]
    Backend {
        /// Short human-readable cause.
        reason: String,
    },
}

impl KvError {
    /// True for CAS failures (contention), which are normal outcomes rather
    /// than faults.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, KvError::AlreadyExists { .. })
    }
}

/// A node in the store's key hierarchy.
#[derive(Clone, Debug)]
pub struct KvNode {
    /// Full path of this node.
    pub key: String,
    /// Value for leaves; `None` for directories.
    pub value: Option<String>,
    /// Whether this node is a directory.
    pub dir: bool,
    /// Remaining TTL in whole seconds, if one is set.
    pub ttl: Option<u64>,
    /// Children (populated by recursive gets on directories).
    pub nodes: Vec<KvNode>,
}

impl KvNode {
    /// Finds a direct child whose last path segment equals `name`.
    pub fn child(&self, name: &str) -> Option<&KvNode> {
        self.nodes
            .iter()
            .find(|n| n.key.rsplit('/').next() == Some(name))
    }
}

/// Result of a [`KvStore::get`]: the node (if present) plus the store index
/// observed at read time, used to open a gap-free watch.
#[derive(Clone, Debug)]
pub struct KvResponse {
    /// The requested node, or `None` if absent.
    pub node: Option<KvNode>,
    /// Store index at the time of the read.
    pub index: u64,
}

/// Kind of a watch event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KvEventKind {
    /// A key or directory was created.
    Create,
    /// A key's value was replaced.
    Set,
    /// A key or directory was deleted.
    Delete,
    /// A key or directory expired via TTL.
    Expire,
}

/// A single event observed on a watch.
#[derive(Clone, Debug)]
pub struct KvEvent {
    /// What happened.
    pub kind: KvEventKind,
    /// The affected path.
    pub path: String,
    /// Whether the affected node was a directory.
    pub dir: bool,
    /// The store index of this event; watches resume from here.
    pub index: u64,
}

/// Narrow gateway over the backing key-value store.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Reads `path`, recursively when asked.
    ///
    /// Returns `node: None` (not an error) when the path does not exist; the
    /// index is valid either way.
    async fn get(&self, path: &str, recursive: bool) -> Result<KvResponse, KvError>;

    /// Atomically creates `path` iff it does not exist.
    ///
    /// `value: None` creates a directory; `ttl: None` creates a permanent
    /// key. Fails with [`KvError::AlreadyExists`] on contention.
    async fn create_if_absent(
        &self,
        path: &str,
        value: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<(), KvError>;

    /// Extends the TTL on an existing key, preserving value and children.
    ///
    /// `dir` must match the node's kind. Emits no watch event. Fails with
    /// [`KvError::NotFound`] when the key is gone, the caller's cue that it
    /// lost liveness or ownership.
    async fn refresh_ttl(&self, path: &str, ttl: Duration, dir: bool) -> Result<(), KvError>;

    /// Deletes `path`; `recursive` is required for non-empty directories.
    async fn delete(&self, path: &str, recursive: bool) -> Result<(), KvError>;

    /// Blocks until an event with index greater than `after_index` occurs at
    /// or below `prefix`, and returns it.
    ///
    /// Callers resume by passing the returned event's index back in. The
    /// future must be cancel-safe: dropping it abandons the wait.
    async fn watch(&self, prefix: &str, after_index: u64) -> Result<KvEvent, KvError>;
}
