//! # In-process store implementation.
//!
//! [`MemoryStore`] implements the full [`KvStore`] contract (CAS creates,
//! TTL expiry, recursive gets, resumable watches) against a mutex-guarded
//! tree. A single lock serializes every mutation, so linearizability holds
//! trivially.
//!
//! Used as the test double for the KV-backed coordinator and as the backing
//! store for single-process deployments that still want the full claim
//! semantics.
//!
//! ## Expiry
//! A background sweeper turns lapsed TTLs into `Expire` events every few
//! tens of milliseconds; reads additionally sweep inline so an expired key
//! is never observable. The event log is kept unbounded, so watchers resume
//! from any index without ever seeing [`KvError::IndexCleared`].
//!
//! ## Rules
//! - Creating a key implicitly creates missing parent directories, without
//!   events (only the created key gets one).
//! - `refresh_ttl` emits no event.
//! - Recursive deletes and expiries emit a single event for the root path.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::kv::store::{KvError, KvEvent, KvEventKind, KvNode, KvResponse, KvStore};

/// How often the background sweeper scans for lapsed TTLs.
const SWEEP_PERIOD: Duration = Duration::from_millis(25);

#[derive(Clone, Debug)]
struct Entry {
    value: Option<String>,
    dir: bool,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Remaining TTL in whole seconds, rounded up (never reports 0 for a
    /// live key).
    fn remaining_ttl(&self, now: Instant) -> Option<u64> {
        self.expires_at
            .map(|at| at.saturating_duration_since(now).as_secs_f64().ceil() as u64)
    }
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, Entry>,
    index: u64,
    events: Vec<KvEvent>,
}

impl Inner {
    fn push_event(&mut self, kind: KvEventKind, path: &str, dir: bool) {
        self.index += 1;
        self.events.push(KvEvent {
            kind,
            path: path.to_string(),
            dir,
            index: self.index,
        });
    }

    /// Removes `path` and everything below it from the tree.
    fn remove_subtree(&mut self, path: &str) {
        self.nodes.remove(path);
        let prefix = format!("{path}/");
        let children: Vec<String> = self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for child in children {
            self.nodes.remove(&child);
        }
    }

    /// Converts lapsed TTLs into `Expire` events. Returns how many fired.
    fn sweep(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        loop {
            let expired = self
                .nodes
                .iter()
                .find(|(_, e)| e.expired(now))
                .map(|(k, e)| (k.clone(), e.dir));
            let Some((path, dir)) = expired else {
                return fired;
            };
            self.remove_subtree(&path);
            self.push_event(KvEventKind::Expire, &path, dir);
            fired += 1;
        }
    }

    fn build_node(&self, path: &str, recursive: bool, now: Instant) -> KvNode {
        let entry = &self.nodes[path];
        let mut node = KvNode {
            key: path.to_string(),
            value: entry.value.clone(),
            dir: entry.dir,
            ttl: entry.remaining_ttl(now),
            nodes: Vec::new(),
        };

        if entry.dir {
            let prefix = format!("{path}/");
            let children: Vec<String> = self
                .nodes
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .filter(|(k, _)| !k[prefix.len()..].contains('/'))
                .map(|(k, _)| k.clone())
                .collect();
            for child in children {
                if recursive {
                    node.nodes.push(self.build_node(&child, true, now));
                } else {
                    let e = &self.nodes[&child];
                    node.nodes.push(KvNode {
                        key: child,
                        value: e.value.clone(),
                        dir: e.dir,
                        ttl: e.remaining_ttl(now),
                        nodes: Vec::new(),
                    });
                }
            }
        }
        node
    }
}

/// Linearizable in-process [`KvStore`].
///
/// Cheap to clone; clones share the same tree. Must be created inside a
/// Tokio runtime (the constructor spawns the TTL sweeper).
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<tokio::sync::Notify>,
}

impl MemoryStore {
    /// Creates an empty store and starts its TTL sweeper.
    ///
    /// The sweeper exits on its own once every clone of the store has been
    /// dropped.
    pub fn new() -> Self {
        let store = Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            notify: Arc::new(tokio::sync::Notify::new()),
        };
        spawn_sweeper(Arc::downgrade(&store.inner), Arc::clone(&store.notify));
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Sweeps lapsed TTLs and wakes watchers if anything fired.
    fn sweep_now(&self) {
        let fired = self.lock().sweep(Instant::now());
        if fired > 0 {
            self.notify.notify_waiters();
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_sweeper(inner: Weak<Mutex<Inner>>, notify: Arc<tokio::sync::Notify>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_PERIOD).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let fired = inner.lock().unwrap().sweep(Instant::now());
            if fired > 0 {
                notify.notify_waiters();
            }
        }
    });
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, path: &str, recursive: bool) -> Result<KvResponse, KvError> {
        self.sweep_now();
        let inner = self.lock();
        let now = Instant::now();

        let node = inner
            .nodes
            .contains_key(path)
            .then(|| inner.build_node(path, recursive, now));
        Ok(KvResponse {
            node,
            index: inner.index,
        })
    }

    async fn create_if_absent(
        &self,
        path: &str,
        value: Option<&str>,
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        self.sweep_now();
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.nodes.contains_key(path) {
            return Err(KvError::AlreadyExists {
                path: path.to_string(),
            });
        }

        // Implicit parent directories, like an etcd PUT on a deep key.
        let mut ancestor = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            ancestor.push('/');
            ancestor.push_str(segment);
            if ancestor == path {
                break;
            }
            match inner.nodes.get(&ancestor).map(|e| e.dir) {
                Some(false) => {
                    return Err(KvError::Backend {
                        reason: format!("not a directory: {ancestor}"),
                    })
                }
                Some(true) => {}
                None => {
                    inner.nodes.insert(
                        ancestor.clone(),
                        Entry {
                            value: None,
                            dir: true,
                            expires_at: None,
                        },
                    );
                }
            }
        }

        let dir = value.is_none();
        inner.nodes.insert(
            path.to_string(),
            Entry {
                value: value.map(str::to_string),
                dir,
                expires_at: ttl.map(|t| now + t),
            },
        );
        inner.push_event(KvEventKind::Create, path, dir);
        drop(inner);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn refresh_ttl(&self, path: &str, ttl: Duration, dir: bool) -> Result<(), KvError> {
        self.sweep_now();
        let mut inner = self.lock();
        let now = Instant::now();

        let entry = inner.nodes.get_mut(path).ok_or_else(|| KvError::NotFound {
            path: path.to_string(),
        })?;
        if entry.dir != dir {
            return Err(KvError::Backend {
                reason: format!("node kind mismatch: {path}"),
            });
        }
        entry.expires_at = Some(now + ttl);
        // Refreshes are invisible to watchers.
        Ok(())
    }

    async fn delete(&self, path: &str, recursive: bool) -> Result<(), KvError> {
        self.sweep_now();
        let mut inner = self.lock();

        let entry = inner.nodes.get(path).ok_or_else(|| KvError::NotFound {
            path: path.to_string(),
        })?;
        let dir = entry.dir;

        if dir && !recursive {
            let prefix = format!("{path}/");
            let has_children = inner
                .nodes
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .next()
                .is_some();
            if has_children {
                return Err(KvError::Backend {
                    reason: format!("directory not empty: {path}"),
                });
            }
        }

        inner.remove_subtree(path);
        inner.push_event(KvEventKind::Delete, path, dir);
        drop(inner);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn watch(&self, prefix: &str, after_index: u64) -> Result<KvEvent, KvError> {
        let under = |path: &str| path == prefix || path.starts_with(&format!("{prefix}/"));

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before scanning so an event landing between the scan
            // and the await still wakes us.
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                inner.sweep(Instant::now());
                if let Some(ev) = inner
                    .events
                    .iter()
                    .find(|e| e.index > after_index && under(&e.path))
                {
                    return Ok(ev.clone());
                }
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn create_is_exclusive() {
        let store = MemoryStore::new();
        store
            .create_if_absent("/ns/tasks/t1", None, None)
            .await
            .unwrap();

        let err = store
            .create_if_absent("/ns/tasks/t1", None, None)
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn implicit_parents_are_directories() {
        let store = MemoryStore::new();
        store
            .create_if_absent("/ns/tasks/t1/owner", Some("x"), None)
            .await
            .unwrap();

        let resp = store.get("/ns/tasks", true).await.unwrap();
        let tasks = resp.node.expect("tasks dir should exist");
        assert!(tasks.dir);
        let t1 = tasks.child("t1").expect("task dir should exist");
        assert!(t1.dir);
        assert!(t1.child("owner").is_some());
    }

    #[tokio::test]
    async fn watch_resumes_from_index() {
        let store = MemoryStore::new();
        store
            .create_if_absent("/ns/tasks/a", None, None)
            .await
            .unwrap();
        let first = store.watch("/ns/tasks", 0).await.unwrap();
        assert_eq!(first.kind, KvEventKind::Create);

        store
            .create_if_absent("/ns/tasks/b", None, None)
            .await
            .unwrap();
        let second = store.watch("/ns/tasks", first.index).await.unwrap();
        assert!(second.path.ends_with("/b"));
        assert!(second.index > first.index);
    }

    #[tokio::test]
    async fn watch_ignores_other_subtrees() {
        let store = MemoryStore::new();
        store
            .create_if_absent("/ns/nodes/n1", None, None)
            .await
            .unwrap();
        store
            .create_if_absent("/ns/tasks/t1", None, None)
            .await
            .unwrap();

        let ev = store.watch("/ns/tasks", 0).await.unwrap();
        assert_eq!(ev.path, "/ns/tasks/t1");
    }

    #[tokio::test]
    async fn ttl_lapse_emits_expire() {
        let store = MemoryStore::new();
        store
            .create_if_absent("/ns/tasks/t1/owner", Some("x"), Some(Duration::from_millis(80)))
            .await
            .unwrap();
        let created = store.watch("/ns/tasks", 0).await.unwrap();

        let ev = timeout(Duration::from_secs(2), store.watch("/ns/tasks", created.index))
            .await
            .expect("expiry should be observed")
            .unwrap();
        assert_eq!(ev.kind, KvEventKind::Expire);
        assert_eq!(ev.path, "/ns/tasks/t1/owner");

        let resp = store.get("/ns/tasks/t1/owner", false).await.unwrap();
        assert!(resp.node.is_none());
    }

    #[tokio::test]
    async fn refresh_extends_without_events() {
        let store = MemoryStore::new();
        store
            .create_if_absent("/ns/nodes/n1", None, Some(Duration::from_millis(500)))
            .await
            .unwrap();
        let created = store.watch("/ns/nodes", 0).await.unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            store
                .refresh_ttl("/ns/nodes/n1", Duration::from_millis(500), true)
                .await
                .unwrap();
        }

        // Still alive well past the original TTL, and no event was emitted.
        let resp = store.get("/ns/nodes/n1", false).await.unwrap();
        assert!(resp.node.is_some());
        let next = timeout(
            Duration::from_millis(100),
            store.watch("/ns/nodes", created.index),
        )
        .await;
        assert!(next.is_err(), "refresh must not wake watchers");
    }

    #[tokio::test]
    async fn recursive_delete_emits_single_event() {
        let store = MemoryStore::new();
        store
            .create_if_absent("/ns/tasks/t1/owner", Some("x"), None)
            .await
            .unwrap();
        let last = store.watch("/ns/tasks", 0).await.unwrap();

        store.delete("/ns/tasks/t1", true).await.unwrap();
        let ev = store.watch("/ns/tasks", last.index).await.unwrap();
        assert_eq!(ev.kind, KvEventKind::Delete);
        assert_eq!(ev.path, "/ns/tasks/t1");
        assert!(ev.dir);

        let resp = store.get("/ns/tasks/t1", true).await.unwrap();
        assert!(resp.node.is_none());
    }
}
