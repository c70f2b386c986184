//! # Task submission.
//!
//! [`Client`] is the producer-side contract: create a task in the
//! namespace, or delete one outright. Any node (or none) may submit;
//! coordinators discover submissions through their watch.
//!
//! Deleting a task that is currently claimed is legal: the owner observes
//! the deletion as a claim-lost event and stops its handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SubmitError;
use crate::kv::paths::Paths;
use crate::kv::{KvError, KvStore};
use crate::tasks::Task;

/// Producer-side handle into a coordinator namespace.
#[async_trait]
pub trait Client: Send + Sync {
    /// Creates `task` in the namespace.
    ///
    /// Submitting an id that already exists is a visible error
    /// ([`SubmitError::TaskExists`]), never silent coalescing.
    async fn submit_task(&self, task: Task) -> Result<(), SubmitError>;

    /// Removes a task from the namespace, claimed or not.
    async fn delete_task(&self, id: &str) -> Result<(), SubmitError>;
}

/// Store-backed submission client.
pub struct KvClient<S: KvStore> {
    store: Arc<S>,
    paths: Paths,
}

impl<S: KvStore> KvClient<S> {
    /// Creates a client for `namespace` backed by `store`.
    pub fn new(namespace: impl AsRef<str>, store: Arc<S>) -> Self {
        Self {
            store,
            paths: Paths::new(namespace.as_ref()),
        }
    }
}

#[async_trait]
impl<S: KvStore> Client for KvClient<S> {
    async fn submit_task(&self, task: Task) -> Result<(), SubmitError> {
        let id = task.id();

        // A submission is one create: the props leaf for payload tasks
        // (implicitly creating the directory), the directory itself for
        // bare tasks. Watchers key on that create, so the payload is in
        // the store before the task becomes discoverable.
        let (path, value) = match task.payload() {
            Some(payload) => (self.paths.props(id), Some(payload)),
            None => (self.paths.task(id), None),
        };

        if value.is_some()
            && self
                .store
                .get(&self.paths.task(id), false)
                .await?
                .node
                .is_some()
        {
            return Err(SubmitError::TaskExists { id: id.to_string() });
        }

        match self.store.create_if_absent(&path, value, None).await {
            Ok(()) => {
                debug!("submitted task '{}'", id);
                Ok(())
            }
            Err(KvError::AlreadyExists { .. }) => {
                Err(SubmitError::TaskExists { id: id.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_task(&self, id: &str) -> Result<(), SubmitError> {
        match self.store.delete(&self.paths.task(id), true).await {
            Ok(()) => {
                debug!("deleted task '{}'", id);
                Ok(())
            }
            Err(KvError::NotFound { .. }) => Err(SubmitError::TaskNotFound { id: id.to_string() }),
            Err(e) => Err(e.into()),
        }
    }
}
