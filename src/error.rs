//! # Error types used across the coordination runtime.
//!
//! One enum per layer, matching the error taxonomy of the system:
//!
//! - [`CoordinatorError`] failures of the per-node coordinator itself
//!   (init, watch, liveness).
//! - [`RuntimeError`] errors surfaced by [`Consumer::run`](crate::Consumer::run).
//! - [`SubmitError`] errors surfaced to submitting clients.
//! - [`HandlerError`] failures of individual handler executions.
//!
//! Claim contention is deliberately *not* an error: `claim` returns `false`.

use std::time::Duration;

use thiserror::Error;

use crate::kv::KvError;

/// Errors produced by a coordinator facade.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Another live node already registered this name.
    #[error("node name '{name}' is already registered in the namespace")]
    NameCollision {
        /// The contested node name.
        name: String,
    },

    /// `init` was called more than once on the same coordinator.
    #[error("coordinator is already initialized")]
    AlreadyInitialized,

    /// An operation that requires `init` ran before it.
    #[error("coordinator is not initialized")]
    NotInitialized,

    /// `watch` was called while a previous watch is still running.
    #[error("a watch is already in progress")]
    WatchInProgress,

    /// The node's liveness entry could not be refreshed; the node must shut
    /// down.
    #[error("node '{name}' lost its liveness entry: {source}")]
    LivenessLost {
        /// The node whose entry disappeared.
        name: String,
        /// The refresh failure.
        #[source]
        source: KvError,
    },

    /// An unrecoverable store failure.
    #[error(transparent)]
    Store(#[from] KvError),
}

/// Errors returned by the consumer loop.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// `run` was called while the consumer is already running.
    #[error("consumer is already running")]
    AlreadyRunning,

    /// The coordinator could not be initialized.
    #[error("coordinator init failed: {source}")]
    InitFailed {
        #[source]
        source: CoordinatorError,
    },

    /// The coordinator failed while the consumer was running; the consumer
    /// has already shut down and released its handlers.
    #[error("coordinator failed: {source}")]
    CoordinatorFailed {
        #[source]
        source: CoordinatorError,
    },
}

/// Errors surfaced to task-submitting clients.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SubmitError {
    /// A task with this id already exists in the namespace.
    #[error("task '{id}' already exists")]
    TaskExists {
        /// The duplicate task id.
        id: String,
    },

    /// The task to delete does not exist.
    #[error("task '{id}' not found")]
    TaskNotFound {
        /// The missing task id.
        id: String,
    },

    /// The paired coordinator is gone (embedded variant only).
    #[error("submission channel closed")]
    Closed,

    /// The store rejected the operation.
    #[error(transparent)]
    Store(#[from] KvError),
}

/// Errors produced by handler executions.
///
/// A failed handler is logged and its claim released; it never affects other
/// tasks or the consumer loop itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The handler gave up on this run.
    #[error("handler failed: {reason}")]
    Fail {
        /// Short human-readable cause.
        reason: String,
    },

    /// The handler exceeded its own deadline.
    #[error("handler timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },
}
