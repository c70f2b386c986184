//! # Handler abstraction for claimed tasks.
//!
//! Defines the [`Handler`] trait (the contract between the consumer loop
//! and user code) and [`HandlerFn`], a function-backed implementation that
//! wraps closures as handlers.
//!
//! A handler receives the claimed [`Task`] and a [`CancellationToken`]; the
//! token fires when the claim is lost, the task is deleted, or the consumer
//! shuts down. Implementations must observe it and return promptly.
//!
//! ## Return contract
//! - `Ok(true)`: the task is consumed; the coordinator deletes it.
//! - `Ok(false)`: the task is released for any node (including this one)
//!   to reclaim.
//! - `Err(_)`: logged and treated as *not consumed* (release); never
//!   affects other tasks.

use std::{borrow::Cow, future::Future, pin::Pin, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::tasks::Task;

/// Boxed future returned by [`Handler::run`].
pub type BoxHandlerFuture =
    Pin<Box<dyn Future<Output = Result<bool, HandlerError>> + Send + 'static>>;

/// Shared handle to a handler object.
pub type HandlerRef = Arc<dyn Handler>;

/// User code that executes claimed tasks.
///
/// `run` takes `&self`: the consumer invokes one handler object for every
/// claimed task, concurrently. Per-task state belongs inside the returned
/// future; shared state needs its own synchronization.
///
/// ## Example
/// ```rust
/// use tokio_util::sync::CancellationToken;
/// use taskgrid::{BoxHandlerFuture, Handler, Task};
///
/// struct Printer;
///
/// impl Handler for Printer {
///     fn run(&self, task: Task, stop: CancellationToken) -> BoxHandlerFuture {
///         Box::pin(async move {
///             if stop.is_cancelled() {
///                 return Ok(false);
///             }
///             println!("working on {task}");
///             Ok(true)
///         })
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Creates a future that works on `task` until done or `stop` fires.
    ///
    /// The future must observe `stop` and return promptly once it is
    /// cancelled; a stuck handler delays consumer shutdown.
    fn run(&self, task: Task, stop: CancellationToken) -> BoxHandlerFuture;
}

/// Function-backed handler implementation.
///
/// Wraps a closure that *creates* a new future per claimed task.
///
/// ## Example
/// ```rust
/// use tokio_util::sync::CancellationToken;
/// use taskgrid::{HandlerError, HandlerFn, HandlerRef, Task};
///
/// let h: HandlerRef = HandlerFn::arc("echo", |task: Task, _stop: CancellationToken| async move {
///     println!("got {task}");
///     Ok::<_, HandlerError>(true)
/// });
/// ```
pub struct HandlerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> HandlerFn<F> {
    /// Creates a new function-backed handler.
    ///
    /// Prefer [`HandlerFn::arc`] when you immediately need a [`HandlerRef`].
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }

    /// The handler's name (used in logs).
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Task, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, HandlerError>> + Send + 'static,
{
    fn run(&self, task: Task, stop: CancellationToken) -> BoxHandlerFuture {
        Box::pin((self.f)(task, stop))
    }
}
