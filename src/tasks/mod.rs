//! Task domain types and the external plug points.
//!
//! - [`Task`] a unit of work: string id plus opaque payload
//! - [`Handler`] / [`HandlerFn`] user code that executes a claimed task
//! - [`Balancer`] / [`ClaimAll`] pluggable claim-admission policy

mod balancer;
mod handler;
mod task;

pub use balancer::{Balancer, ClaimAll, MaxTasks};
pub use handler::{BoxHandlerFuture, Handler, HandlerFn, HandlerRef};
pub use task::Task;
