//! Retry-delay policies for store reconnection.
//!
//! - [`BackoffPolicy`] how delays grow between consecutive failures
//! - [`JitterPolicy`] how delays are randomized to avoid synchronized retries

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
