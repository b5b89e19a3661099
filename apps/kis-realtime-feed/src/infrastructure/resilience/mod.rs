//! Resilience patterns for feed I/O.
//!
//! Bounded retry with a fixed delay and an optional pre-retry hook, used for
//! both the connect path and the command send path.

mod retry;

pub use retry::{RetryError, RetryPolicy};
