//! Network utilities shared by the hub client and the graph store.

mod retry;

pub use retry::{retry_async, retry_blocking, Backoff, RetryConfig, RetryStats};
