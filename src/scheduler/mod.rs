//! Concurrent batch processing and bounded retry
//!
//! The scheduler partitions discovered items into fixed-size batches, runs
//! each batch through a bounded worker pool and pauses between batches. The
//! retry controller is a single policy object wrapping every volatile
//! operation: navigation, download and upload alike.

pub mod batch;
pub mod retry;

pub use batch::{BatchScheduler, ItemOutcome, ItemProcessor};
pub use retry::{with_retry, RetryPolicy};
