//! Concurrency primitives for churn
//!
//! Worker threads share no mutable state except the error latch:
//! - ErrorLatch: Atomic countdown used for cooperative cancellation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod latch;

pub use latch::ErrorLatch;
