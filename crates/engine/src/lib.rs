//! Workload engine for churn
//!
//! This crate drives concurrent state-machine workloads:
//! - FsmRunner: Per-thread iteration loop and execution mode selection
//! - Transaction wrapper: Retryable transactions with copy-then-adopt models
//!   and non-transactional fallback
//! - ConnectionCache: Session-bound connections to every cluster node
//! - Workload: State functions, transitions, model, setup/teardown hooks
//! - Harness: One OS thread per worker, cooperative stop via ErrorLatch
//! - WorkloadConfig: Run configuration from `churn.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod harness;
pub mod retry;
pub mod runner;
pub mod state;
pub mod transaction;
pub mod workload;

pub use cache::{
    CacheAccess, ConnectionCache, ConnectionCacheBuilder, DiscoveryConfig, ReplicaSetConnections,
    ShardConnections, TransactionCacheGuard,
};
pub use config::{WorkloadConfig, CONFIG_FILE_NAME};
pub use harness::{run_workload, ThreadReport, WorkloadReport};
pub use retry::{retry_on_shard_transition, FallbackPolicy, RetryConfig};
pub use runner::{FsmRunner, RunArgs, RunOptions, RunOutcome, RunStats};
pub use state::{StateContext, StateFn, StateTable};
pub use transaction::{run_in_transaction, TransactionOutcome};
pub use workload::{HookFn, Workload, WorkloadBuilder};
