//! Churn - concurrent finite-state-machine workloads for database testing
//!
//! A workload is a set of named state functions plus a weighted transition
//! table. Churn runs it on many threads at once: each thread walks its own
//! random path through the states, issuing commands against the cluster
//! under test, optionally wrapping every state in a retryable transaction.
//!
//! # Quick Start
//!
//! ```ignore
//! use churn::{run_workload, Transitions, Workload, WorkloadConfig};
//!
//! let workload = Workload::builder("counter", 0u64)
//!     .state("init", |n, _ctx| { *n = 0; Ok(()) })
//!     .state("bump", |n, ctx| { ctx.db().run_command(&json!({"ping": 1}))?; *n += 1; Ok(()) })
//!     .start_state("init")
//!     .transitions("init", Transitions::new().to("bump", 1.0))
//!     .transitions("bump", Transitions::new().to("bump", 3.0).to("init", 1.0))
//!     .build()?;
//!
//! let report = run_workload(&workload, &WorkloadConfig::default(), &cluster, &factory)?;
//! report.into_result()?;
//! ```

pub use churn_concurrency::ErrorLatch;
pub use churn_core::*;
pub use churn_engine::*;
