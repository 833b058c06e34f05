//! Multi-threaded workload harness
//!
//! Spawns one named OS thread per thread id, each running its own
//! `FsmRunner` over its own database handle and its own clone of the
//! workload's model. The only thing threads share is the `ErrorLatch`:
//! a thread that fails counts it down, and every other thread stops at its
//! next iteration boundary.

use crate::config::WorkloadConfig;
use crate::runner::{FsmRunner, RunArgs, RunStats};
use crate::workload::Workload;
use churn_concurrency::ErrorLatch;
use churn_core::{ChurnError, ChurnResult, ClusterTopology, ConnectionFactory};
use std::any::Any;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

// ============================================================================
// Reports
// ============================================================================

/// Result of one worker thread
#[derive(Debug)]
pub struct ThreadReport {
    /// Worker thread id
    pub tid: usize,
    /// Counters on success, the thread's error otherwise
    pub result: ChurnResult<RunStats>,
}

/// Results of every worker thread of a run
#[derive(Debug)]
pub struct WorkloadReport {
    /// Workload name
    pub workload: String,
    /// Per-thread results, ordered by thread id
    pub threads: Vec<ThreadReport>,
}

impl WorkloadReport {
    /// True if every thread finished without error
    pub fn is_success(&self) -> bool {
        self.threads.iter().all(|t| t.result.is_ok())
    }

    /// Failed threads and their errors
    pub fn failures(&self) -> impl Iterator<Item = (usize, &ChurnError)> {
        self.threads
            .iter()
            .filter_map(|t| t.result.as_ref().err().map(|e| (t.tid, e)))
    }

    /// Iterations completed across all successful threads
    pub fn total_iterations(&self) -> usize {
        self.threads
            .iter()
            .filter_map(|t| t.result.as_ref().ok())
            .map(|stats| stats.iterations)
            .sum()
    }

    /// Per-thread counters, or the first thread error
    pub fn into_result(self) -> ChurnResult<Vec<RunStats>> {
        self.threads.into_iter().map(|t| t.result).collect()
    }
}

// ============================================================================
// run_workload
// ============================================================================

/// Run `workload` on `config.threads` (or the workload's thread count) threads
///
/// The setup hook runs before any thread starts and the teardown hook after
/// all have joined; both get a database handle of their own. Worker failures
/// are collected in the report rather than returned.
///
/// # Errors
/// * Invalid `config`
/// * Opening the setup/teardown database handle fails
/// * The setup or teardown hook fails
pub fn run_workload<M>(
    workload: &Workload<M>,
    config: &WorkloadConfig,
    cluster: &ClusterTopology,
    factory: &dyn ConnectionFactory,
) -> ChurnResult<WorkloadReport>
where
    M: Clone + Sync,
{
    config.validate()?;
    let threads = config.threads.unwrap_or(workload.thread_count());
    let iterations = config.iterations.unwrap_or(workload.iterations());
    let runner = FsmRunner::new(config.run_options()?);

    let admin_db = factory.open_database(&config.db_name)?;
    if let Some(setup) = workload.setup() {
        setup(workload.data(), admin_db.as_ref(), &config.coll_name)?;
    }

    info!(
        target: "churn::harness",
        workload = workload.name(),
        threads,
        iterations,
        in_transaction = config.in_transaction,
        "Starting workload"
    );

    let latch = Arc::new(ErrorLatch::new(threads));
    let reports = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|tid| {
                let latch = Arc::clone(&latch);
                let runner = &runner;
                let handle = thread::Builder::new()
                    .name(format!("churn-{}-{}", workload.name(), tid))
                    .spawn_scoped(scope, move || {
                        let result = run_worker(
                            runner, workload, config, cluster, factory, &latch, tid, threads,
                            iterations,
                        );
                        if let Err(e) = &result {
                            error!(target: "churn::harness", tid, error = %e, "Worker failed");
                            latch.count_down();
                        }
                        result
                    });
                (tid, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(tid, handle)| {
                let result = match handle {
                    Ok(handle) => handle.join().unwrap_or_else(|payload| {
                        latch.count_down();
                        Err(ChurnError::WorkerPanicked {
                            tid,
                            message: panic_message(payload.as_ref()),
                        })
                    }),
                    Err(e) => {
                        latch.count_down();
                        Err(ChurnError::Io(e))
                    }
                };
                ThreadReport { tid, result }
            })
            .collect::<Vec<_>>()
    });

    let report = WorkloadReport {
        workload: workload.name().to_string(),
        threads: reports,
    };
    info!(
        target: "churn::harness",
        workload = workload.name(),
        iterations = report.total_iterations(),
        failures = report.failures().count(),
        "Workload finished"
    );

    if let Some(teardown) = workload.teardown() {
        teardown(workload.data(), admin_db.as_ref(), &config.coll_name)?;
    }
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn run_worker<M: Clone>(
    runner: &FsmRunner,
    workload: &Workload<M>,
    config: &WorkloadConfig,
    cluster: &ClusterTopology,
    factory: &dyn ConnectionFactory,
    latch: &Arc<ErrorLatch>,
    tid: usize,
    num_threads: usize,
    iterations: usize,
) -> ChurnResult<RunStats> {
    let db = factory.open_database(&config.db_name)?;
    let outcome = runner.run(RunArgs {
        tid,
        num_threads,
        iterations,
        start_state: workload.start_state(),
        states: workload.states(),
        transitions: workload.transitions(),
        data: workload.data().clone(),
        db,
        coll_name: &config.coll_name,
        pass_connection_cache: config.pass_connection_cache,
        cluster,
        factory,
        error_latch: Arc::clone(latch),
    })?;
    Ok(outcome.stats)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
