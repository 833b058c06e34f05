//! The per-thread finite-state-machine driver
//!
//! `FsmRunner::run` is called once per worker thread. It optionally builds
//! the thread's connection cache, then loops:
//! 1. Stop if the shared error latch shows another thread has failed
//! 2. Resolve the current state's function
//! 3. Execute it plainly, transactionally, or under shard-transition retry
//! 4. Draw the next state from the transition table
//!
//! until the iteration budget is exhausted. Iterations within a thread are
//! strictly sequential; threads never wait on each other.

use crate::cache::{CacheAccess, ConnectionCacheBuilder, DiscoveryConfig};
use crate::retry::{retry_on_shard_transition, FallbackPolicy, RetryConfig};
use crate::state::{StateContext, StateFn, StateTable};
use crate::transaction::run_in_transaction;
use churn_concurrency::ErrorLatch;
use churn_core::{
    ChurnResult, ClusterTopology, ConnectionFactory, Database, Session, TransitionTable,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// Options and arguments
// ============================================================================

/// Execution options shared by every thread of a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Run every state as the body of a transaction
    pub in_transaction: bool,
    /// Shards are being added or removed while the workload runs
    pub shards_added_removed: bool,
    /// Retry behavior for transient transaction errors
    pub transaction_retry: RetryConfig,
    /// Retry behavior for shard transition errors
    pub shard_retry: RetryConfig,
    /// Errors that make a transactional state run outside a transaction
    pub fallback: FallbackPolicy,
    /// Replica set discovery polling for the connection cache
    pub discovery: DiscoveryConfig,
    /// Base seed; thread `tid` draws from `seed + tid`
    pub seed: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            in_transaction: false,
            shards_added_removed: false,
            transaction_retry: RetryConfig::default(),
            shard_retry: RetryConfig::shard_transition(),
            fallback: FallbackPolicy::default(),
            discovery: DiscoveryConfig::default(),
            seed: None,
        }
    }
}

/// Per-thread arguments of a run
pub struct RunArgs<'a, M> {
    /// Worker thread id
    pub tid: usize,
    /// Number of worker threads in the run
    pub num_threads: usize,
    /// Iteration budget
    pub iterations: usize,
    /// Initial state
    pub start_state: &'a str,
    /// State functions
    pub states: &'a StateTable<M>,
    /// Weighted transitions
    pub transitions: &'a TransitionTable,
    /// The thread's model
    pub data: M,
    /// The thread's database handle
    pub db: Arc<dyn Database>,
    /// Collection the workload operates on
    pub coll_name: &'a str,
    /// Build a connection cache and hand it to state functions
    pub pass_connection_cache: bool,
    /// Cluster to build the connection cache from
    pub cluster: &'a ClusterTopology,
    /// Opens the connection cache's connections
    pub factory: &'a dyn ConnectionFactory,
    /// Shared error countdown
    pub error_latch: Arc<ErrorLatch>,
}

// ============================================================================
// Results
// ============================================================================

/// Counters describing one thread's run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    /// State invocations completed
    pub iterations: usize,
    /// Completed invocations per state
    pub state_visits: BTreeMap<String, usize>,
    /// Invocations that committed as a transaction
    pub commits: usize,
    /// Transaction attempts aborted and retried
    pub transaction_retries: usize,
    /// Invocations that fell back to running outside a transaction
    pub fallbacks: usize,
    /// Invocations retried because of shard transitions
    pub shard_retries: usize,
    /// True if the run stopped on the error latch before its budget
    pub stopped_early: bool,
}

impl RunStats {
    fn record_visit(&mut self, state: &str) {
        self.iterations += 1;
        *self.state_visits.entry(state.to_string()).or_insert(0) += 1;
    }

    /// Completed invocations of `state`
    pub fn visits(&self, state: &str) -> usize {
        self.state_visits.get(state).copied().unwrap_or(0)
    }
}

/// Final model and counters of one thread
#[derive(Debug, Clone)]
pub struct RunOutcome<M> {
    /// The model after the last iteration
    pub data: M,
    /// Run counters
    pub stats: RunStats,
}

// ============================================================================
// FsmRunner
// ============================================================================

/// Drives one thread's state machine
#[derive(Debug, Clone, Default)]
pub struct FsmRunner {
    options: RunOptions,
}

impl FsmRunner {
    /// Create a runner with `options`
    pub fn new(options: RunOptions) -> Self {
        Self { options }
    }

    /// Execution options
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run one thread's state machine
    ///
    /// Draws from a generator seeded with `seed + tid` when a seed is
    /// configured, from entropy otherwise.
    pub fn run<M: Clone>(&self, args: RunArgs<'_, M>) -> ChurnResult<RunOutcome<M>> {
        let mut rng = match self.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(args.tid as u64)),
            None => StdRng::from_entropy(),
        };
        self.run_with_rng(args, &mut rng)
    }

    /// Run one thread's state machine drawing transitions from `rng`
    ///
    /// # Errors
    /// * `MissingState` / `MissingTransitions` - malformed workload
    /// * `TopologyDiscovery` / `Connection` - connection cache build failed
    /// * Any unrecovered error raised by a state function
    pub fn run_with_rng<M: Clone, R: Rng>(
        &self,
        args: RunArgs<'_, M>,
        rng: &mut R,
    ) -> ChurnResult<RunOutcome<M>> {
        let RunArgs {
            tid,
            num_threads,
            iterations,
            start_state,
            states,
            transitions,
            mut data,
            db,
            coll_name,
            pass_connection_cache,
            cluster,
            factory,
            error_latch,
        } = args;

        info!(target: "churn::runner", tid, iterations, start_state, "Starting run");

        let cache = if pass_connection_cache {
            Some(
                ConnectionCacheBuilder::new(factory, db.session())
                    .with_discovery(self.options.discovery.clone())
                    .build(cluster)?,
            )
        } else {
            None
        };

        let mut stats = RunStats::default();
        let mut current = start_state.to_string();
        let result = (|| -> ChurnResult<()> {
            for iteration in 0..iterations {
                if error_latch.should_stop(num_threads) {
                    info!(
                        target: "churn::runner",
                        tid,
                        iteration,
                        remaining = error_latch.get_count(),
                        "Another thread failed, stopping"
                    );
                    stats.stopped_early = true;
                    break;
                }

                let state_fn = states.get(&current)?;
                let ctx = StateContext::new(tid, &current, db.as_ref(), coll_name)
                    .with_cache(cache.as_ref().map(|c| c as &dyn CacheAccess));
                self.execute(state_fn, &mut data, &ctx, db.session(), &mut stats)?;
                stats.record_visit(&current);

                let next = transitions.next_state(&current, rng.gen::<f64>())?;
                debug!(target: "churn::runner", tid, from = %current, to = next, "Transition");
                current = next.to_string();
            }
            Ok(())
        })();

        if let Some(cache) = cache {
            cache.close();
        }
        result?;

        info!(
            target: "churn::runner",
            tid,
            iterations = stats.iterations,
            stopped_early = stats.stopped_early,
            "Run finished"
        );
        Ok(RunOutcome { data, stats })
    }

    fn execute<M: Clone>(
        &self,
        state_fn: &StateFn<M>,
        data: &mut M,
        ctx: &StateContext<'_>,
        session: Arc<dyn Session>,
        stats: &mut RunStats,
    ) -> ChurnResult<()> {
        if self.options.in_transaction {
            let outcome = run_in_transaction(
                session.as_ref(),
                &self.options.transaction_retry,
                &self.options.fallback,
                state_fn,
                data,
                ctx,
            )?;
            stats.transaction_retries += outcome.retries;
            if outcome.fell_back {
                stats.fallbacks += 1;
            } else {
                stats.commits += 1;
            }
        } else if self.options.shards_added_removed {
            stats.shard_retries +=
                retry_on_shard_transition(&self.options.shard_retry, || state_fn(data, ctx))?;
        } else {
            state_fn(data, ctx)?;
        }
        Ok(())
    }
}

