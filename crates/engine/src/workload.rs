//! Workload definitions
//!
//! A workload supplies the pieces the runner drives: named state functions,
//! a weighted transition table, a start state, and the initial model each
//! thread clones. Optional setup and teardown hooks run once around the
//! whole run.
//!
//! `WorkloadBuilder::build` checks the table invariants up front, so a
//! malformed workload fails before any thread starts.

use crate::state::{StateContext, StateTable};
use churn_core::{ChurnError, ChurnResult, Database, TransitionTable, Transitions};
use std::fmt;
use std::sync::Arc;

/// Hook run once before the workers start or after they have all finished
///
/// Receives the initial model, a database handle and the collection name.
pub type HookFn<M> = Arc<dyn Fn(&M, &dyn Database, &str) -> ChurnResult<()> + Send + Sync>;

/// Default number of worker threads
pub const DEFAULT_THREAD_COUNT: usize = 5;

/// Default iterations per thread
pub const DEFAULT_ITERATIONS: usize = 20;

// ============================================================================
// Workload
// ============================================================================

/// A validated workload
pub struct Workload<M> {
    name: String,
    start_state: String,
    states: StateTable<M>,
    transitions: TransitionTable,
    data: M,
    setup: Option<HookFn<M>>,
    teardown: Option<HookFn<M>>,
    thread_count: usize,
    iterations: usize,
}

impl<M> Workload<M> {
    /// Start defining a workload whose threads each start from a clone of `data`
    pub fn builder(name: impl Into<String>, data: M) -> WorkloadBuilder<M> {
        WorkloadBuilder::new(name, data)
    }

    /// Workload name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Initial state
    pub fn start_state(&self) -> &str {
        &self.start_state
    }

    /// State functions
    pub fn states(&self) -> &StateTable<M> {
        &self.states
    }

    /// Transition table
    pub fn transitions(&self) -> &TransitionTable {
        &self.transitions
    }

    /// Initial model
    pub fn data(&self) -> &M {
        &self.data
    }

    /// Setup hook
    pub fn setup(&self) -> Option<&HookFn<M>> {
        self.setup.as_ref()
    }

    /// Teardown hook
    pub fn teardown(&self) -> Option<&HookFn<M>> {
        self.teardown.as_ref()
    }

    /// Threads the workload asks for
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Iterations per thread the workload asks for
    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

impl<M> fmt::Debug for Workload<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workload")
            .field("name", &self.name)
            .field("start_state", &self.start_state)
            .field("states", &self.states)
            .field("thread_count", &self.thread_count)
            .field("iterations", &self.iterations)
            .finish()
    }
}

// ============================================================================
// WorkloadBuilder
// ============================================================================

/// Builder for [`Workload`]
pub struct WorkloadBuilder<M> {
    name: String,
    start_state: Option<String>,
    states: StateTable<M>,
    transitions: TransitionTable,
    data: M,
    setup: Option<HookFn<M>>,
    teardown: Option<HookFn<M>>,
    thread_count: usize,
    iterations: usize,
}

impl<M> WorkloadBuilder<M> {
    /// Create a builder
    pub fn new(name: impl Into<String>, data: M) -> Self {
        Self {
            name: name.into(),
            start_state: None,
            states: StateTable::new(),
            transitions: TransitionTable::new(),
            data,
            setup: None,
            teardown: None,
            thread_count: DEFAULT_THREAD_COUNT,
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Register a state function
    pub fn state<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut M, &StateContext<'_>) -> ChurnResult<()> + Send + Sync + 'static,
    {
        self.states.insert(name, f);
        self
    }

    /// Set the outgoing transitions of a state
    pub fn transitions(mut self, from: impl Into<String>, transitions: Transitions) -> Self {
        self.transitions.insert(from, transitions);
        self
    }

    /// Set the initial state
    pub fn start_state(mut self, name: impl Into<String>) -> Self {
        self.start_state = Some(name.into());
        self
    }

    /// Hook run once before workers start
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&M, &dyn Database, &str) -> ChurnResult<()> + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(f));
        self
    }

    /// Hook run once after all workers finish
    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&M, &dyn Database, &str) -> ChurnResult<()> + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(f));
        self
    }

    /// Number of worker threads
    pub fn thread_count(mut self, threads: usize) -> Self {
        self.thread_count = threads;
        self
    }

    /// Iterations per thread
    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Validate and build the workload
    ///
    /// # Errors
    /// * `InvalidConfig` - no start state, or zero threads
    /// * `MissingState` - the start state or a transition source/target has
    ///   no state function
    /// * `MissingTransitions` - the start state or a transition target has
    ///   no outgoing transitions
    /// * `InvalidTransitions` - a transition map is empty, has a negative or
    ///   non-finite weight, or sums to zero
    pub fn build(self) -> ChurnResult<Workload<M>> {
        let start_state = self.start_state.ok_or_else(|| {
            ChurnError::InvalidConfig(format!("workload '{}' has no start state", self.name))
        })?;
        if self.thread_count == 0 {
            return Err(ChurnError::InvalidConfig(format!(
                "workload '{}' needs at least one thread",
                self.name
            )));
        }

        let states = &self.states;
        let transitions = &self.transitions;
        if !states.contains(&start_state) {
            return Err(ChurnError::MissingState { state: start_state });
        }
        transitions.get(&start_state)?;

        for (source, edges) in transitions.iter() {
            if !states.contains(source) {
                return Err(ChurnError::MissingState {
                    state: source.to_string(),
                });
            }
            for (target, _) in edges.iter() {
                if !transitions.contains(target) {
                    return Err(ChurnError::MissingTransitions {
                        state: target.to_string(),
                    });
                }
            }
        }
        transitions.validate(|name| states.contains(name))?;

        Ok(Workload {
            name: self.name,
            start_state,
            states: self.states,
            transitions: self.transitions,
            data: self.data,
            setup: self.setup,
            teardown: self.teardown,
            thread_count: self.thread_count,
            iterations: self.iterations,
        })
    }
}
