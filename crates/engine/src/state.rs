//! State functions and the context they run with
//!
//! A state function receives the thread's model mutably and a
//! `StateContext` carrying everything else: the database handle, the
//! collection name, the (optional) connection cache, and whether the call
//! is running inside a transaction. The transaction flag travels in the
//! context rather than on the model, so it can never leak into a model that
//! is later cloned or inspected.

use crate::cache::CacheAccess;
use churn_core::{ChurnError, ChurnResult, Database};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A state of the workload
pub type StateFn<M> = Arc<dyn Fn(&mut M, &StateContext<'_>) -> ChurnResult<()> + Send + Sync>;

// ============================================================================
// StateContext
// ============================================================================

/// Everything a state function can use besides the model
#[derive(Clone, Copy)]
pub struct StateContext<'a> {
    tid: usize,
    state: &'a str,
    db: &'a dyn Database,
    coll_name: &'a str,
    cache: Option<&'a dyn CacheAccess>,
    in_transaction: bool,
}

impl<'a> StateContext<'a> {
    /// Context for a plain, non-transactional invocation
    pub fn new(tid: usize, state: &'a str, db: &'a dyn Database, coll_name: &'a str) -> Self {
        Self {
            tid,
            state,
            db,
            coll_name,
            cache: None,
            in_transaction: false,
        }
    }

    /// Attach a connection cache
    pub fn with_cache(mut self, cache: Option<&'a dyn CacheAccess>) -> Self {
        self.cache = cache;
        self
    }

    /// Same context for a transactional attempt
    ///
    /// If a cache was attached, `guard` replaces it.
    pub(crate) fn transactional<'b>(&self, guard: &'b dyn CacheAccess) -> StateContext<'b>
    where
        'a: 'b,
    {
        StateContext {
            tid: self.tid,
            state: self.state,
            db: self.db,
            coll_name: self.coll_name,
            cache: self.cache.map(|_| guard),
            in_transaction: true,
        }
    }

    /// Worker thread id
    pub fn tid(&self) -> usize {
        self.tid
    }

    /// Name of the state being executed
    pub fn state(&self) -> &'a str {
        self.state
    }

    /// The thread's database handle
    pub fn db(&self) -> &'a dyn Database {
        self.db
    }

    /// Collection the workload operates on
    pub fn coll_name(&self) -> &'a str {
        self.coll_name
    }

    /// Connection cache, if the workload asked for one
    pub fn connection_cache(&self) -> Option<&'a dyn CacheAccess> {
        self.cache
    }

    /// True when the invocation is the body of a transaction
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Build a workload failure for the current state
    pub fn fail(&self, message: impl Into<String>) -> ChurnError {
        ChurnError::workload(self.state, message)
    }
}

impl fmt::Debug for StateContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateContext")
            .field("tid", &self.tid)
            .field("state", &self.state)
            .field("db", &self.db.name())
            .field("coll_name", &self.coll_name)
            .field("has_cache", &self.cache.is_some())
            .field("in_transaction", &self.in_transaction)
            .finish()
    }
}

// ============================================================================
// StateTable
// ============================================================================

/// Mapping from state name to state function
pub struct StateTable<M> {
    states: BTreeMap<String, StateFn<M>>,
}

impl<M> StateTable<M> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            states: BTreeMap::new(),
        }
    }

    /// Register a state function
    pub fn insert<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut M, &StateContext<'_>) -> ChurnResult<()> + Send + Sync + 'static,
    {
        self.states.insert(name.into(), Arc::new(f));
    }

    /// State function for `name`
    ///
    /// # Errors
    /// * `MissingState` - if no function is registered under `name`
    pub fn get(&self, name: &str) -> ChurnResult<&StateFn<M>> {
        self.states.get(name).ok_or_else(|| ChurnError::MissingState {
            state: name.to_string(),
        })
    }

    /// True if `name` has a state function
    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// State names in order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    /// Number of states
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True if no states are registered
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl<M> Default for StateTable<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for StateTable<M> {
    fn clone(&self) -> Self {
        Self {
            states: self.states.clone(),
        }
    }
}

impl<M> fmt::Debug for StateTable<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.states.keys()).finish()
    }
}
