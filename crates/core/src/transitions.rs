//! Transition tables and weighted next-state selection
//!
//! A [`TransitionTable`] maps each state name to a [`Transitions`] map of
//! next-state names to relative weights. Weights are non-negative and need
//! not be normalized.
//!
//! Entries keep their insertion order, so the same map and the same random
//! draw always select the same state. Seeded runs depend on this.

use crate::error::{ChurnError, ChurnResult};
use std::collections::BTreeMap;

// ============================================================================
// Transitions
// ============================================================================

/// Weighted outgoing edges of a single state, in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transitions {
    edges: Vec<(String, f64)>,
}

impl Transitions {
    /// Create an empty transition map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an edge to `state` with relative `weight`
    ///
    /// Adding the same target twice replaces its weight and keeps its position.
    pub fn to(mut self, state: impl Into<String>, weight: f64) -> Self {
        self.insert(state, weight);
        self
    }

    /// Insert or replace an edge
    pub fn insert(&mut self, state: impl Into<String>, weight: f64) {
        let state = state.into();
        match self.edges.iter_mut().find(|(name, _)| *name == state) {
            Some(edge) => edge.1 = weight,
            None => self.edges.push((state, weight)),
        }
    }

    /// Iterate edges in selection order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.edges.iter().map(|(name, weight)| (name.as_str(), *weight))
    }

    /// Number of edges
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// True if there are no edges
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Sum of all weights
    pub fn total_weight(&self) -> f64 {
        self.edges.iter().map(|(_, weight)| *weight).sum()
    }

    /// Check the weight invariants for the edges leaving `source`
    ///
    /// Every weight must be finite and non-negative, at least one must be
    /// positive, and their sum must stay finite.
    pub fn validate(&self, source: &str) -> ChurnResult<()> {
        if self.edges.is_empty() {
            return Err(ChurnError::InvalidTransitions {
                state: source.to_string(),
                reason: "no outgoing edges".to_string(),
            });
        }
        for (target, weight) in &self.edges {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ChurnError::InvalidTransitions {
                    state: source.to_string(),
                    reason: format!("weight {} for '{}' is not a non-negative number", weight, target),
                });
            }
        }
        let total = self.total_weight();
        if total <= 0.0 {
            return Err(ChurnError::InvalidTransitions {
                state: source.to_string(),
                reason: "total weight is zero".to_string(),
            });
        }
        if !total.is_finite() {
            return Err(ChurnError::InvalidTransitions {
                state: source.to_string(),
                reason: "total weight overflows".to_string(),
            });
        }
        Ok(())
    }

    /// Select the next state for a uniform draw `r` in `[0, 1)`
    ///
    /// See [`select_next_state`].
    pub fn choose(&self, source: &str, r: f64) -> ChurnResult<&str> {
        select_next_state(source, self, r)
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Transitions {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut transitions = Transitions::new();
        for (state, weight) in iter {
            transitions.insert(state, weight);
        }
        transitions
    }
}

// ============================================================================
// Weighted choice
// ============================================================================

/// Pick the next state from `transitions` using the uniform draw `r`
///
/// The probability of returning a state is its weight divided by the total
/// weight. The draw is scaled by the total weight and compared against the
/// running prefix sum of weights; the first state whose prefix sum exceeds
/// the scaled draw wins.
///
/// `r = 0` returns the first state with positive weight, and `r` close to 1
/// returns the last state with positive weight. Zero-weight states are never
/// returned.
///
/// # Errors
/// * `InvalidTransitions` - if the map is empty, has a negative or
///   non-finite weight, or its total weight is zero or overflows
/// * `Internal` - if `r` is outside `[0, 1)`
pub fn select_next_state<'a>(
    source: &str,
    transitions: &'a Transitions,
    r: f64,
) -> ChurnResult<&'a str> {
    if !(0.0..1.0).contains(&r) {
        return Err(ChurnError::internal(format!(
            "random draw {} is outside [0, 1)",
            r
        )));
    }
    transitions.validate(source)?;

    let total = transitions.total_weight();
    let scaled = r * total;

    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (state, weight) in transitions.iter() {
        if weight <= 0.0 {
            continue;
        }
        cumulative += weight;
        last_positive = Some(state);
        if cumulative > scaled {
            return Ok(state);
        }
    }

    // Rounding in the prefix sum can leave the scaled draw equal to the total.
    last_positive.ok_or_else(|| ChurnError::InvalidTransitions {
        state: source.to_string(),
        reason: "total weight is zero".to_string(),
    })
}

// ============================================================================
// TransitionTable
// ============================================================================

/// Mapping from state name to its weighted outgoing edges
///
/// Read-only once a workload is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionTable {
    table: BTreeMap<String, Transitions>,
}

impl TransitionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the outgoing edges of `state`
    pub fn insert(&mut self, state: impl Into<String>, transitions: Transitions) {
        self.table.insert(state.into(), transitions);
    }

    /// Outgoing edges of `state`
    ///
    /// # Errors
    /// * `MissingTransitions` - if `state` has no entry
    pub fn get(&self, state: &str) -> ChurnResult<&Transitions> {
        self.table
            .get(state)
            .ok_or_else(|| ChurnError::MissingTransitions {
                state: state.to_string(),
            })
    }

    /// True if `state` has an entry
    pub fn contains(&self, state: &str) -> bool {
        self.table.contains_key(state)
    }

    /// Iterate `(source, transitions)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Transitions)> {
        self.table.iter().map(|(name, t)| (name.as_str(), t))
    }

    /// Number of source states
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Pick the next state after `current` for the draw `r`
    pub fn next_state(&self, current: &str, r: f64) -> ChurnResult<&str> {
        select_next_state(current, self.get(current)?, r)
    }

    /// Check every map's weights, and that every target satisfies `is_known`
    pub fn validate(&self, is_known: impl Fn(&str) -> bool) -> ChurnResult<()> {
        for (source, transitions) in self.iter() {
            transitions.validate(source)?;
            for (target, _) in transitions.iter() {
                if !is_known(target) {
                    return Err(ChurnError::MissingState {
                        state: target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
