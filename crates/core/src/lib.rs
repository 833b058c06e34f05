//! Core types and traits for churn
//!
//! This crate defines the foundational types used throughout the system:
//! - ChurnError / ErrorCode: Error taxonomy and server error codes
//! - Transitions / TransitionTable: Weighted state transition maps
//! - select_next_state: Weighted random choice of the next state
//! - ClusterTopology: Node addresses of the cluster under test
//! - Traits: Session, Connection, Database, ConnectionFactory

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod topology;
pub mod traits;
pub mod transitions;

pub use error::{ChurnError, ChurnResult, ErrorCode};
pub use topology::{replica_set_url, ClusterTopology, CONFIG_GROUP};
pub use traits::{Connection, ConnectionFactory, Database, Document, Session};
pub use transitions::{select_next_state, TransitionTable, Transitions};
