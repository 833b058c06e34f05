//! Error types for churn
//!
//! This module defines all error types used throughout the workload runner.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Errors fall into a small taxonomy that drives the engine's recovery
//! decisions:
//! - Configuration errors: malformed workload definitions, never retried
//! - Transient transaction errors: retried inside the transaction wrapper
//! - "Not supported in transaction" errors: trigger non-transactional fallback
//! - Shard transition errors: retried when shards are being added/removed
//! - Everything else: propagated out of the runner unmodified

use std::fmt;
use std::io;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for churn operations
pub type ChurnResult<T> = std::result::Result<T, ChurnError>;

// ============================================================================
// Error Codes
// ============================================================================

/// Server error codes the engine reasons about
///
/// Codes that carry no special meaning for the runner are preserved as
/// `Other` so they can be reported faithfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Target host could not be reached (code 6)
    HostUnreachable,
    /// Lock acquisition timed out (code 24)
    LockTimeout,
    /// Referenced shard does not exist, typically during add/remove (code 70)
    ShardNotFound,
    /// Command options are invalid in the current context (code 72)
    InvalidOptions,
    /// Concurrent write conflict (code 112)
    WriteConflict,
    /// Transaction was aborted or never existed (code 251)
    NoSuchTransaction,
    /// Operation cannot run inside a multi-statement transaction (code 263)
    OperationNotSupportedInTransaction,
    /// Node stepped down from primary (code 10107)
    NotWritablePrimary,
    /// Operation was interrupted, e.g. its session was killed (code 11601)
    Interrupted,
    /// Any other server code
    Other(i32),
}

impl ErrorCode {
    /// Numeric server code
    pub fn as_i32(&self) -> i32 {
        match self {
            ErrorCode::HostUnreachable => 6,
            ErrorCode::LockTimeout => 24,
            ErrorCode::ShardNotFound => 70,
            ErrorCode::InvalidOptions => 72,
            ErrorCode::WriteConflict => 112,
            ErrorCode::NoSuchTransaction => 251,
            ErrorCode::OperationNotSupportedInTransaction => 263,
            ErrorCode::NotWritablePrimary => 10107,
            ErrorCode::Interrupted => 11601,
            ErrorCode::Other(code) => *code,
        }
    }

    /// Map a numeric server code back to an `ErrorCode`
    pub fn from_i32(code: i32) -> Self {
        match code {
            6 => ErrorCode::HostUnreachable,
            24 => ErrorCode::LockTimeout,
            70 => ErrorCode::ShardNotFound,
            72 => ErrorCode::InvalidOptions,
            112 => ErrorCode::WriteConflict,
            251 => ErrorCode::NoSuchTransaction,
            263 => ErrorCode::OperationNotSupportedInTransaction,
            10107 => ErrorCode::NotWritablePrimary,
            11601 => ErrorCode::Interrupted,
            other => ErrorCode::Other(other),
        }
    }

    /// Server name of the code
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::HostUnreachable => "HostUnreachable",
            ErrorCode::LockTimeout => "LockTimeout",
            ErrorCode::ShardNotFound => "ShardNotFound",
            ErrorCode::InvalidOptions => "InvalidOptions",
            ErrorCode::WriteConflict => "WriteConflict",
            ErrorCode::NoSuchTransaction => "NoSuchTransaction",
            ErrorCode::OperationNotSupportedInTransaction => "OperationNotSupportedInTransaction",
            ErrorCode::NotWritablePrimary => "NotWritablePrimary",
            ErrorCode::Interrupted => "Interrupted",
            ErrorCode::Other(_) => "UnknownError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_i32())
    }
}

impl FromStr for ErrorCode {
    type Err = ChurnError;

    /// Parses a code name (`"ShardNotFound"`), a numeric code (`"70"`) or
    /// the displayed form (`"ShardNotFound(70)"`, `"UnknownError(12345)"`).
    fn from_str(s: &str) -> ChurnResult<Self> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i32>() {
            return Ok(ErrorCode::from_i32(code));
        }
        if let Some((name, rest)) = s.split_once('(') {
            let parsed = rest
                .strip_suffix(')')
                .and_then(|num| num.trim().parse::<i32>().ok())
                .map(ErrorCode::from_i32);
            return match parsed {
                Some(code) if code.name() == name.trim() => Ok(code),
                _ => Err(ChurnError::InvalidConfig(format!(
                    "unknown error code '{}'",
                    s
                ))),
            };
        }
        let code = match s {
            "HostUnreachable" => ErrorCode::HostUnreachable,
            "LockTimeout" => ErrorCode::LockTimeout,
            "ShardNotFound" => ErrorCode::ShardNotFound,
            "InvalidOptions" => ErrorCode::InvalidOptions,
            "WriteConflict" => ErrorCode::WriteConflict,
            "NoSuchTransaction" => ErrorCode::NoSuchTransaction,
            "OperationNotSupportedInTransaction" => ErrorCode::OperationNotSupportedInTransaction,
            "NotWritablePrimary" => ErrorCode::NotWritablePrimary,
            "Interrupted" => ErrorCode::Interrupted,
            other => {
                return Err(ChurnError::InvalidConfig(format!(
                    "unknown error code '{}'",
                    other
                )))
            }
        };
        Ok(code)
    }
}

// ============================================================================
// ChurnError
// ============================================================================

/// Error types for the workload runner
#[derive(Debug, Error)]
pub enum ChurnError {
    /// A state name was referenced but has no state function
    #[error("State '{state}' has no state function")]
    MissingState {
        /// The unresolved state name
        state: String,
    },

    /// A state has no entry in the transition table
    #[error("State '{state}' has no transitions")]
    MissingTransitions {
        /// The state without outgoing edges
        state: String,
    },

    /// A transition map violates the weight invariants
    #[error("Invalid transitions for state '{state}': {reason}")]
    InvalidTransitions {
        /// Source state of the malformed map
        state: String,
        /// What is wrong with it
        reason: String,
    },

    /// Workload or runner configuration is malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A command returned an error from the server
    #[error("Command failed with {code}: {message}")]
    Command {
        /// Server error code
        code: ErrorCode,
        /// Server error message
        message: String,
        /// Whether the server labelled the error as a transient transaction error
        transient: bool,
    },

    /// The connection cache was read from inside a transaction
    #[error("Connection cache field '{field}' cannot be used inside a transaction")]
    NotSupportedInTransaction {
        /// The cache accessor that was called
        field: &'static str,
    },

    /// Opening or using a connection failed
    #[error("Connection to '{address}' failed: {reason}")]
    Connection {
        /// Host or connection string
        address: String,
        /// Failure description
        reason: String,
    },

    /// No member of a replica set reported its set name before the deadline
    #[error("Could not discover replica set name for '{group}' within {timeout:?}")]
    TopologyDiscovery {
        /// Name of the node group (shard name or "config")
        group: String,
        /// The configured deadline
        timeout: Duration,
    },

    /// A state function reported a failure of its own
    #[error("Workload failure in state '{state}': {message}")]
    Workload {
        /// State that failed
        state: String,
        /// Failure description
        message: String,
    },

    /// A worker thread panicked
    #[error("Worker thread {tid} panicked: {message}")]
    WorkerPanicked {
        /// Thread id of the panicked worker
        tid: usize,
        /// Panic payload, if it was a string
        message: String,
    },

    /// I/O error (config file reads)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChurnError {
    /// Create a command error without the transient label
    pub fn command(code: ErrorCode, message: impl Into<String>) -> Self {
        ChurnError::Command {
            code,
            message: message.into(),
            transient: false,
        }
    }

    /// Create a command error labelled as a transient transaction error
    pub fn transient(code: ErrorCode, message: impl Into<String>) -> Self {
        ChurnError::Command {
            code,
            message: message.into(),
            transient: true,
        }
    }

    /// Create a workload failure for a state
    pub fn workload(state: impl Into<String>, message: impl Into<String>) -> Self {
        ChurnError::Workload {
            state: state.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        ChurnError::Internal(message.into())
    }

    /// Server error code, if this error came from a command
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ChurnError::Command { code, .. } => Some(*code),
            ChurnError::NotSupportedInTransaction { .. } => {
                Some(ErrorCode::OperationNotSupportedInTransaction)
            }
            _ => None,
        }
    }

    /// Whether the transaction that produced this error can be retried as a whole
    pub fn is_transient(&self) -> bool {
        match self {
            ChurnError::Command {
                code, transient, ..
            } => {
                *transient
                    || matches!(
                        code,
                        ErrorCode::WriteConflict
                            | ErrorCode::NoSuchTransaction
                            | ErrorCode::LockTimeout
                    )
            }
            _ => false,
        }
    }

    /// Whether the error reports a killed session
    pub fn is_killed_session(&self) -> bool {
        matches!(self.code(), Some(ErrorCode::Interrupted))
    }

    /// Whether the error is expected while shards are added or removed
    pub fn is_shard_transition(&self) -> bool {
        matches!(
            self.code(),
            Some(ErrorCode::ShardNotFound) | Some(ErrorCode::HostUnreachable)
        )
    }

    /// Whether the error indicates a malformed workload definition
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ChurnError::MissingState { .. }
                | ChurnError::MissingTransitions { .. }
                | ChurnError::InvalidTransitions { .. }
                | ChurnError::InvalidConfig(_)
        )
    }
}
