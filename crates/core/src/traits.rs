//! Core trait definitions for the database under test
//!
//! The runner never speaks a wire protocol itself. Everything it needs from
//! the cluster goes through these traits:
//! - `Session`: logical session that owns multi-statement transactions
//! - `Connection`: a connection to one node or one replica set
//! - `Database`: the thread's primary database handle
//! - `ConnectionFactory`: opens connections and database handles
//!
//! Commands and replies are JSON documents.

use crate::error::ChurnResult;
use std::sync::Arc;

/// Command or reply document
pub type Document = serde_json::Value;

/// Logical session shared by a thread's database handle and its cached connections
pub trait Session: Send + Sync {
    /// Session identifier
    fn id(&self) -> &str;

    /// Begin a multi-statement transaction on this session
    fn start_transaction(&self) -> ChurnResult<()>;

    /// Commit the active transaction
    fn commit_transaction(&self) -> ChurnResult<()>;

    /// Abort the active transaction
    fn abort_transaction(&self) -> ChurnResult<()>;

    /// True while a transaction is open on this session
    fn in_transaction(&self) -> bool;
}

/// A connection to a single node or to a replica set
pub trait Connection: Send + Sync {
    /// Host address or connection string this connection was opened with
    fn address(&self) -> &str;

    /// Run a command against database `db_name`
    fn run_command(&self, db_name: &str, command: &Document) -> ChurnResult<Document>;

    /// Rebind the connection's default session
    ///
    /// After this call every command issued through the connection belongs
    /// to `session`, so causally consistent reads observe its history.
    fn bind_session(&mut self, session: Arc<dyn Session>);

    /// Session currently bound to this connection, if any
    fn session(&self) -> Option<Arc<dyn Session>>;

    /// Release the underlying network resources
    fn close(&self) {}
}

/// The worker thread's primary database handle
pub trait Database: Send + Sync {
    /// Database name
    fn name(&self) -> &str;

    /// Session every command on this handle runs under
    fn session(&self) -> Arc<dyn Session>;

    /// Run a command against this database
    fn run_command(&self, command: &Document) -> ChurnResult<Document>;
}

/// Opens connections and database handles
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection to a host address or replica set connection string
    fn connect(&self, address: &str) -> ChurnResult<Box<dyn Connection>>;

    /// Open a database handle with a fresh session
    fn open_database(&self, db_name: &str) -> ChurnResult<Arc<dyn Database>>;
}
