//! Shared test utilities for all integration test suites.
//!
//! Provides an in-memory fake cluster implementing the connection traits:
//! - FakeCluster: shared store, per-host replica set names, counters
//! - FakeSession: buffers writes made inside a transaction until commit,
//!   with scriptable commit failures
//! - FakeDatabase / FakeConnection / FakeFactory
//!
//! Import via `mod common;` from any test file.

#![allow(dead_code)]

use churn::{
    ChurnError, ChurnResult, ClusterTopology, Connection, ConnectionFactory, Database, Document,
    Session,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Install a test subscriber once per test binary.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// A two-shard cluster with one router and a three-node config server.
pub fn sharded_topology() -> ClusterTopology {
    ClusterTopology::new()
        .with_mongos("router0:20000")
        .with_config_server("cfg0:20001")
        .with_config_server("cfg1:20002")
        .with_config_server("cfg2:20003")
        .with_shard("shard0", ["s0-a:20010", "s0-b:20011"])
        .with_shard("shard1", ["s1-a:20020"])
}

/// Insert command for a single document.
pub fn insert_cmd(coll: &str, doc: Document) -> Document {
    json!({ "insert": coll, "documents": [doc] })
}

// ============================================================================
// FakeCluster
// ============================================================================

#[derive(Default)]
struct ClusterState {
    collections: BTreeMap<String, Vec<Document>>,
    set_names: HashMap<String, String>,
    hello_failures: HashMap<String, usize>,
    unreachable: HashSet<String>,
    connected: Vec<String>,
    hello_calls: usize,
}

/// In-memory stand-in for the cluster under test.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
    sessions: AtomicUsize,
    closed: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Cluster whose config servers and shards report replica set names.
    pub fn with_topology(topology: &ClusterTopology) -> Arc<Self> {
        let cluster = Self::new();
        for host in &topology.config {
            cluster.set_replica_set(host, "configRS");
        }
        for (shard, hosts) in &topology.shards {
            for host in hosts {
                cluster.set_replica_set(host, &format!("{}-rs", shard));
            }
        }
        cluster
    }

    pub fn set_replica_set(&self, host: &str, set_name: &str) {
        self.state
            .lock()
            .set_names
            .insert(host.to_string(), set_name.to_string());
    }

    /// Make the next `count` hello commands to `host` fail.
    pub fn fail_hello(&self, host: &str, count: usize) {
        self.state
            .lock()
            .hello_failures
            .insert(host.to_string(), count);
    }

    pub fn set_unreachable(&self, host: &str) {
        self.state.lock().unreachable.insert(host.to_string());
    }

    pub fn count(&self, coll: &str) -> usize {
        self.state
            .lock()
            .collections
            .get(coll)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn documents(&self, coll: &str) -> Vec<Document> {
        self.state
            .lock()
            .collections
            .get(coll)
            .cloned()
            .unwrap_or_default()
    }

    pub fn connected(&self) -> Vec<String> {
        self.state.lock().connected.clone()
    }

    pub fn hello_calls(&self) -> usize {
        self.state.lock().hello_calls
    }

    pub fn closed_connections(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sessions_started(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    fn apply(&self, writes: Vec<(String, Document)>) {
        let mut state = self.state.lock();
        for (coll, doc) in writes {
            state.collections.entry(coll).or_default().push(doc);
        }
    }

    fn hello(&self, host: &str) -> ChurnResult<Document> {
        let mut state = self.state.lock();
        state.hello_calls += 1;
        if let Some(remaining) = state.hello_failures.get_mut(host) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChurnError::Connection {
                    address: host.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
        }
        Ok(match state.set_names.get(host) {
            Some(name) => json!({ "ok": 1, "isWritablePrimary": true, "setName": name }),
            None => json!({ "ok": 1, "isWritablePrimary": true, "msg": "isdbgrid" }),
        })
    }
}

// ============================================================================
// FakeSession
// ============================================================================

/// Session that buffers transactional writes until commit.
pub struct FakeSession {
    id: String,
    cluster: Arc<FakeCluster>,
    in_txn: AtomicBool,
    pending: Mutex<Vec<(String, Document)>>,
    commit_failures: Mutex<VecDeque<ChurnError>>,
    pub started: AtomicUsize,
    pub committed: AtomicUsize,
    pub aborted: AtomicUsize,
}

impl FakeSession {
    fn new(id: String, cluster: Arc<FakeCluster>) -> Self {
        Self {
            id,
            cluster,
            in_txn: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            commit_failures: Mutex::new(VecDeque::new()),
            started: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
        }
    }

    /// Make the next commit fail with `err`; queued failures are used in order.
    pub fn fail_next_commit(&self, err: ChurnError) {
        self.commit_failures.lock().push_back(err);
    }

    fn write(&self, coll: String, doc: Document) {
        if self.in_txn.load(Ordering::SeqCst) {
            self.pending.lock().push((coll, doc));
        } else {
            self.cluster.apply(vec![(coll, doc)]);
        }
    }
}

impl Session for FakeSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn start_transaction(&self) -> ChurnResult<()> {
        if self.in_txn.swap(true, Ordering::SeqCst) {
            return Err(ChurnError::internal("transaction already in progress"));
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn commit_transaction(&self) -> ChurnResult<()> {
        if let Some(err) = self.commit_failures.lock().pop_front() {
            // The server aborts the transaction when the commit fails.
            self.pending.lock().clear();
            self.in_txn.store(false, Ordering::SeqCst);
            return Err(err);
        }
        let writes = std::mem::take(&mut *self.pending.lock());
        self.cluster.apply(writes);
        self.in_txn.store(false, Ordering::SeqCst);
        self.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn abort_transaction(&self) -> ChurnResult<()> {
        self.pending.lock().clear();
        self.in_txn.store(false, Ordering::SeqCst);
        self.aborted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_txn.load(Ordering::SeqCst)
    }
}

// ============================================================================
// FakeDatabase
// ============================================================================

pub struct FakeDatabase {
    name: String,
    session: Arc<FakeSession>,
}

impl FakeDatabase {
    pub fn fake_session(&self) -> Arc<FakeSession> {
        Arc::clone(&self.session)
    }
}

impl Database for FakeDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn session(&self) -> Arc<dyn Session> {
        self.session.clone()
    }

    fn run_command(&self, command: &Document) -> ChurnResult<Document> {
        if let Some(coll) = command.get("insert").and_then(|v| v.as_str()) {
            let docs = command
                .get("documents")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let n = docs.len();
            for doc in docs {
                self.session.write(coll.to_string(), doc);
            }
            return Ok(json!({ "ok": 1, "n": n }));
        }
        if let Some(coll) = command.get("count").and_then(|v| v.as_str()) {
            return Ok(json!({ "ok": 1, "n": self.session.cluster.count(coll) }));
        }
        Ok(json!({ "ok": 1 }))
    }
}

// ============================================================================
// FakeConnection
// ============================================================================

pub struct FakeConnection {
    address: String,
    cluster: Arc<FakeCluster>,
    session: Option<Arc<dyn Session>>,
}

impl Connection for FakeConnection {
    fn address(&self) -> &str {
        &self.address
    }

    fn run_command(&self, _db_name: &str, command: &Document) -> ChurnResult<Document> {
        if command.get("hello").is_some() {
            return self.cluster.hello(&self.address);
        }
        Ok(json!({ "ok": 1 }))
    }

    fn bind_session(&mut self, session: Arc<dyn Session>) {
        self.session = Some(session);
    }

    fn session(&self) -> Option<Arc<dyn Session>> {
        self.session.clone()
    }

    fn close(&self) {
        self.cluster.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// FakeFactory
// ============================================================================

/// Factory handing out fake connections and databases over one cluster.
pub struct FakeFactory {
    pub cluster: Arc<FakeCluster>,
    databases: Mutex<Vec<Arc<FakeDatabase>>>,
}

impl FakeFactory {
    pub fn new(cluster: Arc<FakeCluster>) -> Self {
        Self {
            cluster,
            databases: Mutex::new(Vec::new()),
        }
    }

    /// Open a database and keep the concrete handle for inspection.
    pub fn open_fake(&self, db_name: &str) -> Arc<FakeDatabase> {
        let n = self.cluster.sessions.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(FakeSession::new(
            format!("session-{}", n),
            Arc::clone(&self.cluster),
        ));
        let db = Arc::new(FakeDatabase {
            name: db_name.to_string(),
            session,
        });
        self.databases.lock().push(Arc::clone(&db));
        db
    }

    /// Every database opened so far, in open order.
    pub fn databases(&self) -> Vec<Arc<FakeDatabase>> {
        self.databases.lock().clone()
    }
}

impl ConnectionFactory for FakeFactory {
    fn connect(&self, address: &str) -> ChurnResult<Box<dyn Connection>> {
        let mut state = self.cluster.state.lock();
        if state.unreachable.contains(address) {
            return Err(ChurnError::Connection {
                address: address.to_string(),
                reason: "host unreachable".to_string(),
            });
        }
        state.connected.push(address.to_string());
        Ok(Box::new(FakeConnection {
            address: address.to_string(),
            cluster: Arc::clone(&self.cluster),
            session: None,
        }))
    }

    fn open_database(&self, db_name: &str) -> ChurnResult<Arc<dyn Database>> {
        Ok(self.open_fake(db_name))
    }
}
