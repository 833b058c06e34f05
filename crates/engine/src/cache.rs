//! Per-thread connection cache
//!
//! A `ConnectionCache` holds one connection to every node in the cluster,
//! plus one replica-set view connection per replica set group. Every
//! connection is rebound to the worker thread's session, so reads through
//! the cache observe the same causal history as the thread's own commands.
//!
//! State functions never see the cache directly. They get a
//! `&dyn CacheAccess`: the cache itself outside of transactions, or a
//! `TransactionCacheGuard` inside them. The guard fails every accessor with
//! `NotSupportedInTransaction`, which makes the transaction wrapper fall
//! back to running the state outside of a transaction.

use churn_core::{
    replica_set_url, ChurnError, ChurnResult, ClusterTopology, Connection, ConnectionFactory,
    Session, CONFIG_GROUP,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shard name to per-node connections
pub type ShardConnections = BTreeMap<String, Vec<Box<dyn Connection>>>;

/// Group name ("config" or a shard name) to its replica-set view connection
pub type ReplicaSetConnections = BTreeMap<String, Box<dyn Connection>>;

// ============================================================================
// CacheAccess
// ============================================================================

/// Read accessors of a connection cache
pub trait CacheAccess {
    /// Router connections
    fn mongos(&self) -> ChurnResult<&[Box<dyn Connection>]>;

    /// Config server node connections
    fn config(&self) -> ChurnResult<&[Box<dyn Connection>]>;

    /// Per-shard node connections
    fn shards(&self) -> ChurnResult<&ShardConnections>;

    /// Replica-set view connections, keyed by shard name plus "config"
    fn rs_conns(&self) -> ChurnResult<&ReplicaSetConnections>;

    /// Node connections of a single shard
    fn shard(&self, name: &str) -> ChurnResult<&[Box<dyn Connection>]> {
        self.shards()?
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ChurnError::InvalidConfig(format!("unknown shard '{}'", name)))
    }
}

// ============================================================================
// ConnectionCache
// ============================================================================

/// Read-only snapshot of connections to every node of the cluster
///
/// Exclusively owned by the worker thread that built it.
pub struct ConnectionCache {
    mongos: Vec<Box<dyn Connection>>,
    config: Vec<Box<dyn Connection>>,
    shards: ShardConnections,
    rs_conns: ReplicaSetConnections,
}

impl ConnectionCache {
    /// Total number of open connections, replica-set views included
    pub fn connection_count(&self) -> usize {
        self.mongos.len()
            + self.config.len()
            + self.shards.values().map(Vec::len).sum::<usize>()
            + self.rs_conns.len()
    }

    /// Close every connection and drop the cache
    pub fn close(self) {
        let count = self.connection_count();
        let all = self
            .mongos
            .iter()
            .chain(self.config.iter())
            .chain(self.shards.values().flatten())
            .chain(self.rs_conns.values());
        for conn in all {
            conn.close();
        }
        debug!(target: "churn::cache", count, "Closed connection cache");
    }
}

impl CacheAccess for ConnectionCache {
    fn mongos(&self) -> ChurnResult<&[Box<dyn Connection>]> {
        Ok(&self.mongos)
    }

    fn config(&self) -> ChurnResult<&[Box<dyn Connection>]> {
        Ok(&self.config)
    }

    fn shards(&self) -> ChurnResult<&ShardConnections> {
        Ok(&self.shards)
    }

    fn rs_conns(&self) -> ChurnResult<&ReplicaSetConnections> {
        Ok(&self.rs_conns)
    }
}

impl std::fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("mongos", &self.mongos.len())
            .field("config", &self.config.len())
            .field("shards", &self.shards.keys().collect::<Vec<_>>())
            .field("rs_conns", &self.rs_conns.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Stand-in for the cache handed to state functions inside a transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionCacheGuard;

impl CacheAccess for TransactionCacheGuard {
    fn mongos(&self) -> ChurnResult<&[Box<dyn Connection>]> {
        Err(ChurnError::NotSupportedInTransaction { field: "mongos" })
    }

    fn config(&self) -> ChurnResult<&[Box<dyn Connection>]> {
        Err(ChurnError::NotSupportedInTransaction { field: "config" })
    }

    fn shards(&self) -> ChurnResult<&ShardConnections> {
        Err(ChurnError::NotSupportedInTransaction { field: "shards" })
    }

    fn rs_conns(&self) -> ChurnResult<&ReplicaSetConnections> {
        Err(ChurnError::NotSupportedInTransaction { field: "rsConns" })
    }
}

// ============================================================================
// Discovery Configuration
// ============================================================================

/// Polling behavior for replica set name discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Delay between polls in milliseconds
    pub poll_interval_ms: u64,
    /// Give up after this many milliseconds
    pub timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            timeout_ms: 10 * 60 * 1_000,
        }
    }
}

impl DiscoveryConfig {
    /// Poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Deadline as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ============================================================================
// ConnectionCacheBuilder
// ============================================================================

/// Builds a `ConnectionCache` bound to one session
pub struct ConnectionCacheBuilder<'a> {
    factory: &'a dyn ConnectionFactory,
    session: Arc<dyn Session>,
    discovery: DiscoveryConfig,
}

impl<'a> ConnectionCacheBuilder<'a> {
    /// Create a builder that binds every connection to `session`
    pub fn new(factory: &'a dyn ConnectionFactory, session: Arc<dyn Session>) -> Self {
        Self {
            factory,
            session,
            discovery: DiscoveryConfig::default(),
        }
    }

    /// Override discovery polling
    pub fn with_discovery(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    /// Connect to every node of `cluster` and discover each replica set
    ///
    /// # Errors
    /// * `Connection` - if any node cannot be connected to
    /// * `TopologyDiscovery` - if a replica set group never reports its name
    ///   before the discovery deadline
    pub fn build(&self, cluster: &ClusterTopology) -> ChurnResult<ConnectionCache> {
        let mut cache = ConnectionCache {
            mongos: Vec::new(),
            config: Vec::new(),
            shards: ShardConnections::new(),
            rs_conns: ReplicaSetConnections::new(),
        };
        if let Err(e) = self.fill(&mut cache, cluster) {
            warn!(
                target: "churn::cache",
                error = %e,
                opened = cache.connection_count(),
                "Connection cache build failed, closing opened connections"
            );
            cache.close();
            return Err(e);
        }
        info!(
            target: "churn::cache",
            session = self.session.id(),
            connections = cache.connection_count(),
            "Built connection cache"
        );
        Ok(cache)
    }

    /// Open connections into `cache` as they succeed, so a failure leaves
    /// every opened connection reachable for closing
    fn fill(&self, cache: &mut ConnectionCache, cluster: &ClusterTopology) -> ChurnResult<()> {
        self.open_all(&cluster.mongos, &mut cache.mongos)?;
        self.open_all(&cluster.config, &mut cache.config)?;

        for (name, hosts) in &cluster.shards {
            let members = cache.shards.entry(name.clone()).or_default();
            self.open_all(hosts, members)?;
        }

        for (group, hosts) in cluster.replica_set_groups() {
            let members = if group == CONFIG_GROUP {
                &cache.config
            } else {
                match cache.shards.get(group) {
                    Some(members) => members,
                    None => continue,
                }
            };
            let set_name = self.discover_set_name(group, members)?;
            let url = replica_set_url(&set_name, hosts);
            let view = self.open(&url)?;
            cache.rs_conns.insert(group.to_string(), view);
        }
        Ok(())
    }

    fn open(&self, address: &str) -> ChurnResult<Box<dyn Connection>> {
        let mut conn = self.factory.connect(address)?;
        conn.bind_session(Arc::clone(&self.session));
        Ok(conn)
    }

    fn open_all(&self, hosts: &[String], into: &mut Vec<Box<dyn Connection>>) -> ChurnResult<()> {
        for host in hosts {
            into.push(self.open(host)?);
        }
        Ok(())
    }

    /// Poll group members round-robin with `hello` until one reports `setName`
    fn discover_set_name(
        &self,
        group: &str,
        members: &[Box<dyn Connection>],
    ) -> ChurnResult<String> {
        let timeout = self.discovery.timeout();
        let timed_out = || ChurnError::TopologyDiscovery {
            group: group.to_string(),
            timeout,
        };
        if members.is_empty() {
            return Err(timed_out());
        }

        let deadline = Instant::now() + timeout;
        let hello = json!({ "hello": 1 });
        let mut attempt = 0usize;
        loop {
            let member = &members[attempt % members.len()];
            match member.run_command("admin", &hello) {
                Ok(reply) => {
                    if let Some(name) = reply.get("setName").and_then(|v| v.as_str()) {
                        debug!(target: "churn::cache", group, set_name = name, "Discovered replica set");
                        return Ok(name.to_string());
                    }
                    debug!(target: "churn::cache", group, host = member.address(), "No setName in hello reply");
                }
                Err(e) => {
                    warn!(target: "churn::cache", group, host = member.address(), error = %e, "hello failed");
                }
            }
            attempt += 1;

            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out());
            }
            std::thread::sleep(self.discovery.poll_interval().min(deadline - now));
        }
    }
}
