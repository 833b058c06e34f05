//! Cluster topology descriptor
//!
//! Lists the node addresses of a sharded cluster: routers, config servers,
//! and the members of each named shard. The connection cache opens one
//! connection per listed address.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key used for the config server group in replica-set keyed maps
pub const CONFIG_GROUP: &str = "config";

/// Node addresses of the cluster under test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    /// Router addresses
    #[serde(default)]
    pub mongos: Vec<String>,
    /// Config server replica set members
    #[serde(default)]
    pub config: Vec<String>,
    /// Shard name to replica set member addresses
    #[serde(default)]
    pub shards: BTreeMap<String, Vec<String>>,
}

impl ClusterTopology {
    /// Create an empty topology
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a router address
    pub fn with_mongos(mut self, host: impl Into<String>) -> Self {
        self.mongos.push(host.into());
        self
    }

    /// Add a config server member
    pub fn with_config_server(mut self, host: impl Into<String>) -> Self {
        self.config.push(host.into());
        self
    }

    /// Set the members of a shard
    pub fn with_shard<I, S>(mut self, name: impl Into<String>, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shards
            .insert(name.into(), hosts.into_iter().map(Into::into).collect());
        self
    }

    /// True if the topology has shards (i.e. describes a sharded cluster)
    pub fn is_sharded(&self) -> bool {
        !self.shards.is_empty()
    }

    /// Total number of node addresses
    pub fn node_count(&self) -> usize {
        self.mongos.len() + self.config.len() + self.shards.values().map(Vec::len).sum::<usize>()
    }

    /// Replica set groups in build order: the config servers first, then shards by name
    ///
    /// Empty groups are skipped.
    pub fn replica_set_groups(&self) -> impl Iterator<Item = (&str, &[String])> {
        std::iter::once((CONFIG_GROUP, self.config.as_slice()))
            .chain(
                self.shards
                    .iter()
                    .map(|(name, hosts)| (name.as_str(), hosts.as_slice())),
            )
            .filter(|(_, hosts)| !hosts.is_empty())
    }
}

/// Standard replica set connection string embedding every member
///
/// ```
/// use churn_core::topology::replica_set_url;
/// let hosts = vec!["a:27017".to_string(), "b:27017".to_string()];
/// assert_eq!(replica_set_url("rs0", &hosts), "mongodb://a:27017,b:27017/?replicaSet=rs0");
/// ```
pub fn replica_set_url(set_name: &str, hosts: &[String]) -> String {
    format!("mongodb://{}/?replicaSet={}", hosts.join(","), set_name)
}
