//! Run configuration via `churn.toml`
//!
//! Everything that varies between runs of the same workload lives here:
//! thread and iteration overrides, the execution mode, retry policies and
//! connection cache discovery. Missing keys take their defaults, so an empty
//! file is a valid configuration.

use crate::cache::DiscoveryConfig;
use crate::retry::{FallbackPolicy, RetryConfig};
use crate::runner::RunOptions;
use churn_core::{ChurnError, ChurnResult, ErrorCode};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "churn.toml";

/// Run configuration loaded from `churn.toml`
///
/// # Example
///
/// ```toml
/// threads = 4
/// iterations = 50
/// in_transaction = true
///
/// [transaction_retry]
/// max_retries = 5
/// retry_on_killed_session = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Override the workload's thread count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    /// Override the workload's iterations per thread
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    /// Database the workload runs against
    #[serde(default = "default_db_name")]
    pub db_name: String,
    /// Collection the workload operates on
    #[serde(default = "default_coll_name")]
    pub coll_name: String,
    /// Run every state as the body of a transaction
    #[serde(default)]
    pub in_transaction: bool,
    /// Build a connection cache per thread
    #[serde(default)]
    pub pass_connection_cache: bool,
    /// Shards are added or removed while the workload runs
    #[serde(default)]
    pub shards_added_removed: bool,
    /// Seed for reproducible state sequences
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Error code names that trigger non-transactional fallback
    #[serde(default = "default_fallback_codes")]
    pub fallback_codes: Vec<String>,
    /// Transient transaction error retries
    #[serde(default)]
    pub transaction_retry: RetryConfig,
    /// Shard transition retries
    #[serde(
        default = "RetryConfig::shard_transition",
        deserialize_with = "deserialize_shard_retry"
    )]
    pub shard_retry: RetryConfig,
    /// Replica set discovery polling
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

fn default_db_name() -> String {
    "test".to_string()
}

fn default_coll_name() -> String {
    "fsm_workload".to_string()
}

fn default_fallback_codes() -> Vec<String> {
    vec![
        "OperationNotSupportedInTransaction".to_string(),
        "InvalidOptions".to_string(),
    ]
}

/// Keys present in a `[shard_retry]` table
#[derive(Deserialize)]
struct ShardRetryTable {
    max_retries: Option<usize>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    retry_on_killed_session: Option<bool>,
}

/// Missing keys in `[shard_retry]` come from the shard transition policy,
/// not from `RetryConfig::default()`
fn deserialize_shard_retry<'de, D>(deserializer: D) -> Result<RetryConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let table = ShardRetryTable::deserialize(deserializer)?;
    let base = RetryConfig::shard_transition();
    Ok(RetryConfig {
        max_retries: table.max_retries.unwrap_or(base.max_retries),
        base_delay_ms: table.base_delay_ms.unwrap_or(base.base_delay_ms),
        max_delay_ms: table.max_delay_ms.unwrap_or(base.max_delay_ms),
        retry_on_killed_session: table
            .retry_on_killed_session
            .unwrap_or(base.retry_on_killed_session),
    })
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            threads: None,
            iterations: None,
            db_name: default_db_name(),
            coll_name: default_coll_name(),
            in_transaction: false,
            pass_connection_cache: false,
            shards_added_removed: false,
            seed: None,
            fallback_codes: default_fallback_codes(),
            transaction_retry: RetryConfig::default(),
            shard_retry: RetryConfig::shard_transition(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl WorkloadConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Churn workload configuration
#
# Override the workload's own thread count and iteration budget.
# threads = 5
# iterations = 20

db_name = "test"
coll_name = "fsm_workload"

# Run every state inside a retryable multi-statement transaction.
in_transaction = false

# Build a per-thread cache of connections to every cluster node.
pass_connection_cache = false

# Retry states that fail with shard transition errors.
shards_added_removed = false

# Fixed seed for reproducible state sequences (thread tid uses seed + tid).
# seed = 42

# Errors that make a transactional state run outside the transaction.
fallback_codes = ["OperationNotSupportedInTransaction", "InvalidOptions"]

[transaction_retry]
max_retries = 3
base_delay_ms = 10
max_delay_ms = 100
retry_on_killed_session = false

[shard_retry]
max_retries = 10
base_delay_ms = 100
max_delay_ms = 2000

[discovery]
poll_interval_ms = 2000
timeout_ms = 600000
"#
    }

    /// Parse config from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this structure.
    pub fn from_toml_str(content: &str) -> ChurnResult<Self> {
        toml::from_str(content)
            .map_err(|e| ChurnError::InvalidConfig(format!("failed to parse config: {}", e)))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> ChurnResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| {
            ChurnError::InvalidConfig(format!("config file '{}': {}", path.display(), e))
        })
    }

    /// Serialize to TOML text
    pub fn to_toml_string(&self) -> ChurnResult<String> {
        toml::to_string(self)
            .map_err(|e| ChurnError::internal(format!("failed to serialize config: {}", e)))
    }

    /// Check the values that deserialization cannot
    pub fn validate(&self) -> ChurnResult<()> {
        if self.threads == Some(0) {
            return Err(ChurnError::InvalidConfig(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.coll_name.is_empty() {
            return Err(ChurnError::InvalidConfig(
                "coll_name must not be empty".to_string(),
            ));
        }
        self.fallback_policy()?;
        Ok(())
    }

    /// Fallback policy built from `fallback_codes`
    pub fn fallback_policy(&self) -> ChurnResult<FallbackPolicy> {
        let codes = self
            .fallback_codes
            .iter()
            .map(|name| name.parse::<ErrorCode>())
            .collect::<ChurnResult<Vec<_>>>()?;
        Ok(FallbackPolicy::new(codes))
    }

    /// Runner options for this configuration
    pub fn run_options(&self) -> ChurnResult<RunOptions> {
        Ok(RunOptions {
            in_transaction: self.in_transaction,
            shards_added_removed: self.shards_added_removed,
            transaction_retry: self.transaction_retry.clone(),
            shard_retry: self.shard_retry.clone(),
            fallback: self.fallback_policy()?,
            discovery: self.discovery.clone(),
            seed: self.seed,
        })
    }
}
