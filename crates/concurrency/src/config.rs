//! Configuration via `trellis.toml`
//!
//! Holds the default isolation of new connections, the exclusive lock
//! timeout and the retry policy of `transaction_with_retry`.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TxnError, TxnResult};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "trellis.toml";

/// Isolation of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Writes go straight to the store under the exclusive lock
    WriteThrough,
    /// Writes are staged in the overlay; reads are not tracked
    ReadSnapshot,
    /// Staged writes; commit fails only on a proven phantom read
    Snapshot,
    /// Staged writes; commit fails on any overlap with a tracked read
    Serializable,
}

impl IsolationLevel {
    /// Writes are staged rather than written through
    pub fn read_snapshot(self) -> bool {
        !matches!(self, IsolationLevel::WriteThrough)
    }

    /// Reads are tracked
    pub fn snapshot(self) -> bool {
        matches!(self, IsolationLevel::Snapshot | IsolationLevel::Serializable)
    }

    /// Any detected overlap aborts
    pub fn serializable(self) -> bool {
        matches!(self, IsolationLevel::Serializable)
    }

    /// Config string of this level
    pub fn as_str(self) -> &'static str {
        match self {
            IsolationLevel::WriteThrough => "write-through",
            IsolationLevel::ReadSnapshot => "read-snapshot",
            IsolationLevel::Snapshot => "snapshot",
            IsolationLevel::Serializable => "serializable",
        }
    }
}

impl FromStr for IsolationLevel {
    type Err = TxnError;

    fn from_str(s: &str) -> TxnResult<Self> {
        match s {
            "write-through" => Ok(IsolationLevel::WriteThrough),
            "read-snapshot" => Ok(IsolationLevel::ReadSnapshot),
            "snapshot" => Ok(IsolationLevel::Snapshot),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(TxnError::Config(format!(
                "invalid isolation '{}', expected \"write-through\", \"read-snapshot\", \"snapshot\" or \"serializable\"",
                other
            ))),
        }
    }
}

/// How `transaction_with_retry` reacts to a conflicting commit
///
/// Only conflict and phantom aborts are replayed; the closure runs again
/// from a fresh `begin()`, after sleeping `base_delay_ms * 2^attempt`
/// bounded by `max_delay_ms`.
///
/// ```ignore
/// let retry = RetryConfig::new().with_max_retries(5).with_base_delay_ms(2);
/// conn.transaction_with_retry(&retry, |txn| txn.add_statement(statement.clone()))?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Replays after the first attempt; 0 surfaces the first conflict
    pub max_retries: usize,
    /// Sleep before the first replay, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound of any single sleep, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    /// Three replays, 10ms doubling up to 100ms
    pub fn new() -> Self {
        Self::default()
    }

    /// Surface the first conflict to the caller
    pub fn no_retry() -> Self {
        Self::default().with_max_retries(0)
    }

    /// Set how many times a conflicting transaction is replayed
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the first sleep
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set the sleep ceiling
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Sleep before replay number `attempt` (0-based)
    pub(crate) fn backoff(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt)
            .ok()
            .and_then(|exp| 2u64.checked_pow(exp))
            .unwrap_or(u64::MAX);
        let delay_ms = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Configuration loaded from `trellis.toml`
///
/// # Example
///
/// ```toml
/// isolation = "serializable"
/// lock_timeout_ms = 500
///
/// [retry]
/// max_retries = 5
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrellisConfig {
    /// Default isolation of new connections
    #[serde(default = "default_isolation_str")]
    pub isolation: String,
    /// Exclusive lock timeout in milliseconds, blocking forever if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_timeout_ms: Option<u64>,
    /// Retry policy of `transaction_with_retry`
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_isolation_str() -> String {
    IsolationLevel::Snapshot.as_str().to_string()
}

impl Default for TrellisConfig {
    fn default() -> Self {
        Self {
            isolation: default_isolation_str(),
            lock_timeout_ms: None,
            retry: RetryConfig::default(),
        }
    }
}

impl TrellisConfig {
    /// Parse the isolation string
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Config` for an unknown level.
    pub fn isolation_level(&self) -> TxnResult<IsolationLevel> {
        self.isolation.parse()
    }

    /// Exclusive lock timeout, if bounded
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Trellis transaction configuration
#
# Isolation of new connections:
#   "write-through" = writes applied directly under an exclusive lock
#   "read-snapshot" = writes staged until commit, reads not tracked
#   "snapshot"      = staged writes, commit fails on a proven phantom read
#   "serializable"  = staged writes, commit fails on any overlapping commit
isolation = "snapshot"

# Exclusive lock timeout in milliseconds (default: wait forever)
# lock_timeout_ms = 1000

[retry]
max_retries = 3
base_delay_ms = 10
max_delay_ms = 100
"#
    }

    /// Parse a config from TOML text
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Config` if the text does not parse or names an
    /// unknown isolation level.
    pub fn from_toml_str(content: &str) -> TxnResult<Self> {
        let config: TrellisConfig = toml::from_str(content)
            .map_err(|e| TxnError::Config(format!("failed to parse config: {}", e)))?;
        config.isolation_level()?;
        Ok(config)
    }

    /// Read a config file, writing the default one first when missing
    ///
    /// # Errors
    ///
    /// Returns `TxnError::Config` if the file cannot be written, read or parsed.
    pub fn load(path: &Path) -> TxnResult<Self> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                TxnError::Config(format!(
                    "failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            TxnError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }
}
