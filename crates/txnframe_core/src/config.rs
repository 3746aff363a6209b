//! Client-side configuration.

use std::time::Duration;
use txnframe_rpc::RpcClientConfig;

/// Settings for transactional collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnConfig {
    /// Database name used in prelock paths.
    pub db_name: String,
    /// How long the coordinator may wait for contested locks.
    pub lock_timeout: Duration,
    /// Budget for releasing a prelock on failure or cancellation paths.
    pub release_timeout: Duration,
}

impl TxnConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database name.
    pub fn with_db_name(mut self, name: impl Into<String>) -> Self {
        self.db_name = name.into();
        self
    }

    /// Sets the lock wait timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the prelock release timeout.
    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Returns the prelock path of a collection, `/<db>/<collection>`.
    pub fn pre_lock_name(&self, collection: &str) -> String {
        format!("/{}/{}", self.db_name, collection)
    }
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            db_name: "cmdb".to_string(),
            lock_timeout: Duration::from_secs(1),
            release_timeout: Duration::from_secs(3),
        }
    }
}

/// Settings for a [`DalClient`](crate::DalClient).
#[derive(Debug, Clone)]
pub struct DalConfig {
    /// Coordinator address.
    pub addr: String,
    /// Tag identifying this process in transaction records.
    pub processor: String,
    /// Transport settings.
    pub rpc: RpcClientConfig,
    /// Transactional collection settings.
    pub txn: TxnConfig,
}

impl DalConfig {
    /// Creates a configuration for the coordinator at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            processor: format!("pid-{}", std::process::id()),
            rpc: RpcClientConfig::default(),
            txn: TxnConfig::default(),
        }
    }

    /// Sets the processor tag.
    pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
        self.processor = processor.into();
        self
    }

    /// Sets the transport settings.
    pub fn with_rpc(mut self, rpc: RpcClientConfig) -> Self {
        self.rpc = rpc;
        self
    }

    /// Sets the transactional collection settings.
    pub fn with_txn(mut self, txn: TxnConfig) -> Self {
        self.txn = txn;
        self
    }
}
