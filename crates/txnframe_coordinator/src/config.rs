//! Coordinator configuration.

use std::net::SocketAddr;
use std::time::Duration;
use txnframe_rpc::RpcServerConfig;

/// Configuration for the coordinator server.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Name of the served database.
    pub db_name: String,
    /// Processor tag stamped on started transactions.
    /// Defaults to `<local addr>-<pid>` once bound.
    pub processor: Option<String>,
    /// Idle time after which a session is aborted.
    pub session_ttl: Duration,
    /// How often idle sessions and lock owners are reaped.
    pub reap_interval: Duration,
    /// Transport settings.
    pub rpc: RpcServerConfig,
}

impl CoordinatorConfig {
    /// Creates a new coordinator configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            db_name: "cmdb".to_string(),
            processor: None,
            session_ttl: Duration::from_secs(300),
            reap_interval: Duration::from_secs(10),
            rpc: RpcServerConfig::default(),
        }
    }

    /// Sets the database name.
    pub fn with_db_name(mut self, name: impl Into<String>) -> Self {
        self.db_name = name.into();
        self
    }

    /// Sets the processor tag.
    pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
        self.processor = Some(processor.into());
        self
    }

    /// Sets the session idle timeout.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Sets the reaper interval.
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.rpc = self.rpc.with_max_connections(max);
        self
    }

    /// Sets the transport settings.
    pub fn with_rpc(mut self, rpc: RpcServerConfig) -> Self {
        self.rpc = rpc;
        self
    }

    /// Processor tag for a server bound to `local_addr`.
    pub fn processor_for(&self, local_addr: SocketAddr) -> String {
        match &self.processor {
            Some(processor) => processor.clone(),
            None => format!("{}-{}", local_addr, std::process::id()),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 7070)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.db_name, "cmdb");
        assert_eq!(config.rpc.max_connections, 1000);
        assert_eq!(config.bind_addr.port(), 7070);
    }

    #[test]
    fn config_builder() {
        let config = CoordinatorConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_db_name("inventory")
            .with_max_connections(8)
            .with_session_ttl(Duration::from_secs(5));

        assert_eq!(config.db_name, "inventory");
        assert_eq!(config.rpc.max_connections, 8);
        assert_eq!(config.session_ttl, Duration::from_secs(5));
    }

    #[test]
    fn processor_defaults_to_address_and_pid() {
        let config = CoordinatorConfig::default();
        let addr: SocketAddr = "10.0.0.1:7070".parse().unwrap();
        let tag = config.processor_for(addr);
        assert!(tag.starts_with("10.0.0.1:7070-"));

        let config = config.with_processor("node-a");
        assert_eq!(config.processor_for(addr), "node-a");
    }
}
