//! Coordinator server.

use crate::config::CoordinatorConfig;
use crate::error::CoordinatorResult;
use crate::service::TxnService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};
use txnframe_rpc::RpcServer;
use txnframe_store::MemoryDatabase;

/// The transaction coordinator.
///
/// Serves the lock service and the `DBOperation` command over TCP, and
/// periodically aborts idle sessions.
///
/// # Example
///
/// ```no_run
/// use txnframe_coordinator::{Coordinator, CoordinatorConfig};
///
/// # async fn demo() -> txnframe_coordinator::CoordinatorResult<()> {
/// let coordinator = Coordinator::bind(CoordinatorConfig::default()).await?;
/// println!("listening on {}", coordinator.local_addr());
/// coordinator.serve(async {
///     let _ = tokio::signal::ctrl_c().await;
/// }).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Coordinator {
    config: CoordinatorConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    service: Arc<TxnService>,
}

impl Coordinator {
    /// Binds the listener and creates an empty database.
    pub async fn bind(config: CoordinatorConfig) -> CoordinatorResult<Self> {
        let db = MemoryDatabase::new(config.db_name.clone());
        Self::bind_with(config, db).await
    }

    /// Binds the listener and serves an existing database.
    pub async fn bind_with(
        config: CoordinatorConfig,
        db: MemoryDatabase,
    ) -> CoordinatorResult<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let processor = config.processor_for(local_addr);
        info!(%local_addr, db = db.name(), %processor, "coordinator bound");
        Ok(Self {
            service: Arc::new(TxnService::new(db, processor)),
            config,
            listener,
            local_addr,
        })
    }

    /// Address the coordinator listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared coordinator state.
    pub fn service(&self) -> &Arc<TxnService> {
        &self.service
    }

    /// Serves until `shutdown` completes.
    pub async fn serve<F>(self, shutdown: F) -> CoordinatorResult<()>
    where
        F: Future<Output = ()>,
    {
        let router = self.service.router();
        let server = RpcServer::new(router, self.config.rpc.clone());
        let reaper = tokio::spawn(reap_loop(
            Arc::clone(&self.service),
            self.config.session_ttl,
            self.config.reap_interval,
        ));

        let result = server.serve(self.listener, shutdown).await;
        reaper.abort();
        info!(addr = %self.local_addr, "coordinator stopped");
        result?;
        Ok(())
    }
}

async fn reap_loop(service: Arc<TxnService>, ttl: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let reaped = service.reap(ttl);
        if reaped > 0 {
            debug!(reaped, "reaped idle sessions");
        }
    }
}
