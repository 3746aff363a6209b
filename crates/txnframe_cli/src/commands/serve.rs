//! Serve command implementation.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use txnframe_coordinator::{Coordinator, CoordinatorConfig};

/// Runs a coordinator until Ctrl-C.
pub async fn run(
    bind: SocketAddr,
    db: &str,
    max_connections: usize,
    session_ttl_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = CoordinatorConfig::new(bind)
        .with_db_name(db)
        .with_max_connections(max_connections)
        .with_session_ttl(Duration::from_secs(session_ttl_secs));

    let coordinator = Coordinator::bind(config).await?;
    println!("Coordinator listening on {}", coordinator.local_addr());

    coordinator
        .serve(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received");
            }
        })
        .await?;
    Ok(())
}
