//! Ping command implementation.

use std::time::Instant;
use txnframe_core::{DalClient, DalConfig};

/// Pings a coordinator and prints the round-trip time.
pub async fn run(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let client = DalClient::connect(DalConfig::new(addr)).await?;
    println!("{} answered in {:?}", addr, started.elapsed());
    client.close().await?;
    Ok(())
}
