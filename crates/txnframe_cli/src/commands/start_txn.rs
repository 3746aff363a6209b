//! Start-txn command implementation.

use txnframe_core::{Context, DalClient, DalConfig};
use txnframe_protocol::{JoinOption, TxnId};

/// Starts a transaction session and prints its id.
///
/// The session stays open until committed, aborted or reaped.
pub async fn run(
    addr: &str,
    request_id: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = DalClient::connect(DalConfig::new(addr)).await?;
    let option = JoinOption::new(TxnId::new(""), request_id, "");
    let tx = client
        .start_transaction(&Context::background(), option)
        .await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(tx.join_option())?),
        _ => println!("{}", tx.txn_id()),
    }
    client.close().await?;
    Ok(())
}
