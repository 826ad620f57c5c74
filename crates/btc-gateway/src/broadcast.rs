use chain_btc::transaction::SignedTransaction;
use tracing::info;

use crate::error::GatewayError;
use crate::gateway::NetworkGateway;

/// Broadcast `tx` and check the network echoes the txid we computed.
pub async fn broadcast(
    gateway: &dyn NetworkGateway,
    tx: &SignedTransaction,
) -> Result<String, GatewayError> {
    let txid = gateway.broadcast_transaction(&tx.hex).await?;
    if !txid.eq_ignore_ascii_case(&tx.txid) {
        return Err(GatewayError::InvalidResponse(format!(
            "gateway accepted {txid}, expected {}",
            tx.txid
        )));
    }
    info!(%txid, vsize = tx.vsize, fee_sat = tx.fee_sat, "transaction broadcast");
    Ok(txid)
}

/// Whether `txid` has at least `min_confirmations`, given the current tip.
pub async fn is_confirmed(
    gateway: &dyn NetworkGateway,
    txid: &str,
    tip_height: u32,
    min_confirmations: u32,
) -> Result<bool, GatewayError> {
    let Some(info) = gateway.get_transaction(txid).await? else {
        return Ok(false);
    };
    let confirmations = match (info.status.confirmed, info.status.block_height) {
        (true, Some(height)) if tip_height >= height => tip_height - height + 1,
        _ => 0,
    };
    Ok(confirmations >= min_confirmations)
}
