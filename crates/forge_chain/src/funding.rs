//! Keep the signing identity funded on test clusters.

use forge_core::{Cluster, Commitment};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::ledger::Ledger;

/// Top up `address` with an airdrop of `airdrop_lamports` when its balance
/// is below `min_lamports`.
///
/// Returns the airdrop signature, or `None` when no airdrop was needed or
/// the cluster has no faucet (mainnet).
pub async fn ensure_funded(
    ledger: &dyn Ledger,
    address: &Pubkey,
    cluster: Cluster,
    min_lamports: u64,
    airdrop_lamports: u64,
    commitment: Commitment,
) -> Result<Option<Signature>, LedgerError> {
    let balance = ledger.get_balance(address).await?;
    if balance >= min_lamports {
        return Ok(None);
    }
    if !cluster.allows_airdrop() {
        warn!(
            %address,
            balance,
            min_lamports,
            "Balance below minimum on {cluster}; fund the account manually"
        );
        return Ok(None);
    }

    info!(%address, balance, airdrop_lamports, "Requesting airdrop on {cluster}");
    let signature = ledger.request_airdrop(address, airdrop_lamports).await?;
    ledger.confirm_transaction(&signature, commitment).await?;
    let balance = ledger.get_balance(address).await?;
    info!(%address, %signature, balance, "Airdrop confirmed");
    Ok(Some(signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedger;

    const SOL: u64 = 1_000_000_000;

    #[tokio::test]
    async fn airdrops_below_minimum() {
        let ledger = MemoryLedger::new();
        let who = Pubkey::new_unique();
        let signature = ensure_funded(&ledger, &who, Cluster::Devnet, SOL / 2, SOL, Commitment::Confirmed)
            .await
            .unwrap();
        assert!(signature.is_some());
        assert_eq!(ledger.balance(&who), SOL);
    }

    #[tokio::test]
    async fn leaves_funded_accounts_alone() {
        let ledger = MemoryLedger::new();
        let who = Pubkey::new_unique();
        ledger.fund(&who, SOL);
        let signature = ensure_funded(&ledger, &who, Cluster::Devnet, SOL / 2, SOL, Commitment::Confirmed)
            .await
            .unwrap();
        assert!(signature.is_none());
        assert_eq!(ledger.airdrop_count(), 0);
    }

    #[tokio::test]
    async fn never_airdrops_on_mainnet() {
        let ledger = MemoryLedger::new();
        let who = Pubkey::new_unique();
        let signature = ensure_funded(
            &ledger,
            &who,
            Cluster::MainnetBeta,
            SOL / 2,
            SOL,
            Commitment::Confirmed,
        )
        .await
        .unwrap();
        assert!(signature.is_none());
        assert_eq!(ledger.airdrop_count(), 0);
    }
}
