//! The remote ledger as seen by the sequencer.
//!
//! [`Ledger`] is the seam between plan execution and the network:
//! [`rpc::RpcLedger`] talks JSON-RPC to a cluster, [`memory::MemoryLedger`]
//! keeps accounts in-process for tests and dry runs.

pub mod memory;
pub mod rpc;

use async_trait::async_trait;
use forge_core::Commitment;
use solana_sdk::account::Account;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;

use crate::error::LedgerError;

/// Operations the sequencer needs from a ledger endpoint.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Fetch an account, `None` when it does not exist.
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError>;

    /// Lamport balance of an address (0 for a missing account).
    async fn get_balance(&self, address: &Pubkey) -> Result<u64, LedgerError>;

    /// Lamports an account of `data_len` bytes needs to be rent exempt.
    async fn minimum_balance_for_rent_exemption(&self, data_len: usize)
    -> Result<u64, LedgerError>;

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError>;

    /// Submit a signed transaction and return its signature.
    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, LedgerError>;

    /// Wait until `signature` reaches `commitment`, or fail.
    async fn confirm_transaction(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> Result<(), LedgerError>;

    /// Ask the cluster faucet for lamports. Not available on mainnet.
    async fn request_airdrop(&self, address: &Pubkey, lamports: u64)
    -> Result<Signature, LedgerError>;
}

/// Fetch an account that a step depends on, failing with
/// [`LedgerError::ResourceNotFound`] when it is absent.
pub async fn require_account(
    ledger: &dyn Ledger,
    address: &Pubkey,
    what: &str,
) -> Result<Account, LedgerError> {
    ledger
        .get_account(address)
        .await?
        .ok_or_else(|| LedgerError::ResourceNotFound(format!("{what} {address}")))
}

pub fn commitment_config(commitment: Commitment) -> CommitmentConfig {
    match commitment {
        Commitment::Processed => CommitmentConfig::processed(),
        Commitment::Confirmed => CommitmentConfig::confirmed(),
        Commitment::Finalized => CommitmentConfig::finalized(),
    }
}
