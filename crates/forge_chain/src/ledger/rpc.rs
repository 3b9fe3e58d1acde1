//! JSON-RPC ledger backed by `solana-client`'s nonblocking client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use forge_core::Commitment;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
use solana_sdk::account::Account;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{Transaction, TransactionError};
use tracing::{debug, warn};

use super::{Ledger, commitment_config};
use crate::error::LedgerError;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A [`Ledger`] that talks to a cluster's JSON-RPC endpoint.
pub struct RpcLedger {
    client: RpcClient,
    confirm_timeout: Duration,
    poll_interval: Duration,
}

impl RpcLedger {
    /// Connect to `url`. Reads use `commitment`; confirmation polling gives up
    /// after `confirm_timeout`.
    pub fn new(
        url: impl Into<String>,
        request_timeout: Duration,
        commitment: Commitment,
        confirm_timeout: Duration,
    ) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(
            url.into(),
            request_timeout,
            commitment_config(commitment),
        );
        Self {
            client,
            confirm_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    fn read_commitment(&self) -> CommitmentConfig {
        self.client.commitment()
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError> {
        let response = self
            .client
            .get_account_with_commitment(address, self.read_commitment())
            .await
            .map_err(map_client_error)?;
        Ok(response.value)
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, LedgerError> {
        let response = self
            .client
            .get_balance_with_commitment(address, self.read_commitment())
            .await
            .map_err(map_client_error)?;
        Ok(response.value)
    }

    async fn minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, LedgerError> {
        self.client
            .get_minimum_balance_for_rent_exemption(data_len)
            .await
            .map_err(map_client_error)
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        self.client
            .get_latest_blockhash()
            .await
            .map_err(map_client_error)
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, LedgerError> {
        self.client
            .send_transaction(transaction)
            .await
            .map_err(map_client_error)
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> Result<(), LedgerError> {
        let started = Instant::now();
        let config = commitment_config(commitment);
        loop {
            let status = self
                .client
                .get_signature_status_with_commitment(signature, config)
                .await
                .map_err(map_client_error)?;
            let waited = started.elapsed();
            if let Some(outcome) = poll_outcome(signature, status, waited, self.confirm_timeout) {
                match &outcome {
                    Ok(()) => debug!(%signature, %commitment, elapsed = ?waited, "signature confirmed"),
                    Err(err) => warn!(%signature, ?waited, error = %err, "confirmation failed"),
                }
                return outcome;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn request_airdrop(
        &self,
        address: &Pubkey,
        lamports: u64,
    ) -> Result<Signature, LedgerError> {
        self.client
            .request_airdrop(address, lamports)
            .await
            .map_err(map_client_error)
    }
}

/// Interpret one signature status poll. `None` means keep polling.
fn poll_outcome(
    signature: &Signature,
    status: Option<Result<(), TransactionError>>,
    waited: Duration,
    timeout: Duration,
) -> Option<Result<(), LedgerError>> {
    match status {
        Some(Ok(())) => Some(Ok(())),
        Some(Err(err)) => Some(Err(LedgerError::rejected(format!(
            "transaction {signature} failed: {err}"
        )))),
        None if waited >= timeout => Some(Err(LedgerError::ConfirmationTimeout {
            signature: signature.to_string(),
            waited,
        })),
        None => None,
    }
}

/// Sort client failures into the ledger error taxonomy, keeping the
/// endpoint's diagnostic detail (preflight logs included).
fn map_client_error(err: ClientError) -> LedgerError {
    match err.kind() {
        ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => {
            LedgerError::UpstreamUnavailable(err.to_string())
        }
        ClientErrorKind::TransactionError(tx_err) => LedgerError::rejected(tx_err.to_string()),
        ClientErrorKind::SigningError(sign_err) => LedgerError::rejected(sign_err.to_string()),
        ClientErrorKind::RpcError(RpcError::RpcResponseError { message, data, .. }) => {
            let logs = match data {
                RpcResponseErrorData::SendTransactionPreflightFailure(simulation) => {
                    simulation.logs.clone().unwrap_or_default()
                }
                _ => Vec::new(),
            };
            LedgerError::TransactionRejected {
                reason: message.clone(),
                logs,
            }
        }
        _ => LedgerError::UpstreamUnavailable(err.to_string()),
    }
}
