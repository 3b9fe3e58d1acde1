//! Runs plans against a [`Ledger`].
//!
//! Every step follows the same shape: resolve or create a prerequisite,
//! submit the dependent transaction, wait for confirmation, report an
//! explorer link. Steps run strictly in order and the first failure ends the
//! run; confirmed steps are never rolled back.

pub mod plan;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use forge_core::{Cluster, Commitment};
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::explorer::{LinkKind, report_link_for};
use crate::ledger::{Ledger, require_account};
use crate::metadata::{
    MetadataAccounts, TokenMetadata, create_master_edition_ix, create_metadata_ix,
    master_edition_address, metadata_address, update_metadata_ix,
    verify_sized_collection_item_ix,
};
use crate::storage::{MetadataStorage, upload_nft_metadata};
use crate::token::{
    MINT_LEN, associated_token_address, create_associated_account_ix, create_mint_instructions,
    mint_to_ix, transfer_ix, unpack_mint, unpack_token_account,
};
use plan::{Handle, MetadataUri, NftRecord, Plan, Step, StepOutput, StepValue};

// ---------------------------------------------------------------------------
// Results and reports
// ---------------------------------------------------------------------------

/// A submitted and confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    pub signature: Signature,
    pub link: String,
}

/// A resource that [`Sequencer::resolve_or_create`] can look up or create.
#[derive(Debug, Clone)]
pub enum ResourceKey {
    /// The associated token account of `owner` for `mint`.
    AssociatedAccount { owner: Pubkey, mint: Pubkey },
    /// The metadata record of `mint`, created with `metadata` if absent.
    TokenMetadata { mint: Pubkey, metadata: TokenMetadata },
}

impl ResourceKey {
    /// The deterministic address of the resource.
    pub fn address(&self) -> Pubkey {
        match self {
            Self::AssociatedAccount { owner, mint } => associated_token_address(owner, mint),
            Self::TokenMetadata { mint, .. } => metadata_address(mint),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::AssociatedAccount { .. } => "associated token account",
            Self::TokenMetadata { .. } => "token metadata",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub index: usize,
    pub label: String,
    pub kind: &'static str,
    pub state: StepState,
    /// Last transaction sent for this step, confirmed or not.
    pub transaction: Option<TransactionResult>,
    pub output: Option<StepOutput>,
    pub error: Option<String>,
}

impl StepRecord {
    fn new(index: usize, label: &str, kind: &'static str) -> Self {
        Self {
            index,
            label: label.to_string(),
            kind,
            state: StepState::Pending,
            transaction: None,
            output: None,
            error: None,
        }
    }
}

/// Outcome of a run, step by step.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub plan: String,
    plan_id: u64,
    pub cluster: Cluster,
    /// Endpoint explorer links point at on localnet, when not the default.
    pub rpc_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
}

impl RunReport {
    fn new(plan: &Plan, cluster: Cluster, rpc_url: Option<String>) -> Self {
        Self {
            plan: plan.name().to_string(),
            plan_id: plan.id(),
            cluster,
            rpc_url,
            started_at: Utc::now(),
            finished_at: None,
            steps: plan
                .steps()
                .iter()
                .enumerate()
                .map(|(i, s)| StepRecord::new(i, &s.label, s.step.name()))
                .collect(),
        }
    }

    /// The output of the step behind `handle`, if it completed in this run.
    pub fn output<T: StepValue>(&self, handle: &Handle<T>) -> Option<T> {
        if handle.plan_id() != self.plan_id {
            return None;
        }
        self.steps
            .get(handle.step())?
            .output
            .as_ref()
            .and_then(T::from_output)
    }

    /// Records of steps that reached `Confirmed`.
    pub fn completed(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|s| s.state == StepState::Confirmed)
    }

    /// Every transaction signature the run produced, in order.
    pub fn signatures(&self) -> Vec<Signature> {
        self.steps
            .iter()
            .filter_map(|s| s.transaction.as_ref().map(|t| t.signature))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| s.state == StepState::Confirmed)
    }
}

/// A run aborted at `step`.
#[derive(Debug, thiserror::Error)]
#[error("step {step} '{label}' failed while {state_at_failure}: {source}")]
pub struct SequenceError {
    pub step: usize,
    pub label: String,
    /// `Submitted` means a transaction may have landed; re-query before retrying.
    pub state_at_failure: StepState,
    pub report: Box<RunReport>,
    pub source: LedgerError,
}

impl SequenceError {
    pub fn completed(&self) -> impl Iterator<Item = &StepRecord> {
        self.report.completed()
    }
}

// ---------------------------------------------------------------------------
// Sequencer
// ---------------------------------------------------------------------------

pub struct Sequencer {
    ledger: Arc<dyn Ledger>,
    storage: Option<Arc<dyn MetadataStorage>>,
    identity: Arc<Keypair>,
    cluster: Cluster,
    explorer_rpc_url: Option<String>,
    commitment: Commitment,
}

impl Sequencer {
    pub fn new(ledger: Arc<dyn Ledger>, identity: Arc<Keypair>, cluster: Cluster) -> Self {
        Self {
            ledger,
            storage: None,
            identity,
            cluster,
            explorer_rpc_url: None,
            commitment: Commitment::Confirmed,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn MetadataStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = commitment;
        self
    }

    /// Endpoint the explorer should query for localnet links.
    pub fn with_explorer_rpc_url(mut self, rpc_url: impl Into<String>) -> Self {
        self.explorer_rpc_url = Some(rpc_url.into());
        self
    }

    pub fn identity(&self) -> Pubkey {
        self.identity.pubkey()
    }

    pub fn cluster(&self) -> Cluster {
        self.cluster
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    /// Return the resource behind `key`, creating it first if it does not
    /// exist. At most one creation transaction is submitted.
    pub async fn resolve_or_create(&self, key: &ResourceKey) -> Result<Pubkey, LedgerError> {
        let mut scratch = StepRecord::new(0, key.describe(), "resolve");
        self.resolve_or_create_tracked(key, &mut scratch).await
    }

    /// Sign `instructions` with `signers` (the first pays the fee), send,
    /// and wait for the configured commitment.
    pub async fn submit(
        &self,
        instructions: &[Instruction],
        signers: &[&dyn Signer],
    ) -> Result<TransactionResult, LedgerError> {
        let mut scratch = StepRecord::new(0, "submit", "submit");
        self.execute_transaction(instructions, signers, self.commitment, &mut scratch)
            .await
    }

    /// Run every step of `plan` in order.
    pub async fn run(&self, plan: &Plan) -> Result<RunReport, SequenceError> {
        let mut report = RunReport::new(plan, self.cluster, self.explorer_rpc_url.clone());
        info!(plan = plan.name(), steps = plan.len(), cluster = %self.cluster, "Starting run");

        if let Err((index, err)) = plan.validate() {
            return Err(abort(report, index, err));
        }

        let mut outputs: Vec<StepOutput> = Vec::with_capacity(plan.len());
        for (index, planned) in plan.steps().iter().enumerate() {
            info!(step = index, label = %planned.label, kind = planned.step.name(), "Running step");
            match self
                .execute_step(&planned.step, &outputs, &mut report.steps[index])
                .await
            {
                Ok(output) => {
                    let record = &mut report.steps[index];
                    record.state = StepState::Confirmed;
                    record.output = Some(output.clone());
                    outputs.push(output);
                }
                Err(err) => return Err(abort(report, index, err)),
            }
        }

        report.finished_at = Some(Utc::now());
        info!(plan = plan.name(), "Run complete");
        Ok(report)
    }

    // -- Steps --------------------------------------------------------------

    async fn execute_step(
        &self,
        step: &Step,
        outputs: &[StepOutput],
        record: &mut StepRecord,
    ) -> Result<StepOutput, LedgerError> {
        match step {
            Step::CreateMint { decimals } => {
                let mint = self.create_mint(*decimals, record).await?;
                Ok(StepOutput::Address(mint))
            }
            Step::AssociatedAccount { owner, mint } => {
                let key = ResourceKey::AssociatedAccount {
                    owner: owner.resolve(outputs)?,
                    mint: mint.resolve(outputs)?,
                };
                let address = self.resolve_or_create_tracked(&key, record).await?;
                Ok(StepOutput::Address(address))
            }
            Step::TokenMetadata { mint, metadata } => {
                let key = ResourceKey::TokenMetadata {
                    mint: mint.resolve(outputs)?,
                    metadata: metadata.clone(),
                };
                let address = self.resolve_or_create_tracked(&key, record).await?;
                Ok(StepOutput::Address(address))
            }
            Step::MintTo {
                mint,
                destination,
                amount,
            } => {
                let result = self
                    .mint_to(&mint.resolve(outputs)?, &destination.resolve(outputs)?, *amount, record)
                    .await?;
                Ok(StepOutput::Transaction(result))
            }
            Step::Transfer {
                source,
                destination,
                amount,
            } => {
                let result = self
                    .transfer(&source.resolve(outputs)?, &destination.resolve(outputs)?, *amount, record)
                    .await?;
                Ok(StepOutput::Transaction(result))
            }
            Step::UploadMetadata { asset } => {
                let storage = self.storage.as_deref().ok_or_else(|| {
                    LedgerError::InvalidInput("no metadata storage configured".into())
                })?;
                let uri = upload_nft_metadata(storage, asset).await?;
                Ok(StepOutput::Uri(MetadataUri(uri)))
            }
            Step::CreateNft {
                uri,
                metadata,
                collection,
                is_collection,
            } => {
                let data = metadata.with_uri(uri.resolve(outputs)?.0);
                let collection = collection
                    .as_ref()
                    .map(|c| c.resolve(outputs))
                    .transpose()?;
                let nft = self
                    .create_nft(data, collection.as_ref(), *is_collection, record)
                    .await?;
                Ok(StepOutput::Nft(nft))
            }
            Step::VerifyCollection { nft, collection } => {
                let nft = self
                    .verify_collection(nft.resolve(outputs)?, &collection.resolve(outputs)?, record)
                    .await?;
                Ok(StepOutput::Nft(nft))
            }
            Step::UpdateNftUri { nft, uri } => {
                let result = self
                    .update_nft_uri(&nft.resolve(outputs)?, &uri.resolve(outputs)?, record)
                    .await?;
                Ok(StepOutput::Transaction(result))
            }
        }
    }

    async fn resolve_or_create_tracked(
        &self,
        key: &ResourceKey,
        record: &mut StepRecord,
    ) -> Result<Pubkey, LedgerError> {
        let address = key.address();
        if self.ledger.get_account(&address).await?.is_some() {
            info!(%address, "{} already exists", key.describe());
            return Ok(address);
        }

        let payer = self.identity.pubkey();
        let instruction = match key {
            ResourceKey::AssociatedAccount { owner, mint } => {
                let account = require_account(self.ledger.as_ref(), mint, "mint").await?;
                unpack_mint(mint, &account)?;
                create_associated_account_ix(&payer, owner, mint)
            }
            ResourceKey::TokenMetadata { mint, metadata } => {
                metadata.validate()?;
                let account = require_account(self.ledger.as_ref(), mint, "mint").await?;
                unpack_mint(mint, &account)?;
                let accounts = MetadataAccounts {
                    mint: *mint,
                    mint_authority: payer,
                    payer,
                    update_authority: payer,
                };
                create_metadata_ix(&accounts, metadata, None, false)
            }
        };

        info!(%address, "Creating {}", key.describe());
        self.execute_transaction(&[instruction], &[self.signer()], self.commitment, record)
            .await?;
        Ok(address)
    }

    async fn create_mint(&self, decimals: u8, record: &mut StepRecord) -> Result<Pubkey, LedgerError> {
        let payer = self.identity.pubkey();
        let mint = Keypair::new();
        let rent = self.ledger.minimum_balance_for_rent_exemption(MINT_LEN).await?;
        let instructions = create_mint_instructions(&payer, &mint.pubkey(), &payer, decimals, rent)?;
        self.execute_transaction(&instructions, &[self.signer(), &mint], self.commitment, record)
            .await?;
        info!(mint = %mint.pubkey(), decimals, "Mint created");
        Ok(mint.pubkey())
    }

    async fn mint_to(
        &self,
        mint: &Pubkey,
        destination: &Pubkey,
        amount: u64,
        record: &mut StepRecord,
    ) -> Result<TransactionResult, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput("mint amount must be positive".into()));
        }
        let mint_account = require_account(self.ledger.as_ref(), mint, "mint").await?;
        unpack_mint(mint, &mint_account)?;
        let account = require_account(self.ledger.as_ref(), destination, "token account").await?;
        let holder = unpack_token_account(destination, &account)?;
        if holder.mint != *mint {
            return Err(LedgerError::InvalidInput(format!(
                "token account {destination} holds mint {}, not {mint}",
                holder.mint
            )));
        }

        let instruction = mint_to_ix(mint, destination, &self.identity.pubkey(), amount)?;
        self.execute_transaction(&[instruction], &[self.signer()], self.commitment, record)
            .await
    }

    async fn transfer(
        &self,
        source: &Pubkey,
        destination: &Pubkey,
        amount: u64,
        record: &mut StepRecord,
    ) -> Result<TransactionResult, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidInput("transfer amount must be positive".into()));
        }
        let ledger = self.ledger.as_ref();
        let from = unpack_token_account(source, &require_account(ledger, source, "token account").await?)?;
        let to = unpack_token_account(
            destination,
            &require_account(ledger, destination, "token account").await?,
        )?;
        if from.mint != to.mint {
            return Err(LedgerError::InvalidInput(format!(
                "{source} and {destination} hold different mints"
            )));
        }
        let mint = unpack_mint(&from.mint, &require_account(ledger, &from.mint, "mint").await?)?;

        let instruction = transfer_ix(
            source,
            &from.mint,
            destination,
            &self.identity.pubkey(),
            amount,
            mint.decimals,
        )?;
        self.execute_transaction(&[instruction], &[self.signer()], self.commitment, record)
            .await
    }

    /// Mint, token account, one unit, metadata and master edition in a
    /// single transaction.
    async fn create_nft(
        &self,
        data: TokenMetadata,
        collection: Option<&NftRecord>,
        is_collection: bool,
        record: &mut StepRecord,
    ) -> Result<NftRecord, LedgerError> {
        data.validate()?;
        if let Some(parent) = collection {
            require_account(self.ledger.as_ref(), &parent.metadata, "collection metadata").await?;
        }

        let payer = self.identity.pubkey();
        let mint = Keypair::new();
        let mint_key = mint.pubkey();
        let token_account = associated_token_address(&payer, &mint_key);
        let rent = self.ledger.minimum_balance_for_rent_exemption(MINT_LEN).await?;
        let accounts = MetadataAccounts {
            mint: mint_key,
            mint_authority: payer,
            payer,
            update_authority: payer,
        };
        let collection_mint = collection.map(|c| c.mint);

        let mut instructions = create_mint_instructions(&payer, &mint_key, &payer, 0, rent)?;
        instructions.push(create_associated_account_ix(&payer, &payer, &mint_key));
        instructions.push(mint_to_ix(&mint_key, &token_account, &payer, 1)?);
        instructions.push(create_metadata_ix(
            &accounts,
            &data,
            collection_mint.as_ref(),
            is_collection,
        ));
        instructions.push(create_master_edition_ix(&accounts));

        self.execute_transaction(&instructions, &[self.signer(), &mint], Commitment::Finalized, record)
            .await?;
        info!(mint = %mint_key, name = %data.name, "NFT created");

        Ok(NftRecord {
            mint: mint_key,
            token_account,
            metadata: metadata_address(&mint_key),
            master_edition: master_edition_address(&mint_key),
            data,
            collection: collection_mint,
            collection_verified: false,
        })
    }

    async fn verify_collection(
        &self,
        nft: NftRecord,
        collection: &NftRecord,
        record: &mut StepRecord,
    ) -> Result<NftRecord, LedgerError> {
        if nft.collection != Some(collection.mint) {
            return Err(LedgerError::InvalidInput(format!(
                "NFT {} was not created as a member of collection {}",
                nft.mint, collection.mint
            )));
        }
        require_account(self.ledger.as_ref(), &nft.metadata, "NFT metadata").await?;

        let payer = self.identity.pubkey();
        let instruction = verify_sized_collection_item_ix(&nft.mint, &collection.mint, &payer, &payer);
        self.execute_transaction(&[instruction], &[self.signer()], Commitment::Finalized, record)
            .await?;
        info!(nft = %nft.mint, collection = %collection.mint, "Collection membership verified");

        Ok(NftRecord {
            collection_verified: true,
            ..nft
        })
    }

    async fn update_nft_uri(
        &self,
        nft: &NftRecord,
        uri: &MetadataUri,
        record: &mut StepRecord,
    ) -> Result<TransactionResult, LedgerError> {
        require_account(self.ledger.as_ref(), &nft.metadata, "NFT metadata").await?;
        let data = nft.data.with_uri(uri.0.clone());
        data.validate()?;

        let instruction = update_metadata_ix(
            &nft.mint,
            &self.identity.pubkey(),
            &data,
            nft.collection.map(|c| (c, nft.collection_verified)),
        );
        let result = self
            .execute_transaction(&[instruction], &[self.signer()], Commitment::Finalized, record)
            .await?;
        info!(nft = %nft.mint, %uri, "NFT metadata URI updated");
        Ok(result)
    }

    // -- Transactions -------------------------------------------------------

    fn signer(&self) -> &dyn Signer {
        &*self.identity
    }

    async fn execute_transaction(
        &self,
        instructions: &[Instruction],
        signers: &[&dyn Signer],
        commitment: Commitment,
        record: &mut StepRecord,
    ) -> Result<TransactionResult, LedgerError> {
        let payer = signers
            .first()
            .map(|s| s.pubkey())
            .ok_or_else(|| LedgerError::rejected("no signers for transaction"))?;

        let blockhash = self.ledger.latest_blockhash().await?;
        let mut transaction = Transaction::new_with_payer(instructions, Some(&payer));
        transaction
            .try_sign(signers, blockhash)
            .map_err(|e| LedgerError::rejected(format!("signing failed: {e}")))?;

        let signature = self.ledger.send_transaction(&transaction).await?;
        let result = TransactionResult {
            signature,
            link: report_link_for(
                LinkKind::Transaction,
                &signature.to_string(),
                self.cluster,
                self.explorer_rpc_url.as_deref(),
            ),
        };
        record.state = StepState::Submitted;
        record.transaction = Some(result.clone());
        debug!(%signature, %commitment, "Transaction submitted");

        self.ledger.confirm_transaction(&signature, commitment).await?;
        info!(%signature, link = %result.link, "Transaction confirmed");
        Ok(result)
    }
}

fn abort(mut report: RunReport, index: usize, err: LedgerError) -> SequenceError {
    let (label, state_at_failure) = match report.steps.get_mut(index) {
        Some(record) => {
            let state = record.state;
            record.state = StepState::Failed;
            record.error = Some(err.to_string());
            (record.label.clone(), state)
        }
        None => (String::new(), StepState::Pending),
    };
    report.finished_at = Some(Utc::now());
    warn!(step = index, %label, %state_at_failure, error = %err, "Run aborted");
    if !err.logs().is_empty() {
        warn!(logs = ?err.logs(), "Program logs");
    }
    SequenceError {
        step: index,
        label,
        state_at_failure,
        report: Box::new(report),
        source: err,
    }
}
