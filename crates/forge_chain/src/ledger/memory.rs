//! In-process ledger.
//!
//! Executes the subset of system, SPL token, associated token account and
//! token metadata instructions this crate builds, atomically per
//! transaction, with fee and signature checks. Token metadata accounts hold
//! a [`MetadataRecord`] (mint, update authority, URI and collection
//! membership) rather than the program's full on-chain layout.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use forge_core::Commitment;
use parking_lot::Mutex;
use solana_sdk::account::Account;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::rent::Rent;
use solana_sdk::signature::Signature;
use solana_sdk::system_instruction::SystemInstruction;
use solana_sdk::system_program;
use solana_sdk::transaction::Transaction;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use spl_token::instruction::TokenInstruction;
use spl_token::solana_program::program_option::COption;
use spl_token::solana_program::program_pack::{IsInitialized, Pack};
use spl_token::state::{Account as TokenAccount, AccountState, Mint};
use tracing::debug;

use super::Ledger;
use crate::error::LedgerError;
use crate::metadata::{master_edition_address, metadata_address};

/// Flat fee charged per required signature.
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

const CREATE_METADATA_ACCOUNT_V3: u8 = 33;
const CREATE_MASTER_EDITION_V3: u8 = 17;
const UPDATE_METADATA_ACCOUNT_V2: u8 = 15;
const VERIFY_SIZED_COLLECTION_ITEM: u8 = 30;

#[derive(Default)]
struct State {
    accounts: HashMap<Pubkey, Account>,
    confirmed: HashSet<Signature>,
    submitted: Vec<Signature>,
    airdrops: usize,
    unreachable: bool,
    stall_confirmations: bool,
}

/// A [`Ledger`] held entirely in memory.
pub struct MemoryLedger {
    state: Mutex<State>,
    blockhash: Hash,
    rent: Rent,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            blockhash: Hash::new_unique(),
            rent: Rent::default(),
        }
    }

    // -- Fixtures -----------------------------------------------------------

    /// Credit lamports to a system account, creating it if needed.
    pub fn fund(&self, address: &Pubkey, lamports: u64) {
        let mut state = self.state.lock();
        credit(&mut state.accounts, address, lamports);
    }

    /// Provision an initialized mint owned by the token program.
    pub fn add_mint(&self, mint: &Pubkey, authority: &Pubkey, decimals: u8) {
        let mut data = vec![0u8; Mint::LEN];
        let state = Mint {
            mint_authority: COption::Some(*authority),
            supply: 0,
            decimals,
            is_initialized: true,
            freeze_authority: COption::None,
        };
        state.pack_into_slice(&mut data);
        let account = Account {
            lamports: self.rent.minimum_balance(Mint::LEN),
            data,
            owner: spl_token::id(),
            executable: false,
            rent_epoch: 0,
        };
        self.state.lock().accounts.insert(*mint, account);
    }

    /// Provision the associated token account of `owner` for `mint`.
    pub fn add_token_account(&self, owner: &Pubkey, mint: &Pubkey, amount: u64) -> Pubkey {
        let address = get_associated_token_address_with_program_id(owner, mint, &spl_token::id());
        let account = token_account(&self.rent, mint, owner, amount);
        self.state.lock().accounts.insert(address, account);
        address
    }

    // -- Inspection ---------------------------------------------------------

    pub fn account(&self, address: &Pubkey) -> Option<Account> {
        self.state.lock().accounts.get(address).cloned()
    }

    pub fn balance(&self, address: &Pubkey) -> u64 {
        self.account(address).map_or(0, |a| a.lamports)
    }

    /// Token balance of a token account, `None` if it is not one.
    pub fn token_balance(&self, address: &Pubkey) -> Option<u64> {
        let account = self.account(address)?;
        TokenAccount::unpack(&account.data).ok().map(|t| t.amount)
    }

    pub fn mint_supply(&self, mint: &Pubkey) -> Option<u64> {
        let account = self.account(mint)?;
        Mint::unpack(&account.data).ok().map(|m| m.supply)
    }

    pub fn submitted_count(&self) -> usize {
        self.state.lock().submitted.len()
    }

    /// Decoded token metadata record at `address`.
    pub fn metadata_record(&self, address: &Pubkey) -> Option<MetadataRecord> {
        let state = self.state.lock();
        load_metadata(&state.accounts, address).ok()
    }

    pub fn airdrop_count(&self) -> usize {
        self.state.lock().airdrops
    }

    // -- Failure injection --------------------------------------------------

    /// Make every call fail with [`LedgerError::UpstreamUnavailable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Accept transactions but never report them confirmed.
    pub fn stall_confirmations(&self, stall: bool) {
        self.state.lock().stall_confirmations = stall;
    }

    fn check_reachable(state: &State) -> Result<(), LedgerError> {
        if state.unreachable {
            return Err(LedgerError::UpstreamUnavailable(
                "memory ledger is marked unreachable".into(),
            ));
        }
        Ok(())
    }

    // -- Execution ----------------------------------------------------------

    fn execute(
        &self,
        accounts: &mut HashMap<Pubkey, Account>,
        ix: &DecodedInstruction<'_>,
    ) -> Result<(), String> {
        if ix.program_id == system_program::id() {
            execute_system(accounts, ix)
        } else if ix.program_id == spl_token::id() {
            execute_token(accounts, ix)
        } else if ix.program_id == spl_associated_token_account::id() {
            execute_associated_token(accounts, ix, &self.rent)
        } else if ix.program_id == mpl_token_metadata::ID {
            execute_token_metadata(accounts, ix, &self.rent)
        } else {
            Err(format!("unsupported program {}", ix.program_id))
        }
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError> {
        let state = self.state.lock();
        Self::check_reachable(&state)?;
        Ok(state.accounts.get(address).cloned())
    }

    async fn get_balance(&self, address: &Pubkey) -> Result<u64, LedgerError> {
        let state = self.state.lock();
        Self::check_reachable(&state)?;
        Ok(state.accounts.get(address).map_or(0, |a| a.lamports))
    }

    async fn minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, LedgerError> {
        Self::check_reachable(&self.state.lock())?;
        Ok(self.rent.minimum_balance(data_len))
    }

    async fn latest_blockhash(&self) -> Result<Hash, LedgerError> {
        Self::check_reachable(&self.state.lock())?;
        Ok(self.blockhash)
    }

    async fn send_transaction(&self, transaction: &Transaction) -> Result<Signature, LedgerError> {
        let mut state = self.state.lock();
        Self::check_reachable(&state)?;

        transaction
            .verify()
            .map_err(|e| LedgerError::rejected(format!("signature verification failed: {e}")))?;
        let signature = *transaction
            .signatures
            .first()
            .ok_or_else(|| LedgerError::rejected("transaction has no signatures"))?;
        if state.confirmed.contains(&signature) {
            return Err(LedgerError::rejected(
                "This transaction has already been processed",
            ));
        }

        let message = &transaction.message;
        let fee_payer = *message
            .account_keys
            .first()
            .ok_or_else(|| LedgerError::rejected("transaction has no fee payer"))?;
        let fee = LAMPORTS_PER_SIGNATURE * u64::from(message.header.num_required_signatures);

        let mut working = state.accounts.clone();
        debit(&mut working, &fee_payer, fee)
            .map_err(|_| LedgerError::rejected("insufficient funds for fee"))?;

        for (index, ix) in decode_instructions(transaction)?.iter().enumerate() {
            self.execute(&mut working, ix).map_err(|reason| {
                LedgerError::TransactionRejected {
                    reason: format!("instruction {index}: {reason}"),
                    logs: vec![
                        format!("Program {} invoke [1]", ix.program_id),
                        format!("Program {} failed: {reason}", ix.program_id),
                    ],
                }
            })?;
        }

        state.accounts = working;
        state.confirmed.insert(signature);
        state.submitted.push(signature);
        debug!(%signature, fee, "memory ledger accepted transaction");
        Ok(signature)
    }

    async fn confirm_transaction(
        &self,
        signature: &Signature,
        _commitment: Commitment,
    ) -> Result<(), LedgerError> {
        let state = self.state.lock();
        Self::check_reachable(&state)?;
        if state.stall_confirmations || !state.confirmed.contains(signature) {
            return Err(LedgerError::ConfirmationTimeout {
                signature: signature.to_string(),
                waited: std::time::Duration::ZERO,
            });
        }
        Ok(())
    }

    async fn request_airdrop(
        &self,
        address: &Pubkey,
        lamports: u64,
    ) -> Result<Signature, LedgerError> {
        let mut state = self.state.lock();
        Self::check_reachable(&state)?;
        credit(&mut state.accounts, address, lamports);
        let signature = Signature::new_unique();
        state.confirmed.insert(signature);
        state.airdrops += 1;
        Ok(signature)
    }
}

// ---------------------------------------------------------------------------
// Instruction decoding
// ---------------------------------------------------------------------------

struct DecodedInstruction<'a> {
    program_id: Pubkey,
    keys: Vec<Pubkey>,
    signers: Vec<bool>,
    data: &'a [u8],
}

impl DecodedInstruction<'_> {
    fn key(&self, index: usize) -> Result<Pubkey, String> {
        self.keys
            .get(index)
            .copied()
            .ok_or_else(|| format!("missing account #{index}"))
    }

    fn require_signer(&self, index: usize) -> Result<Pubkey, String> {
        let key = self.key(index)?;
        if !self.signers.get(index).copied().unwrap_or(false) {
            return Err(format!("missing required signature for {key}"));
        }
        Ok(key)
    }
}

fn decode_instructions(transaction: &Transaction) -> Result<Vec<DecodedInstruction<'_>>, LedgerError> {
    let message = &transaction.message;
    let lookup = |index: u8| {
        message
            .account_keys
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| LedgerError::rejected(format!("account index {index} out of range")))
    };

    message
        .instructions
        .iter()
        .map(|compiled| {
            let program_id = lookup(compiled.program_id_index)?;
            let keys = compiled
                .accounts
                .iter()
                .map(|&i| lookup(i))
                .collect::<Result<Vec<_>, _>>()?;
            let signers = compiled
                .accounts
                .iter()
                .map(|&i| message.is_signer(usize::from(i)))
                .collect();
            Ok(DecodedInstruction {
                program_id,
                keys,
                signers,
                data: &compiled.data,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Account helpers
// ---------------------------------------------------------------------------

fn credit(accounts: &mut HashMap<Pubkey, Account>, address: &Pubkey, lamports: u64) {
    let account = accounts.entry(*address).or_insert_with(|| Account {
        lamports: 0,
        data: Vec::new(),
        owner: system_program::id(),
        executable: false,
        rent_epoch: 0,
    });
    account.lamports = account.lamports.saturating_add(lamports);
}

fn debit(
    accounts: &mut HashMap<Pubkey, Account>,
    address: &Pubkey,
    lamports: u64,
) -> Result<(), String> {
    let account = accounts
        .get_mut(address)
        .ok_or_else(|| format!("account {address} has no record of a prior credit"))?;
    account.lamports = account.lamports.checked_sub(lamports).ok_or_else(|| {
        format!(
            "insufficient lamports in {address}: {} < {lamports}",
            account.lamports
        )
    })?;
    Ok(())
}

fn token_account(rent: &Rent, mint: &Pubkey, owner: &Pubkey, amount: u64) -> Account {
    let mut data = vec![0u8; TokenAccount::LEN];
    let state = TokenAccount {
        mint: *mint,
        owner: *owner,
        amount,
        delegate: COption::None,
        state: AccountState::Initialized,
        is_native: COption::None,
        delegated_amount: 0,
        close_authority: COption::None,
    };
    state.pack_into_slice(&mut data);
    Account {
        lamports: rent.minimum_balance(TokenAccount::LEN),
        data,
        owner: spl_token::id(),
        executable: false,
        rent_epoch: 0,
    }
}

fn load_state<T: Pack + IsInitialized>(
    accounts: &HashMap<Pubkey, Account>,
    address: &Pubkey,
    what: &str,
) -> Result<T, String> {
    let account = accounts
        .get(address)
        .ok_or_else(|| format!("{what} {address} not found"))?;
    if account.owner != spl_token::id() {
        return Err(format!("{what} {address} is not owned by the token program"));
    }
    T::unpack(&account.data).map_err(|e| format!("invalid {what} {address}: {e}"))
}

fn store_state<T: Pack>(
    accounts: &mut HashMap<Pubkey, Account>,
    address: &Pubkey,
    state: T,
) -> Result<(), String> {
    let account = accounts
        .get_mut(address)
        .ok_or_else(|| format!("account {address} not found"))?;
    T::pack(state, &mut account.data).map_err(|e| format!("cannot store {address}: {e}"))
}

// ---------------------------------------------------------------------------
// Programs
// ---------------------------------------------------------------------------

fn execute_system(
    accounts: &mut HashMap<Pubkey, Account>,
    ix: &DecodedInstruction<'_>,
) -> Result<(), String> {
    let instruction: SystemInstruction = bincode::deserialize(ix.data)
        .map_err(|e| format!("invalid system instruction: {e}"))?;
    match instruction {
        SystemInstruction::CreateAccount {
            lamports,
            space,
            owner,
        } => {
            let from = ix.require_signer(0)?;
            let to = ix.require_signer(1)?;
            if accounts.contains_key(&to) {
                return Err(format!("account {to} already in use"));
            }
            debit(accounts, &from, lamports)?;
            let space = usize::try_from(space).map_err(|_| format!("space {space} too large"))?;
            accounts.insert(
                to,
                Account {
                    lamports,
                    data: vec![0; space],
                    owner,
                    executable: false,
                    rent_epoch: 0,
                },
            );
            Ok(())
        }
        SystemInstruction::Transfer { lamports } => {
            let from = ix.require_signer(0)?;
            let to = ix.key(1)?;
            debit(accounts, &from, lamports)?;
            credit(accounts, &to, lamports);
            Ok(())
        }
        other => Err(format!("unsupported system instruction {other:?}")),
    }
}

fn execute_token(
    accounts: &mut HashMap<Pubkey, Account>,
    ix: &DecodedInstruction<'_>,
) -> Result<(), String> {
    let instruction =
        TokenInstruction::unpack(ix.data).map_err(|e| format!("invalid token instruction: {e}"))?;
    match instruction {
        TokenInstruction::InitializeMint {
            decimals,
            mint_authority,
            freeze_authority,
        }
        | TokenInstruction::InitializeMint2 {
            decimals,
            mint_authority,
            freeze_authority,
        } => {
            let mint = ix.key(0)?;
            let account = accounts
                .get(&mint)
                .ok_or_else(|| format!("mint {mint} not found"))?;
            if account.owner != spl_token::id() || account.data.len() != Mint::LEN {
                return Err(format!("account {mint} is not a token mint"));
            }
            let existing = Mint::unpack_unchecked(&account.data)
                .map_err(|e| format!("invalid mint {mint}: {e}"))?;
            if existing.is_initialized {
                return Err(format!("mint {mint} already initialized"));
            }
            let state = Mint {
                mint_authority: COption::Some(mint_authority),
                supply: 0,
                decimals,
                is_initialized: true,
                freeze_authority,
            };
            store_state(accounts, &mint, state)
        }
        TokenInstruction::MintTo { amount } => mint_to(accounts, ix, amount, None),
        TokenInstruction::MintToChecked { amount, decimals } => {
            mint_to(accounts, ix, amount, Some(decimals))
        }
        TokenInstruction::Transfer { amount } => transfer(accounts, ix, amount, None),
        TokenInstruction::TransferChecked { amount, decimals } => {
            transfer(accounts, ix, amount, Some(decimals))
        }
        other => Err(format!("unsupported token instruction {other:?}")),
    }
}

fn mint_to(
    accounts: &mut HashMap<Pubkey, Account>,
    ix: &DecodedInstruction<'_>,
    amount: u64,
    expected_decimals: Option<u8>,
) -> Result<(), String> {
    let mint_key = ix.key(0)?;
    let destination_key = ix.key(1)?;
    let authority = ix.require_signer(2)?;

    let mut mint: Mint = load_state(accounts, &mint_key, "mint")?;
    if mint.mint_authority != COption::Some(authority) {
        return Err(format!("{authority} is not the mint authority of {mint_key}"));
    }
    if expected_decimals.is_some_and(|d| d != mint.decimals) {
        return Err("mint decimals mismatch".into());
    }
    let mut destination: TokenAccount = load_state(accounts, &destination_key, "token account")?;
    if destination.mint != mint_key {
        return Err(format!("{destination_key} does not hold mint {mint_key}"));
    }

    destination.amount = destination
        .amount
        .checked_add(amount)
        .ok_or("token account balance overflow")?;
    mint.supply = mint.supply.checked_add(amount).ok_or("mint supply overflow")?;
    store_state(accounts, &destination_key, destination)?;
    store_state(accounts, &mint_key, mint)
}

fn transfer(
    accounts: &mut HashMap<Pubkey, Account>,
    ix: &DecodedInstruction<'_>,
    amount: u64,
    checked_decimals: Option<u8>,
) -> Result<(), String> {
    // TransferChecked carries the mint between source and destination.
    let (source_key, destination_key, owner) = match checked_decimals {
        Some(_) => (ix.key(0)?, ix.key(2)?, ix.require_signer(3)?),
        None => (ix.key(0)?, ix.key(1)?, ix.require_signer(2)?),
    };

    let mut source: TokenAccount = load_state(accounts, &source_key, "token account")?;
    let mut destination: TokenAccount = load_state(accounts, &destination_key, "token account")?;
    if source.owner != owner {
        return Err(format!("{owner} does not own {source_key}"));
    }
    if source.mint != destination.mint {
        return Err("source and destination hold different mints".into());
    }
    if let Some(decimals) = checked_decimals {
        let mint: Mint = load_state(accounts, &source.mint, "mint")?;
        if mint.decimals != decimals {
            return Err("mint decimals mismatch".into());
        }
    }
    if source_key == destination_key {
        return Ok(());
    }

    source.amount = source
        .amount
        .checked_sub(amount)
        .ok_or_else(|| format!("insufficient funds: {} < {amount}", source.amount))?;
    destination.amount = destination
        .amount
        .checked_add(amount)
        .ok_or("token account balance overflow")?;
    store_state(accounts, &source_key, source)?;
    store_state(accounts, &destination_key, destination)
}

fn execute_associated_token(
    accounts: &mut HashMap<Pubkey, Account>,
    ix: &DecodedInstruction<'_>,
    rent: &Rent,
) -> Result<(), String> {
    let idempotent = match ix.data {
        [] | [0] => false,
        [1] => true,
        _ => return Err("unsupported associated token instruction".into()),
    };
    let payer = ix.require_signer(0)?;
    let address = ix.key(1)?;
    let wallet = ix.key(2)?;
    let mint = ix.key(3)?;
    let token_program = ix.key(5)?;

    if address != get_associated_token_address_with_program_id(&wallet, &mint, &token_program) {
        return Err(format!("{address} is not the associated account of {wallet} for {mint}"));
    }
    let _: Mint = load_state(accounts, &mint, "mint")?;

    if let Some(existing) = accounts.get(&address) {
        if idempotent {
            let state = TokenAccount::unpack(&existing.data)
                .map_err(|e| format!("invalid token account {address}: {e}"))?;
            if state.owner == wallet && state.mint == mint {
                return Ok(());
            }
        }
        return Err(format!("account {address} already in use"));
    }

    let account = token_account(rent, &mint, &wallet, 0);
    debit(accounts, &payer, account.lamports)?;
    accounts.insert(address, account);
    Ok(())
}

fn execute_token_metadata(
    accounts: &mut HashMap<Pubkey, Account>,
    ix: &DecodedInstruction<'_>,
    rent: &Rent,
) -> Result<(), String> {
    let (&discriminator, args) = ix
        .data
        .split_first()
        .ok_or("empty token metadata instruction")?;
    match discriminator {
        CREATE_METADATA_ACCOUNT_V3 => create_metadata(accounts, ix, args, rent),
        CREATE_MASTER_EDITION_V3 => create_master_edition(accounts, ix, rent),
        VERIFY_SIZED_COLLECTION_ITEM => verify_sized_collection_item(accounts, ix),
        UPDATE_METADATA_ACCOUNT_V2 => update_metadata(accounts, ix, args),
        other => Err(format!("unsupported token metadata instruction {other}")),
    }
}

fn create_metadata(
    accounts: &mut HashMap<Pubkey, Account>,
    ix: &DecodedInstruction<'_>,
    args: &[u8],
    rent: &Rent,
) -> Result<(), String> {
    let metadata = ix.key(0)?;
    let mint_key = ix.key(1)?;
    let authority = ix.require_signer(2)?;
    let payer = ix.require_signer(3)?;
    let update_authority = ix.key(4)?;
    if metadata != metadata_address(&mint_key) {
        return Err(format!("{metadata} is not the metadata address of {mint_key}"));
    }
    let mint: Mint = load_state(accounts, &mint_key, "mint")?;
    if mint.mint_authority != COption::Some(authority) {
        return Err(format!("{authority} is not the mint authority of {mint_key}"));
    }

    let args: CreateMetadataArgs = decode_args(args)?;
    let collection = match args.data.collection {
        Some(collection) if collection.verified => {
            return Err("collection cannot be verified in this instruction".into());
        }
        Some(collection) => Some(Pubkey::new_from_array(collection.key)),
        None => None,
    };
    let record = MetadataRecord {
        mint: mint_key,
        update_authority,
        name: args.data.name,
        symbol: args.data.symbol,
        uri: args.data.uri,
        collection,
        collection_verified: false,
        collection_size: args.collection_details.map(|details| match details {
            CollectionDetailsArgs::V1 { size } => size,
            CollectionDetailsArgs::V2 { .. } => 0,
        }),
    };
    create_program_account(accounts, rent, &metadata, &payer, record.encode()?)
}

fn create_master_edition(
    accounts: &mut HashMap<Pubkey, Account>,
    ix: &DecodedInstruction<'_>,
    rent: &Rent,
) -> Result<(), String> {
    let edition = ix.key(0)?;
    let mint_key = ix.key(1)?;
    let update_authority = ix.require_signer(2)?;
    let authority = ix.require_signer(3)?;
    let payer = ix.require_signer(4)?;
    let metadata = ix.key(5)?;
    if edition != master_edition_address(&mint_key) {
        return Err(format!("{edition} is not the master edition address of {mint_key}"));
    }

    let record = load_metadata(accounts, &metadata)?;
    if record.mint != mint_key {
        return Err(format!("metadata {metadata} does not describe {mint_key}"));
    }
    if record.update_authority != update_authority {
        return Err(format!("{update_authority} is not the update authority of {metadata}"));
    }
    let mut mint: Mint = load_state(accounts, &mint_key, "mint")?;
    if mint.mint_authority != COption::Some(authority) {
        return Err(format!("{authority} is not the mint authority of {mint_key}"));
    }
    if mint.supply != 1 || mint.decimals != 0 {
        return Err("master editions need a 0-decimal mint with supply 1".into());
    }
    create_program_account(accounts, rent, &edition, &payer, ix.data.to_vec())?;
    // The edition takes over both authorities.
    mint.mint_authority = COption::Some(edition);
    mint.freeze_authority = COption::Some(edition);
    store_state(accounts, &mint_key, mint)
}

fn verify_sized_collection_item(
    accounts: &mut HashMap<Pubkey, Account>,
    ix: &DecodedInstruction<'_>,
) -> Result<(), String> {
    let metadata = ix.key(0)?;
    let authority = ix.require_signer(1)?;
    ix.require_signer(2)?;
    let collection_mint = ix.key(3)?;
    let collection_metadata = ix.key(4)?;
    let collection_edition = ix.key(5)?;

    let mut parent = load_metadata(accounts, &collection_metadata)?;
    if parent.mint != collection_mint {
        return Err(format!("{collection_metadata} does not describe {collection_mint}"));
    }
    if parent.update_authority != authority {
        return Err(format!(
            "{authority} is not the update authority of collection {collection_mint}"
        ));
    }
    let size = parent
        .collection_size
        .ok_or_else(|| format!("{collection_mint} is not a sized collection"))?;
    if collection_edition != master_edition_address(&collection_mint)
        || !accounts.contains_key(&collection_edition)
    {
        return Err(format!("collection {collection_mint} has no master edition"));
    }

    let mut member = load_metadata(accounts, &metadata)?;
    if member.collection != Some(collection_mint) {
        return Err(format!("{metadata} is not a member of collection {collection_mint}"));
    }
    if member.collection_verified {
        return Err(format!("{metadata} is already verified"));
    }
    member.collection_verified = true;
    parent.collection_size = Some(size + 1);
    store_metadata(accounts, &metadata, &member)?;
    store_metadata(accounts, &collection_metadata, &parent)
}

fn update_metadata(
    accounts: &mut HashMap<Pubkey, Account>,
    ix: &DecodedInstruction<'_>,
    args: &[u8],
) -> Result<(), String> {
    let metadata = ix.key(0)?;
    let signer = ix.require_signer(1)?;
    let mut record = load_metadata(accounts, &metadata)?;
    if record.update_authority != signer {
        return Err(format!("{signer} is not the update authority of {metadata}"));
    }

    let args: UpdateMetadataArgs = decode_args(args)?;
    if let Some(data) = args.data {
        let requested = data
            .collection
            .map(|c| (Pubkey::new_from_array(c.key), c.verified));
        let stored = record.collection.map(|key| (key, record.collection_verified));
        if requested != stored {
            return Err("collection cannot be changed in this instruction".into());
        }
        record.name = data.name;
        record.symbol = data.symbol;
        record.uri = data.uri;
    }
    if let Some(authority) = args.new_update_authority {
        record.update_authority = Pubkey::new_from_array(authority);
    }
    store_metadata(accounts, &metadata, &record)
}

fn create_program_account(
    accounts: &mut HashMap<Pubkey, Account>,
    rent: &Rent,
    address: &Pubkey,
    payer: &Pubkey,
    data: Vec<u8>,
) -> Result<(), String> {
    if accounts.contains_key(address) {
        return Err(format!("account {address} already in use"));
    }
    let lamports = rent.minimum_balance(data.len());
    debit(accounts, payer, lamports)?;
    accounts.insert(
        *address,
        Account {
            lamports,
            data,
            owner: mpl_token_metadata::ID,
            executable: false,
            rent_epoch: 0,
        },
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Token metadata records
// ---------------------------------------------------------------------------

/// The state the memory ledger keeps for one token metadata account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    pub mint: Pubkey,
    pub update_authority: Pubkey,
    pub name: String,
    pub symbol: String,
    pub uri: String,
    /// Parent collection mint, if this record claims membership.
    pub collection: Option<Pubkey>,
    pub collection_verified: bool,
    /// Verified member count when this record is a sized collection parent.
    pub collection_size: Option<u64>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct StoredMetadata {
    mint: [u8; 32],
    update_authority: [u8; 32],
    name: String,
    symbol: String,
    uri: String,
    collection: Option<[u8; 32]>,
    collection_verified: bool,
    collection_size: Option<u64>,
}

impl MetadataRecord {
    fn encode(&self) -> Result<Vec<u8>, String> {
        let stored = StoredMetadata {
            mint: self.mint.to_bytes(),
            update_authority: self.update_authority.to_bytes(),
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            uri: self.uri.clone(),
            collection: self.collection.map(|key| key.to_bytes()),
            collection_verified: self.collection_verified,
            collection_size: self.collection_size,
        };
        borsh::to_vec(&stored).map_err(|e| format!("cannot encode metadata: {e}"))
    }

    fn decode(data: &[u8]) -> Result<Self, String> {
        let stored = StoredMetadata::try_from_slice(data)
            .map_err(|e| format!("invalid metadata account: {e}"))?;
        Ok(Self {
            mint: Pubkey::new_from_array(stored.mint),
            update_authority: Pubkey::new_from_array(stored.update_authority),
            name: stored.name,
            symbol: stored.symbol,
            uri: stored.uri,
            collection: stored.collection.map(Pubkey::new_from_array),
            collection_verified: stored.collection_verified,
            collection_size: stored.collection_size,
        })
    }
}

fn load_metadata(
    accounts: &HashMap<Pubkey, Account>,
    address: &Pubkey,
) -> Result<MetadataRecord, String> {
    let account = accounts
        .get(address)
        .ok_or_else(|| format!("metadata account {address} not found"))?;
    if account.owner != mpl_token_metadata::ID {
        return Err(format!("{address} is not owned by the token metadata program"));
    }
    MetadataRecord::decode(&account.data)
}

fn store_metadata(
    accounts: &mut HashMap<Pubkey, Account>,
    address: &Pubkey,
    record: &MetadataRecord,
) -> Result<(), String> {
    let data = record.encode()?;
    let account = accounts
        .get_mut(address)
        .ok_or_else(|| format!("metadata account {address} not found"))?;
    account.data = data;
    Ok(())
}

// Instruction argument layouts of the token metadata program, as encoded
// after the one-byte discriminator.

fn decode_args<T: BorshDeserialize>(args: &[u8]) -> Result<T, String> {
    T::try_from_slice(args).map_err(|e| format!("invalid token metadata arguments: {e}"))
}

#[allow(dead_code)]
#[derive(BorshDeserialize)]
struct DataV2Args {
    name: String,
    symbol: String,
    uri: String,
    seller_fee_basis_points: u16,
    creators: Option<Vec<CreatorArgs>>,
    collection: Option<CollectionArgs>,
    uses: Option<UsesArgs>,
}

#[allow(dead_code)]
#[derive(BorshDeserialize)]
struct CreatorArgs {
    address: [u8; 32],
    verified: bool,
    share: u8,
}

#[derive(BorshDeserialize)]
struct CollectionArgs {
    verified: bool,
    key: [u8; 32],
}

#[allow(dead_code)]
#[derive(BorshDeserialize)]
struct UsesArgs {
    use_method: u8,
    remaining: u64,
    total: u64,
}

#[allow(dead_code)]
#[derive(BorshDeserialize)]
enum CollectionDetailsArgs {
    V1 { size: u64 },
    V2 { padding: [u8; 8] },
}

#[allow(dead_code)]
#[derive(BorshDeserialize)]
struct CreateMetadataArgs {
    data: DataV2Args,
    is_mutable: bool,
    collection_details: Option<CollectionDetailsArgs>,
}

#[allow(dead_code)]
#[derive(BorshDeserialize)]
struct UpdateMetadataArgs {
    data: Option<DataV2Args>,
    new_update_authority: Option<[u8; 32]>,
    primary_sale_happened: Option<bool>,
    is_mutable: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::Instruction;
    use solana_sdk::native_token::LAMPORTS_PER_SOL;
    use solana_sdk::signature::{Keypair, Signer};
    use solana_sdk::instruction::AccountMeta;
    use spl_associated_token_account::instruction::create_associated_token_account;

    use crate::metadata::{MetadataAccounts, TokenMetadata, create_metadata_ix, update_metadata_ix};

    fn signed(ledger: &MemoryLedger, ixs: &[Instruction], signers: &[&Keypair]) -> Transaction {
        let payer = signers[0].pubkey();
        let mut tx = Transaction::new_with_payer(ixs, Some(&payer));
        tx.sign(&signers.to_vec(), ledger.blockhash);
        tx
    }

    fn funded_ledger() -> (MemoryLedger, Keypair, Pubkey) {
        let ledger = MemoryLedger::new();
        let payer = Keypair::new();
        ledger.fund(&payer.pubkey(), LAMPORTS_PER_SOL);
        let mint = Pubkey::new_unique();
        ledger.add_mint(&mint, &payer.pubkey(), 2);
        (ledger, payer, mint)
    }

    #[tokio::test]
    async fn charges_fee_and_creates_associated_account() {
        let (ledger, payer, mint) = funded_ledger();
        let owner = Pubkey::new_unique();
        let ix = create_associated_token_account(&payer.pubkey(), &owner, &mint, &spl_token::id());
        let tx = signed(&ledger, &[ix], &[&payer]);

        ledger.send_transaction(&tx).await.unwrap();

        let ata = get_associated_token_address_with_program_id(&owner, &mint, &spl_token::id());
        assert_eq!(ledger.token_balance(&ata), Some(0));
        let rent = Rent::default().minimum_balance(TokenAccount::LEN);
        assert_eq!(
            ledger.balance(&payer.pubkey()),
            LAMPORTS_PER_SOL - LAMPORTS_PER_SIGNATURE - rent
        );
    }

    #[tokio::test]
    async fn duplicate_creation_is_rejected() {
        let (ledger, payer, mint) = funded_ledger();
        let owner = Pubkey::new_unique();
        ledger.add_token_account(&owner, &mint, 0);
        let ix = create_associated_token_account(&payer.pubkey(), &owner, &mint, &spl_token::id());
        let tx = signed(&ledger, &[ix], &[&payer]);

        let err = ledger.send_transaction(&tx).await.unwrap_err();
        assert!(err.to_string().contains("already in use"), "{err}");
        assert_eq!(ledger.submitted_count(), 0);
    }

    #[tokio::test]
    async fn unfunded_payer_is_rejected() {
        let ledger = MemoryLedger::new();
        let payer = Keypair::new();
        let mint = Pubkey::new_unique();
        ledger.add_mint(&mint, &payer.pubkey(), 2);
        let ix = create_associated_token_account(
            &payer.pubkey(),
            &payer.pubkey(),
            &mint,
            &spl_token::id(),
        );
        let tx = signed(&ledger, &[ix], &[&payer]);

        let err = ledger.send_transaction(&tx).await.unwrap_err();
        assert_eq!(err, LedgerError::rejected("insufficient funds for fee"));
    }

    #[tokio::test]
    async fn failed_instruction_rolls_back_the_whole_transaction() {
        let (ledger, payer, mint) = funded_ledger();
        let owner = Pubkey::new_unique();
        let ata = get_associated_token_address_with_program_id(&owner, &mint, &spl_token::id());
        let stranger = Keypair::new();
        ledger.fund(&stranger.pubkey(), LAMPORTS_PER_SOL);

        let create =
            create_associated_token_account(&payer.pubkey(), &owner, &mint, &spl_token::id());
        // Signed by someone who is not the mint authority.
        let mint_ix = spl_token::instruction::mint_to(
            &spl_token::id(),
            &mint,
            &ata,
            &stranger.pubkey(),
            &[],
            100,
        )
        .unwrap();
        let tx = signed(&ledger, &[create, mint_ix], &[&payer, &stranger]);

        let err = ledger.send_transaction(&tx).await.unwrap_err();
        assert!(!err.logs().is_empty());
        assert!(ledger.account(&ata).is_none());
        assert_eq!(ledger.balance(&payer.pubkey()), LAMPORTS_PER_SOL);
    }

    #[tokio::test]
    async fn mint_and_transfer_move_balances() {
        let (ledger, payer, mint) = funded_ledger();
        let source = ledger.add_token_account(&payer.pubkey(), &mint, 0);
        let other = Pubkey::new_unique();
        let destination = ledger.add_token_account(&other, &mint, 0);

        let mint_ix =
            spl_token::instruction::mint_to(&spl_token::id(), &mint, &source, &payer.pubkey(), &[], 1000)
                .unwrap();
        let transfer_ix = spl_token::instruction::transfer(
            &spl_token::id(),
            &source,
            &destination,
            &payer.pubkey(),
            &[],
            100,
        )
        .unwrap();
        let tx = signed(&ledger, &[mint_ix, transfer_ix], &[&payer]);
        ledger.send_transaction(&tx).await.unwrap();

        assert_eq!(ledger.token_balance(&source), Some(900));
        assert_eq!(ledger.token_balance(&destination), Some(100));
        assert_eq!(ledger.mint_supply(&mint), Some(1000));
    }

    #[tokio::test]
    async fn unknown_signature_never_confirms() {
        let ledger = MemoryLedger::new();
        let err = ledger
            .confirm_transaction(&Signature::new_unique(), Commitment::Confirmed)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ConfirmationTimeout { .. }));
    }

    #[tokio::test]
    async fn unreachable_ledger_fails_every_call() {
        let ledger = MemoryLedger::new();
        ledger.set_unreachable(true);
        assert!(matches!(
            ledger.get_account(&Pubkey::new_unique()).await,
            Err(LedgerError::UpstreamUnavailable(_))
        ));
        assert!(matches!(
            ledger.latest_blockhash().await,
            Err(LedgerError::UpstreamUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn airdrop_credits_and_confirms() {
        let ledger = MemoryLedger::new();
        let who = Pubkey::new_unique();
        let signature = ledger.request_airdrop(&who, LAMPORTS_PER_SOL).await.unwrap();
        ledger
            .confirm_transaction(&signature, Commitment::Finalized)
            .await
            .unwrap();
        assert_eq!(ledger.balance(&who), LAMPORTS_PER_SOL);
        assert_eq!(ledger.airdrop_count(), 1);
        assert_eq!(ledger.submitted_count(), 0);
    }

    async fn with_token_metadata(ledger: &MemoryLedger, payer: &Keypair, mint: &Pubkey) -> Pubkey {
        let accounts = MetadataAccounts {
            mint: *mint,
            mint_authority: payer.pubkey(),
            payer: payer.pubkey(),
            update_authority: payer.pubkey(),
        };
        let metadata = TokenMetadata::new("Forge", "FRG", "ipfs://v1");
        let ix = create_metadata_ix(&accounts, &metadata, None, false);
        ledger.send_transaction(&signed(ledger, &[ix], &[payer])).await.unwrap();
        metadata_address(mint)
    }

    #[tokio::test]
    async fn metadata_records_mint_and_update_authority() {
        let (ledger, payer, mint) = funded_ledger();
        let address = with_token_metadata(&ledger, &payer, &mint).await;

        let record = ledger.metadata_record(&address).unwrap();
        assert_eq!(record.mint, mint);
        assert_eq!(record.update_authority, payer.pubkey());
        assert_eq!(record.uri, "ipfs://v1");
        assert_eq!(record.collection, None);
        assert_eq!(record.collection_size, None);
    }

    #[tokio::test]
    async fn only_the_update_authority_can_update_metadata() {
        let (ledger, payer, mint) = funded_ledger();
        let address = with_token_metadata(&ledger, &payer, &mint).await;
        let stranger = Keypair::new();
        ledger.fund(&stranger.pubkey(), LAMPORTS_PER_SOL);
        let metadata = TokenMetadata::new("Forge", "FRG", "ipfs://v2");

        let ix = update_metadata_ix(&mint, &stranger.pubkey(), &metadata, None);
        let err = ledger
            .send_transaction(&signed(&ledger, &[ix], &[&stranger]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not the update authority"), "{err}");
        assert_eq!(ledger.metadata_record(&address).unwrap().uri, "ipfs://v1");

        let ix = update_metadata_ix(&mint, &payer.pubkey(), &metadata, None);
        ledger.send_transaction(&signed(&ledger, &[ix], &[&payer])).await.unwrap();
        assert_eq!(ledger.metadata_record(&address).unwrap().uri, "ipfs://v2");
    }

    #[tokio::test]
    async fn update_cannot_claim_a_collection() {
        let (ledger, payer, mint) = funded_ledger();
        with_token_metadata(&ledger, &payer, &mint).await;
        let metadata = TokenMetadata::new("Forge", "FRG", "ipfs://v2");

        let ix = update_metadata_ix(&mint, &payer.pubkey(), &metadata, Some((Pubkey::new_unique(), true)));
        let err = ledger
            .send_transaction(&signed(&ledger, &[ix], &[&payer]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("collection cannot be changed"), "{err}");
    }

    #[tokio::test]
    async fn unknown_metadata_instruction_is_rejected() {
        let (ledger, payer, mint) = funded_ledger();
        let address = with_token_metadata(&ledger, &payer, &mint).await;
        let ix = Instruction {
            program_id: mpl_token_metadata::ID,
            accounts: vec![
                AccountMeta::new(address, false),
                AccountMeta::new_readonly(payer.pubkey(), true),
            ],
            data: vec![0xEE],
        };

        let err = ledger
            .send_transaction(&signed(&ledger, &[ix], &[&payer]))
            .await
            .unwrap_err();
        assert!(
            err.to_string().contains("unsupported token metadata instruction"),
            "{err}"
        );
    }
}
