//! SPL token instruction builders and account decoding.

use solana_sdk::account::Account;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account;
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::{Account as TokenAccount, Mint};

use crate::error::LedgerError;

/// Size of a mint account.
pub const MINT_LEN: usize = Mint::LEN;

/// The deterministic token account of `owner` for `mint`.
pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    get_associated_token_address(owner, mint)
}

/// Create the associated token account. Fails on-chain if it already exists.
pub fn create_associated_account_ix(payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction {
    create_associated_token_account(payer, owner, mint, &spl_token::id())
}

/// Allocate and initialize a mint owned by the token program. `authority`
/// becomes both the mint and freeze authority.
pub fn create_mint_instructions(
    payer: &Pubkey,
    mint: &Pubkey,
    authority: &Pubkey,
    decimals: u8,
    rent_lamports: u64,
) -> Result<Vec<Instruction>, LedgerError> {
    let create = system_instruction::create_account(
        payer,
        mint,
        rent_lamports,
        MINT_LEN as u64,
        &spl_token::id(),
    );
    let initialize = spl_token::instruction::initialize_mint2(
        &spl_token::id(),
        mint,
        authority,
        Some(authority),
        decimals,
    )
    .map_err(program_error)?;
    Ok(vec![create, initialize])
}

pub fn mint_to_ix(
    mint: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
    amount: u64,
) -> Result<Instruction, LedgerError> {
    spl_token::instruction::mint_to(&spl_token::id(), mint, destination, authority, &[], amount)
        .map_err(program_error)
}

/// Move `amount` minor units between two token accounts of `mint`.
pub fn transfer_ix(
    source: &Pubkey,
    mint: &Pubkey,
    destination: &Pubkey,
    owner: &Pubkey,
    amount: u64,
    decimals: u8,
) -> Result<Instruction, LedgerError> {
    spl_token::instruction::transfer_checked(
        &spl_token::id(),
        source,
        mint,
        destination,
        owner,
        &[],
        amount,
        decimals,
    )
    .map_err(program_error)
}

pub fn unpack_mint(address: &Pubkey, account: &Account) -> Result<Mint, LedgerError> {
    if account.owner != spl_token::id() {
        return Err(LedgerError::InvalidInput(format!(
            "{address} is not owned by the token program"
        )));
    }
    Mint::unpack(&account.data)
        .map_err(|e| LedgerError::InvalidInput(format!("{address} is not a mint: {e}")))
}

pub fn unpack_token_account(address: &Pubkey, account: &Account) -> Result<TokenAccount, LedgerError> {
    if account.owner != spl_token::id() {
        return Err(LedgerError::InvalidInput(format!(
            "{address} is not owned by the token program"
        )));
    }
    TokenAccount::unpack(&account.data)
        .map_err(|e| LedgerError::InvalidInput(format!("{address} is not a token account: {e}")))
}

fn program_error(err: spl_token::solana_program::program_error::ProgramError) -> LedgerError {
    LedgerError::InvalidInput(format!("cannot build token instruction: {err}"))
}
