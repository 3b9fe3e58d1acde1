//! Wiring: identity, ledger, storage and the sequencer built from them.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use forge_chain::identity::{load_keypair, load_keypair_file, load_or_generate_keypair};
use forge_chain::token::unpack_mint;
use forge_chain::{
    Ledger, MemoryLedger, MemoryStorage, MetadataStorage, PinataStorage, RpcLedger, Sequencer,
    ensure_funded,
};
use forge_core::ForgeConfig;
use forge_core::config::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use tracing::{info, warn};

use crate::Cli;

/// Decimals of the mint provisioned for dry runs.
pub const DRY_RUN_DECIMALS: u8 = 2;
/// Signer's starting token balance in dry runs, in minor units.
pub const DRY_RUN_TOKEN_BALANCE: u64 = 1_000_000;

pub struct Context {
    pub sequencer: Sequencer,
    ledger: Arc<dyn Ledger>,
}

/// Load the signer: a keypair file, the configured environment variable,
/// or (with `--generate-if-missing`) a fresh keypair saved to the env file.
/// Dry runs without a configured key sign with a throwaway keypair.
pub fn load_identity(cli: &Cli, config: &ForgeConfig) -> Result<Arc<Keypair>> {
    let keypair = if let Some(path) = &cli.keypair_file {
        load_keypair_file(path)?
    } else if cli.generate_if_missing {
        load_or_generate_keypair(&config.secret_env, &cli.env_file)?
    } else if cli.dry_run && std::env::var(&config.secret_env).is_err() {
        let keypair = Keypair::new();
        warn!(pubkey = %keypair.pubkey(), "{} not set; dry run uses a throwaway keypair", config.secret_env);
        keypair
    } else {
        load_keypair(&config.secret_env)?
    };
    Ok(Arc::new(keypair))
}

impl Context {
    pub fn build(
        config: &ForgeConfig,
        identity: Arc<Keypair>,
        dry_run: bool,
        mint: Option<Pubkey>,
        needs_storage: bool,
    ) -> Result<Self> {
        let (ledger, storage): (Arc<dyn Ledger>, Option<Arc<dyn MetadataStorage>>) = if dry_run {
            let ledger = dry_run_ledger(&identity.pubkey(), mint);
            let storage: Arc<dyn MetadataStorage> = Arc::new(MemoryStorage::new());
            info!("Dry run: using an in-memory ledger and storage");
            (ledger, Some(storage))
        } else {
            let url = config.rpc_url();
            info!(cluster = %config.cluster, %url, "Connecting");
            let ledger: Arc<dyn Ledger> = Arc::new(RpcLedger::new(
                url,
                Duration::from_secs(config.rpc_timeout_secs()),
                config.commitment,
                Duration::from_secs(config.confirm_timeout_secs),
            ));
            let storage = if needs_storage {
                let pinata = PinataStorage::new(&config.storage)
                    .context("Metadata storage unavailable")?;
                Some(Arc::new(pinata) as Arc<dyn MetadataStorage>)
            } else {
                None
            };
            (ledger, storage)
        };

        let mut sequencer = Sequencer::new(ledger.clone(), identity, config.cluster)
            .with_commitment(config.commitment)
            .with_explorer_rpc_url(config.rpc_url());
        if let Some(storage) = storage {
            sequencer = sequencer.with_storage(storage);
        }
        Ok(Self { sequencer, ledger })
    }

    pub fn identity(&self) -> Pubkey {
        self.sequencer.identity()
    }

    pub async fn ensure_funded(&self, config: &ForgeConfig) -> Result<()> {
        ensure_funded(
            self.ledger.as_ref(),
            &self.identity(),
            config.cluster,
            config.min_balance_lamports,
            config.airdrop_lamports,
            config.commitment,
        )
        .await
        .context("Funding check failed")?;
        Ok(())
    }

    /// Decimals of `mint`, read from the ledger.
    pub async fn mint_decimals(&self, mint: &Pubkey) -> Result<u8> {
        let account = forge_chain::ledger::require_account(self.ledger.as_ref(), mint, "mint").await?;
        Ok(unpack_mint(mint, &account)?.decimals)
    }
}

/// In-memory ledger with a funded signer and, when the command names one, a
/// mint the signer controls plus a token account holding a starting balance.
fn dry_run_ledger(identity: &Pubkey, mint: Option<Pubkey>) -> Arc<dyn Ledger> {
    let ledger = MemoryLedger::new();
    ledger.fund(identity, 10 * LAMPORTS_PER_SOL);
    if let Some(mint) = mint {
        ledger.add_mint(&mint, identity, DRY_RUN_DECIMALS);
        ledger.add_token_account(identity, &mint, DRY_RUN_TOKEN_BALANCE);
    }
    Arc::new(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_chain::token::associated_token_address;

    #[tokio::test]
    async fn dry_run_provisions_the_named_mint() {
        let identity = Arc::new(Keypair::new());
        let mint = Pubkey::new_unique();
        let ctx = Context::build(
            &ForgeConfig::default(),
            identity.clone(),
            true,
            Some(mint),
            true,
        )
        .unwrap();

        assert_eq!(ctx.mint_decimals(&mint).await.unwrap(), DRY_RUN_DECIMALS);
        let account = ctx
            .ledger
            .get_account(&associated_token_address(&identity.pubkey(), &mint))
            .await
            .unwrap();
        assert!(account.is_some());
        assert!(ctx.ledger.get_balance(&identity.pubkey()).await.unwrap() >= LAMPORTS_PER_SOL);
    }

    #[tokio::test]
    async fn unknown_mint_has_no_decimals() {
        let ctx = Context::build(&ForgeConfig::default(), Arc::new(Keypair::new()), true, None, false)
            .unwrap();
        assert!(ctx.mint_decimals(&Pubkey::new_unique()).await.is_err());
    }

    #[tokio::test]
    async fn live_runs_need_a_storage_secret_only_for_nfts() {
        let config = ForgeConfig::default();
        assert!(Context::build(&config, Arc::new(Keypair::new()), false, None, false).is_ok());
        assert!(Context::build(&config, Arc::new(Keypair::new()), false, None, true).is_err());
    }
}
