mod commands;
mod context;
mod manifest;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use forge_core::config::{ENV_CLUSTER, ENV_COMMITMENT, ENV_RPC_URL, load_dotenv};
use forge_core::{Cluster, Commitment, ForgeConfig, logging};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(
    name = "tokenforge",
    about = "Create, mint and transfer SPL tokens and NFT collections on Solana clusters",
    version,
    propagate_version = true
)]
struct Cli {
    /// Cluster to target (mainnet-beta, devnet, testnet, localnet)
    #[arg(long, global = true, env = ENV_CLUSTER)]
    cluster: Option<Cluster>,

    /// Custom RPC endpoint for the selected cluster
    #[arg(long, global = true, env = ENV_RPC_URL)]
    rpc_url: Option<String>,

    /// Commitment to wait for (processed, confirmed, finalized)
    #[arg(long, global = true, env = ENV_COMMITMENT)]
    commitment: Option<Commitment>,

    /// Environment variable holding the signing keypair
    #[arg(long, global = true)]
    secret_env: Option<String>,

    /// Solana CLI keypair file to sign with instead of the environment
    #[arg(long, global = true, conflicts_with = "generate_if_missing")]
    keypair_file: Option<PathBuf>,

    /// Generate a keypair and append it to --env-file when none is set
    #[arg(long, global = true)]
    generate_if_missing: bool,

    /// Env file that generated keypairs are written to
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Run against an in-memory ledger and storage instead of the network
    #[arg(long, global = true)]
    dry_run: bool,

    /// Never request an airdrop, even when the balance is low
    #[arg(long, global = true)]
    no_airdrop: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new mint with the signer as mint and freeze authority
    CreateMint {
        #[arg(long, default_value_t = 2)]
        decimals: u8,
    },

    /// Resolve or create an owner's associated token account
    CreateTokenAccount {
        #[arg(long, env = "FORGE_MINT")]
        mint: Pubkey,
        /// Account owner (default: the signer)
        #[arg(long)]
        owner: Option<Pubkey>,
    },

    /// Resolve or create the metadata record of a mint
    CreateTokenMetadata {
        #[arg(long, env = "FORGE_MINT")]
        mint: Pubkey,
        #[arg(long)]
        name: String,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        uri: String,
    },

    /// Mint tokens into a token account
    MintTokens {
        #[arg(long, env = "FORGE_MINT")]
        mint: Pubkey,
        /// Existing token account to mint into
        #[arg(long, conflicts_with = "recipient", required_unless_present = "recipient")]
        destination: Option<Pubkey>,
        /// Wallet whose associated account receives the tokens (created if needed)
        #[arg(long)]
        recipient: Option<Pubkey>,
        /// Amount in major units, e.g. 10 or 10.50
        #[arg(long)]
        amount: String,
    },

    /// Transfer tokens from the signer to a recipient wallet
    TransferTokens {
        #[arg(long, env = "FORGE_MINT")]
        mint: Pubkey,
        #[arg(long)]
        recipient: Pubkey,
        /// Amount in major units
        #[arg(long)]
        amount: String,
    },

    /// Upload metadata, create a collection and a verified member NFT
    NftCollection {
        /// JSON manifest describing the collection, the NFT and an optional update
        #[arg(long)]
        manifest: PathBuf,
    },

    /// Show or edit the saved configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the saved configuration
    Show,
    /// Save a custom RPC endpoint for the selected cluster
    SetRpc { url: String },
    /// Restore the public RPC endpoint of the selected cluster
    ResetRpc,
}

impl Commands {
    /// Mint the command operates on, provisioned up front in dry runs.
    fn mint(&self) -> Option<Pubkey> {
        match self {
            Self::CreateTokenAccount { mint, .. }
            | Self::CreateTokenMetadata { mint, .. }
            | Self::MintTokens { mint, .. }
            | Self::TransferTokens { mint, .. } => Some(*mint),
            Self::CreateMint { .. } | Self::NftCollection { .. } | Self::Config { .. } => None,
        }
    }

    fn needs_storage(&self) -> bool {
        matches!(self, Self::NftCollection { .. })
    }
}

impl Cli {
    fn apply_overrides(&self, config: &mut ForgeConfig) -> Result<()> {
        if let Some(cluster) = self.cluster {
            config.cluster = cluster;
        }
        if let Some(url) = &self.rpc_url {
            config.rpc.set_custom_rpc(config.cluster, url.clone())?;
        }
        if let Some(commitment) = self.commitment {
            config.commitment = commitment;
        }
        if let Some(name) = &self.secret_env {
            config.secret_env = name.clone();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    // Before parsing, so env-backed flags see the file.
    let dotenv = load_dotenv();
    let cli = Cli::parse();

    if let Err(e) = run(cli, dotenv).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, dotenv: Result<Option<PathBuf>>) -> Result<()> {
    let mut config = ForgeConfig::load()?;
    cli.apply_overrides(&mut config)?;
    let _log_guard = logging::init_logging(&config.log_level)?;

    match dotenv {
        Ok(Some(path)) => debug!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => warn!("Ignoring unreadable .env file: {e:#}"),
    }
    let config_path = ForgeConfig::config_path()?;
    if config_path.exists() {
        info!("Loaded config from {}", config_path.display());
    } else {
        debug!("No config at {}, using defaults", config_path.display());
    }

    if let Commands::Config { action } = &cli.command {
        return commands::config(&config_path, cli.cluster, action);
    }

    let identity = context::load_identity(&cli, &config)?;
    let ctx = context::Context::build(
        &config,
        identity,
        cli.dry_run,
        cli.command.mint(),
        cli.command.needs_storage(),
    )?;
    if !cli.no_airdrop {
        ctx.ensure_funded(&config).await?;
    }

    match cli.command {
        Commands::CreateMint { decimals } => commands::create_mint(&ctx, decimals).await,
        Commands::CreateTokenAccount { mint, owner } => {
            commands::create_token_account(&ctx, mint, owner).await
        }
        Commands::CreateTokenMetadata {
            mint,
            name,
            symbol,
            uri,
        } => commands::create_token_metadata(&ctx, mint, name, symbol, uri).await,
        Commands::MintTokens {
            mint,
            destination,
            recipient,
            amount,
        } => commands::mint_tokens(&ctx, mint, destination, recipient, &amount).await,
        Commands::TransferTokens {
            mint,
            recipient,
            amount,
        } => commands::transfer_tokens(&ctx, mint, recipient, &amount).await,
        Commands::NftCollection { manifest } => commands::nft_collection(&ctx, &manifest).await,
        Commands::Config { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_mint_tokens_to_recipient() {
        let mint = Pubkey::new_unique();
        let recipient = Pubkey::new_unique();
        let cli = Cli::try_parse_from([
            "tokenforge",
            "--dry-run",
            "--cluster",
            "localnet",
            "mint-tokens",
            "--mint",
            &mint.to_string(),
            "--recipient",
            &recipient.to_string(),
            "--amount",
            "10.00",
        ])
        .unwrap();

        assert!(cli.dry_run);
        assert_eq!(cli.cluster, Some(Cluster::Localnet));
        assert_eq!(cli.command.mint(), Some(mint));
        match cli.command {
            Commands::MintTokens {
                destination,
                recipient: Some(r),
                amount,
                ..
            } => {
                assert!(destination.is_none());
                assert_eq!(r, recipient);
                assert_eq!(amount, "10.00");
            }
            _ => panic!("expected mint-tokens"),
        }
    }

    #[test]
    fn mint_tokens_needs_a_target() {
        let mint = Pubkey::new_unique().to_string();
        let result = Cli::try_parse_from([
            "tokenforge",
            "mint-tokens",
            "--mint",
            &mint,
            "--amount",
            "1",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_config_set_rpc() {
        let cli = Cli::try_parse_from([
            "tokenforge",
            "--cluster",
            "localnet",
            "config",
            "set-rpc",
            "http://10.0.0.5:9000",
        ])
        .unwrap();

        assert_eq!(cli.cluster, Some(Cluster::Localnet));
        assert!(cli.command.mint().is_none());
        match cli.command {
            Commands::Config {
                action: ConfigAction::SetRpc { url },
            } => assert_eq!(url, "http://10.0.0.5:9000"),
            _ => panic!("expected config set-rpc"),
        }
    }

    #[test]
    fn overrides_apply_to_config() {
        let cli = Cli::try_parse_from([
            "tokenforge",
            "--cluster",
            "testnet",
            "--rpc-url",
            "https://rpc.example.com",
            "--commitment",
            "finalized",
            "--secret-env",
            "PAYER",
            "create-mint",
        ])
        .unwrap();
        let mut config = ForgeConfig::default();
        cli.apply_overrides(&mut config).unwrap();

        assert_eq!(config.cluster, Cluster::Testnet);
        assert_eq!(config.rpc_url(), "https://rpc.example.com");
        assert_eq!(config.commitment, Commitment::Finalized);
        assert_eq!(config.secret_env, "PAYER");
    }
}
