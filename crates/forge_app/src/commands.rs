//! One handler per subcommand: build the plan, run it, print the report.

use std::path::Path;

use anyhow::{Context as _, Result};
use forge_chain::pipelines::{self, Pipeline};
use forge_chain::{Plan, RunReport, TokenAmount, TokenMetadata};
use forge_core::{Cluster, ForgeConfig};
use solana_sdk::pubkey::Pubkey;
use tracing::info;

use crate::ConfigAction;
use crate::context::Context;
use crate::manifest;
use crate::output::print_report;

async fn execute(ctx: &Context, plan: &Plan) -> Result<RunReport> {
    match ctx.sequencer.run(plan).await {
        Ok(report) => {
            print_report(&report);
            Ok(report)
        }
        Err(err) => {
            print_report(&err.report);
            for line in err.source.logs() {
                eprintln!("  {line}");
            }
            Err(err.into())
        }
    }
}

pub async fn create_mint(ctx: &Context, decimals: u8) -> Result<()> {
    let Pipeline { plan, output } = pipelines::create_mint(decimals);
    let report = execute(ctx, &plan).await?;
    if let Some(mint) = report.output(&output) {
        println!("\nMint: {mint} ({decimals} decimals)");
    }
    Ok(())
}

pub async fn create_token_account(ctx: &Context, mint: Pubkey, owner: Option<Pubkey>) -> Result<()> {
    let owner = owner.unwrap_or_else(|| ctx.identity());
    let Pipeline { plan, output } = pipelines::create_token_account(owner, mint);
    let report = execute(ctx, &plan).await?;
    if let Some(account) = report.output(&output) {
        println!("\nToken account: {account}");
    }
    Ok(())
}

pub async fn create_token_metadata(
    ctx: &Context,
    mint: Pubkey,
    name: String,
    symbol: String,
    uri: String,
) -> Result<()> {
    let metadata = TokenMetadata::new(name, symbol, uri);
    metadata.validate()?;
    let Pipeline { plan, .. } = pipelines::create_token_metadata(mint, metadata);
    execute(ctx, &plan).await?;
    Ok(())
}

pub async fn mint_tokens(
    ctx: &Context,
    mint: Pubkey,
    destination: Option<Pubkey>,
    recipient: Option<Pubkey>,
    amount: &str,
) -> Result<()> {
    let amount = parse_amount(ctx, &mint, amount).await?;
    info!(%mint, %amount, "Minting");
    let Pipeline { plan, .. } = match (destination, recipient) {
        (Some(destination), _) => pipelines::mint_tokens(mint, destination, amount.minor()),
        (None, Some(recipient)) => pipelines::mint_tokens_to_owner(mint, recipient, amount.minor()),
        (None, None) => anyhow::bail!("either --destination or --recipient is required"),
    };
    execute(ctx, &plan).await?;
    println!("\nMinted {amount}");
    Ok(())
}

pub async fn transfer_tokens(ctx: &Context, mint: Pubkey, recipient: Pubkey, amount: &str) -> Result<()> {
    let amount = parse_amount(ctx, &mint, amount).await?;
    info!(%mint, %recipient, %amount, "Transferring");
    let Pipeline { plan, .. } =
        pipelines::transfer_tokens(mint, ctx.identity(), recipient, amount.minor());
    execute(ctx, &plan).await?;
    println!("\nTransferred {amount} to {recipient}");
    Ok(())
}

pub async fn nft_collection(ctx: &Context, manifest_path: &Path) -> Result<()> {
    let assets = manifest::load_assets(manifest_path)?;
    let pipeline = pipelines::nft_collection(assets.collection, assets.nft, assets.update);
    let report = execute(ctx, &pipeline.plan).await?;

    if let Some(collection) = report.output(&pipeline.collection) {
        println!("\nCollection mint: {}", collection.mint);
    }
    if let Some(nft) = report.output(&pipeline.verified) {
        println!("NFT mint: {} (verified: {})", nft.mint, nft.collection_verified);
    }
    Ok(())
}

pub fn config(path: &Path, cluster: Option<Cluster>, action: &ConfigAction) -> Result<()> {
    let config = edit_config(path, cluster, action)?;
    match action {
        ConfigAction::Show => {
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::SetRpc { .. } | ConfigAction::ResetRpc => {
            let cluster = cluster.unwrap_or(config.cluster);
            println!("RPC endpoint for {cluster}: {}", config.rpc.get_rpc(cluster).url);
        }
    }
    Ok(())
}

/// Apply `action` to the config file at `path`, saving unless it only reads.
/// `cluster` defaults to the file's own cluster; environment overrides are
/// not applied so they never leak into the file.
fn edit_config(path: &Path, cluster: Option<Cluster>, action: &ConfigAction) -> Result<ForgeConfig> {
    let mut config = ForgeConfig::load_from_path(path)?;
    let cluster = cluster.unwrap_or(config.cluster);
    match action {
        ConfigAction::Show => return Ok(config),
        ConfigAction::SetRpc { url } => {
            config.rpc.set_custom_rpc(cluster, url.clone())?;
            info!(%cluster, %url, "Custom RPC endpoint saved");
        }
        ConfigAction::ResetRpc => {
            config.rpc.reset_to_default(cluster);
            info!(%cluster, "RPC endpoint reset to the public default");
        }
    }
    config.save_to_path(path)?;
    Ok(config)
}

async fn parse_amount(ctx: &Context, mint: &Pubkey, amount: &str) -> Result<TokenAmount> {
    let decimals = ctx
        .mint_decimals(mint)
        .await
        .with_context(|| format!("Cannot read mint {mint}"))?;
    Ok(TokenAmount::parse(amount, decimals)?)
}
