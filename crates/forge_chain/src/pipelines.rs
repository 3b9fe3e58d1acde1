//! Canned plans for the supported operations.
//!
//! Each function only builds a [`Plan`]; nothing touches the network until
//! the plan is handed to a [`crate::Sequencer`].

use solana_sdk::pubkey::Pubkey;

use crate::metadata::TokenMetadata;
use crate::sequencer::TransactionResult;
use crate::sequencer::plan::{Handle, NftRecord, Plan};
use crate::storage::NftAsset;

/// A plan together with the handle of the output callers care about.
#[derive(Debug)]
pub struct Pipeline<T> {
    pub plan: Plan,
    pub output: Handle<T>,
}

pub fn create_mint(decimals: u8) -> Pipeline<Pubkey> {
    let mut plan = Plan::new("create-mint");
    let output = plan.create_mint("create mint", decimals);
    Pipeline { plan, output }
}

pub fn create_token_account(owner: Pubkey, mint: Pubkey) -> Pipeline<Pubkey> {
    let mut plan = Plan::new("create-token-account");
    let output = plan.associated_account("resolve token account", owner, mint);
    Pipeline { plan, output }
}

pub fn create_token_metadata(mint: Pubkey, metadata: TokenMetadata) -> Pipeline<Pubkey> {
    let mut plan = Plan::new("create-token-metadata");
    let output = plan.token_metadata("resolve token metadata", mint, metadata);
    Pipeline { plan, output }
}

/// Mint into an existing token account.
pub fn mint_tokens(mint: Pubkey, destination: Pubkey, amount: u64) -> Pipeline<TransactionResult> {
    let mut plan = Plan::new("mint-tokens");
    let output = plan.mint_to("mint tokens", mint, destination, amount);
    Pipeline { plan, output }
}

/// Mint into `owner`'s associated token account, creating it if needed.
pub fn mint_tokens_to_owner(mint: Pubkey, owner: Pubkey, amount: u64) -> Pipeline<TransactionResult> {
    let mut plan = Plan::new("mint-tokens");
    let destination = plan.associated_account("resolve recipient account", owner, mint);
    let output = plan.mint_to("mint tokens", mint, destination, amount);
    Pipeline { plan, output }
}

/// Move tokens between the associated accounts of `sender` and `recipient`.
pub fn transfer_tokens(
    mint: Pubkey,
    sender: Pubkey,
    recipient: Pubkey,
    amount: u64,
) -> Pipeline<TransactionResult> {
    let mut plan = Plan::new("transfer-tokens");
    let source = plan.associated_account("resolve sender account", sender, mint);
    let destination = plan.associated_account("resolve recipient account", recipient, mint);
    let output = plan.transfer("transfer tokens", source, destination, amount);
    Pipeline { plan, output }
}

/// Handles into an NFT collection plan.
#[derive(Debug)]
pub struct NftCollectionPipeline {
    pub plan: Plan,
    pub collection: Handle<NftRecord>,
    pub nft: Handle<NftRecord>,
    pub verified: Handle<NftRecord>,
    pub update: Option<Handle<TransactionResult>>,
}

/// Upload all metadata, create a sized collection and one member NFT,
/// verify the membership, then optionally point the member at new metadata.
///
/// Uploads come first so a storage outage stops the run before anything is
/// submitted on-chain.
pub fn nft_collection(
    collection: NftAsset,
    nft: NftAsset,
    update: Option<NftAsset>,
) -> NftCollectionPipeline {
    let mut plan = Plan::new("nft-collection");

    let collection_metadata = token_metadata_for(&collection);
    let nft_metadata = token_metadata_for(&nft);
    let collection_uri = plan.upload_metadata("upload collection metadata", collection);
    let nft_uri = plan.upload_metadata("upload NFT metadata", nft);
    let update_uri = update.map(|asset| plan.upload_metadata("upload updated metadata", asset));

    let collection =
        plan.create_collection_nft("create collection NFT", collection_uri, collection_metadata);
    let nft = plan.create_nft("create NFT", nft_uri, nft_metadata, Some(collection.into()));
    let verified = plan.verify_collection("verify collection membership", nft, collection);
    let update = update_uri.map(|uri| plan.update_nft_uri("update NFT metadata", verified, uri));

    NftCollectionPipeline {
        plan,
        collection,
        nft,
        verified,
        update,
    }
}

fn token_metadata_for(asset: &NftAsset) -> TokenMetadata {
    TokenMetadata {
        name: asset.name.clone(),
        symbol: asset.symbol.clone(),
        uri: String::new(),
        seller_fee_basis_points: asset.seller_fee_basis_points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageFile;

    fn asset(name: &str) -> NftAsset {
        NftAsset {
            name: name.into(),
            symbol: "FRG".into(),
            description: format!("{name} description"),
            seller_fee_basis_points: 100,
            image: StorageFile::new(format!("{name}.png"), "image/png", vec![1, 2, 3]),
        }
    }

    #[test]
    fn transfer_resolves_both_accounts_first() {
        let pipeline = transfer_tokens(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            100,
        );
        let names: Vec<_> = pipeline.plan.steps().iter().map(|s| s.step.name()).collect();
        assert_eq!(names, ["associated-account", "associated-account", "transfer"]);
        assert_eq!(pipeline.output.step(), 2);
        assert!(pipeline.plan.validate().is_ok());
    }

    #[test]
    fn nft_collection_uploads_before_any_transaction() {
        let pipeline = nft_collection(asset("collection"), asset("nft"), Some(asset("update")));
        let names: Vec<_> = pipeline.plan.steps().iter().map(|s| s.step.name()).collect();
        assert_eq!(
            names,
            [
                "upload-metadata",
                "upload-metadata",
                "upload-metadata",
                "create-nft",
                "create-nft",
                "verify-collection",
                "update-nft-uri",
            ]
        );
        assert!(pipeline.update.is_some());
        assert!(pipeline.plan.validate().is_ok());
    }

    #[test]
    fn nft_collection_without_update_skips_it() {
        let pipeline = nft_collection(asset("collection"), asset("nft"), None);
        assert_eq!(pipeline.plan.len(), 5);
        assert!(pipeline.update.is_none());
    }
}
