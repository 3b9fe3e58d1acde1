//! Token metadata records and the instructions that create, verify and
//! update them.

use mpl_token_metadata::instructions::{
    CreateMasterEditionV3Builder, CreateMetadataAccountV3Builder, UpdateMetadataAccountV2Builder,
    VerifySizedCollectionItemBuilder,
};
use mpl_token_metadata::types::{Collection, CollectionDetails, DataV2};
use serde::{Deserialize, Serialize};
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;

use crate::error::LedgerError;

pub const MAX_NAME_LEN: usize = 32;
pub const MAX_SYMBOL_LEN: usize = 10;
pub const MAX_URI_LEN: usize = 200;
pub const MAX_BASIS_POINTS: u16 = 10_000;

/// The human-facing fields of a metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub seller_fee_basis_points: u16,
}

impl TokenMetadata {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            uri: uri.into(),
            seller_fee_basis_points: 0,
        }
    }

    pub fn with_uri(&self, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..self.clone()
        }
    }

    /// Check the field limits the metadata program enforces.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let too_long = |field: &str, max: usize| {
            LedgerError::InvalidInput(format!("metadata {field} exceeds {max} bytes"))
        };
        if self.name.is_empty() {
            return Err(LedgerError::InvalidInput("metadata name is empty".into()));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(too_long("name", MAX_NAME_LEN));
        }
        if self.symbol.len() > MAX_SYMBOL_LEN {
            return Err(too_long("symbol", MAX_SYMBOL_LEN));
        }
        if self.uri.len() > MAX_URI_LEN {
            return Err(too_long("uri", MAX_URI_LEN));
        }
        if self.seller_fee_basis_points > MAX_BASIS_POINTS {
            return Err(LedgerError::InvalidInput(format!(
                "seller fee {} exceeds {MAX_BASIS_POINTS} basis points",
                self.seller_fee_basis_points
            )));
        }
        Ok(())
    }

    /// `collection` is the parent mint and whether membership is verified.
    fn data_v2(&self, collection: Option<(Pubkey, bool)>) -> DataV2 {
        DataV2 {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            uri: self.uri.clone(),
            seller_fee_basis_points: self.seller_fee_basis_points,
            creators: None,
            collection: collection.map(|(key, verified)| Collection { verified, key }),
            uses: None,
        }
    }
}

/// Metadata PDA: seeds `["metadata", program_id, mint]`.
pub fn metadata_address(mint: &Pubkey) -> Pubkey {
    let program_id = mpl_token_metadata::ID;
    Pubkey::find_program_address(
        &[b"metadata", program_id.as_ref(), mint.as_ref()],
        &program_id,
    )
    .0
}

/// Master edition PDA: seeds `["metadata", program_id, mint, "edition"]`.
pub fn master_edition_address(mint: &Pubkey) -> Pubkey {
    let program_id = mpl_token_metadata::ID;
    Pubkey::find_program_address(
        &[b"metadata", program_id.as_ref(), mint.as_ref(), b"edition"],
        &program_id,
    )
    .0
}

/// Accounts taking part in a metadata creation.
#[derive(Debug, Clone, Copy)]
pub struct MetadataAccounts {
    pub mint: Pubkey,
    pub mint_authority: Pubkey,
    pub payer: Pubkey,
    pub update_authority: Pubkey,
}

/// `CreateMetadataAccountV3` for `accounts.mint`.
///
/// `collection` records an unverified membership; `sized_collection` marks
/// the mint itself as a sized collection parent.
pub fn create_metadata_ix(
    accounts: &MetadataAccounts,
    metadata: &TokenMetadata,
    collection: Option<&Pubkey>,
    sized_collection: bool,
) -> Instruction {
    let mut builder = CreateMetadataAccountV3Builder::new();
    builder
        .metadata(metadata_address(&accounts.mint))
        .mint(accounts.mint)
        .mint_authority(accounts.mint_authority)
        .payer(accounts.payer)
        .update_authority(accounts.update_authority, true)
        .data(metadata.data_v2(collection.map(|key| (*key, false))))
        .is_mutable(true);
    if sized_collection {
        builder.collection_details(CollectionDetails::V1 { size: 0 });
    }
    builder.instruction()
}

/// `CreateMasterEditionV3` with a max supply of zero (a one-of-one).
pub fn create_master_edition_ix(accounts: &MetadataAccounts) -> Instruction {
    CreateMasterEditionV3Builder::new()
        .edition(master_edition_address(&accounts.mint))
        .mint(accounts.mint)
        .update_authority(accounts.update_authority)
        .mint_authority(accounts.mint_authority)
        .payer(accounts.payer)
        .metadata(metadata_address(&accounts.mint))
        .max_supply(0)
        .instruction()
}

/// `VerifySizedCollectionItem`: mark `nft_mint` as a verified member of
/// `collection_mint`.
pub fn verify_sized_collection_item_ix(
    nft_mint: &Pubkey,
    collection_mint: &Pubkey,
    collection_authority: &Pubkey,
    payer: &Pubkey,
) -> Instruction {
    VerifySizedCollectionItemBuilder::new()
        .metadata(metadata_address(nft_mint))
        .collection_authority(*collection_authority)
        .payer(*payer)
        .collection_mint(*collection_mint)
        .collection(metadata_address(collection_mint))
        .collection_master_edition_account(master_edition_address(collection_mint))
        .instruction()
}

/// `UpdateMetadataAccountV2` replacing the whole data block with `metadata`.
///
/// `collection` must repeat the stored membership exactly (key and
/// verification flag); the program refuses to change it through an update.
pub fn update_metadata_ix(
    mint: &Pubkey,
    update_authority: &Pubkey,
    metadata: &TokenMetadata,
    collection: Option<(Pubkey, bool)>,
) -> Instruction {
    UpdateMetadataAccountV2Builder::new()
        .metadata(metadata_address(mint))
        .update_authority(*update_authority)
        .data(metadata.data_v2(collection))
        .instruction()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpl_token_metadata::accounts::{MasterEdition, Metadata};

    fn accounts() -> MetadataAccounts {
        let authority = Pubkey::new_unique();
        MetadataAccounts {
            mint: Pubkey::new_unique(),
            mint_authority: authority,
            payer: authority,
            update_authority: authority,
        }
    }

    #[test]
    fn derived_addresses_match_the_program() {
        let mint = Pubkey::new_unique();
        assert_eq!(metadata_address(&mint), Metadata::find_pda(&mint).0);
        assert_eq!(master_edition_address(&mint), MasterEdition::find_pda(&mint).0);
    }

    #[test]
    fn validates_field_limits() {
        let ok = TokenMetadata::new("Forge Token", "FRG", "https://example.com/t.json");
        assert!(ok.validate().is_ok());

        let long_name = TokenMetadata::new("x".repeat(33), "FRG", "");
        assert!(long_name.validate().is_err());
        let long_symbol = TokenMetadata::new("Forge", "SYMBOLTOOLONG", "");
        assert!(long_symbol.validate().is_err());
        let mut expensive = ok.clone();
        expensive.seller_fee_basis_points = 10_001;
        assert!(expensive.validate().is_err());
        assert!(TokenMetadata::new("", "FRG", "").validate().is_err());
    }

    #[test]
    fn with_uri_keeps_other_fields() {
        let mut original = TokenMetadata::new("Forge", "FRG", "ipfs://old");
        original.seller_fee_basis_points = 250;
        let updated = original.with_uri("ipfs://new");
        assert_eq!(updated.uri, "ipfs://new");
        assert_eq!(updated.name, "Forge");
        assert_eq!(updated.seller_fee_basis_points, 250);
    }

    #[test]
    fn instructions_target_the_metadata_program() {
        let accounts = accounts();
        let metadata = TokenMetadata::new("Forge", "FRG", "ipfs://x");
        let create = create_metadata_ix(&accounts, &metadata, None, true);
        assert_eq!(create.program_id, mpl_token_metadata::ID);
        assert_eq!(create.accounts[0].pubkey, metadata_address(&accounts.mint));
        assert_eq!(create.data[0], 33);

        let edition = create_master_edition_ix(&accounts);
        assert_eq!(edition.accounts[0].pubkey, master_edition_address(&accounts.mint));
        assert_eq!(edition.data[0], 17);

        let collection = Pubkey::new_unique();
        let verify = verify_sized_collection_item_ix(
            &accounts.mint,
            &collection,
            &accounts.update_authority,
            &accounts.payer,
        );
        assert_eq!(verify.accounts[4].pubkey, metadata_address(&collection));
        assert_eq!(verify.data[0], 30);

        let update = update_metadata_ix(&accounts.mint, &accounts.update_authority, &metadata, None);
        assert_eq!(update.data[0], 15);
        assert!(update.accounts[1].is_signer);
    }

    #[test]
    fn deserializes_without_optional_fields() {
        let parsed: TokenMetadata =
            serde_json::from_str(r#"{"name":"Forge","symbol":"FRG"}"#).unwrap();
        assert_eq!(parsed.uri, "");
        assert_eq!(parsed.seller_fee_basis_points, 0);
    }
}
