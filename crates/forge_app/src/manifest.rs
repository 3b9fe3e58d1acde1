//! NFT collection manifests.
//!
//! ```json
//! {
//!   "collection": { "name": "Forge", "symbol": "FRG", "description": "...", "image": "collection.png" },
//!   "nft": { "name": "Forge #1", "symbol": "FRG", "image": "1.png" },
//!   "update": { "name": "Forge #1", "symbol": "FRG", "seller_fee_basis_points": 100, "image": "1b.png" }
//! }
//! ```
//!
//! Image paths are relative to the manifest's directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use forge_chain::{NftAsset, StorageFile};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct NftManifest {
    pub collection: AssetEntry,
    pub nft: AssetEntry,
    #[serde(default)]
    pub update: Option<AssetEntry>,
}

#[derive(Debug, Deserialize)]
pub struct AssetEntry {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub seller_fee_basis_points: u16,
    pub image: PathBuf,
}

/// Assets read from a manifest, images loaded.
pub struct NftAssets {
    pub collection: NftAsset,
    pub nft: NftAsset,
    pub update: Option<NftAsset>,
}

impl NftManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))
    }

    pub fn into_assets(self, base_dir: &Path) -> Result<NftAssets> {
        Ok(NftAssets {
            collection: self.collection.into_asset(base_dir)?,
            nft: self.nft.into_asset(base_dir)?,
            update: self.update.map(|u| u.into_asset(base_dir)).transpose()?,
        })
    }
}

impl AssetEntry {
    fn into_asset(self, base_dir: &Path) -> Result<NftAsset> {
        let image_path = base_dir.join(&self.image);
        let image = StorageFile::image_from_path(&image_path)
            .with_context(|| format!("Image for '{}'", self.name))?;
        Ok(NftAsset {
            name: self.name,
            symbol: self.symbol,
            description: self.description,
            seller_fee_basis_points: self.seller_fee_basis_points,
            image,
        })
    }
}

/// Load `path` and its images.
pub fn load_assets(path: &Path) -> Result<NftAssets> {
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    NftManifest::load(path)?.into_assets(base_dir)
}
