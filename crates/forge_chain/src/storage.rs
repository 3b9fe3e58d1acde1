//! Off-chain storage for NFT images and metadata documents.
//!
//! Pinata pinning API: `POST {api}/pinning/pinFileToIPFS`, bearer JWT auth.
//! The returned CID is served from `{gateway}/ipfs/{cid}`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use forge_core::StorageConfig;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::LedgerError;

/// A file to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl StorageFile {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read an image from disk, guessing the content type from its extension.
    pub fn image_from_path(path: &Path) -> Result<Self, LedgerError> {
        let bytes = std::fs::read(path).map_err(|e| {
            LedgerError::InvalidInput(format!("cannot read image {}: {e}", path.display()))
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let content_type = match extension.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "svg" => "image/svg+xml",
            _ => {
                return Err(LedgerError::InvalidInput(format!(
                    "unsupported image type: {}",
                    path.display()
                )));
            }
        };
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image")
            .to_string();
        Ok(Self::new(name, content_type, bytes))
    }
}

/// Somewhere a file can be uploaded and later fetched by URI.
#[async_trait]
pub trait MetadataStorage: Send + Sync {
    /// Upload `file` and return the URI it is reachable at.
    async fn upload(&self, file: &StorageFile) -> Result<String, LedgerError>;
}

// ---------------------------------------------------------------------------
// NFT assets
// ---------------------------------------------------------------------------

/// Everything needed to publish one NFT's off-chain metadata.
#[derive(Debug, Clone)]
pub struct NftAsset {
    pub name: String,
    pub symbol: String,
    pub description: String,
    pub seller_fee_basis_points: u16,
    pub image: StorageFile,
}

#[derive(Serialize)]
struct MetadataDocument<'a> {
    name: &'a str,
    symbol: &'a str,
    description: &'a str,
    image: &'a str,
}

/// Upload the image, then a JSON document pointing at it. Returns the
/// document's URI.
pub async fn upload_nft_metadata(
    storage: &dyn MetadataStorage,
    asset: &NftAsset,
) -> Result<String, LedgerError> {
    let image_uri = storage.upload(&asset.image).await?;
    debug!(name = %asset.name, %image_uri, "uploaded NFT image");

    let document = MetadataDocument {
        name: &asset.name,
        symbol: &asset.symbol,
        description: &asset.description,
        image: &image_uri,
    };
    let bytes = serde_json::to_vec(&document)
        .map_err(|e| LedgerError::InvalidInput(format!("cannot encode metadata: {e}")))?;
    let uri = storage
        .upload(&StorageFile::new("metadata.json", "application/json", bytes))
        .await?;
    info!(name = %asset.name, %uri, "uploaded NFT metadata");
    Ok(uri)
}

// ---------------------------------------------------------------------------
// Pinata
// ---------------------------------------------------------------------------

pub struct PinataStorage {
    client: Client,
    api_url: String,
    gateway_url: String,
    jwt: String,
}

impl PinataStorage {
    /// Build from configuration. The JWT must already be loaded.
    pub fn new(config: &StorageConfig) -> Result<Self, LedgerError> {
        let jwt = config
            .jwt
            .clone()
            .filter(|j| !j.trim().is_empty())
            .ok_or_else(|| {
                LedgerError::missing_secret(forge_core::config::ENV_STORAGE_JWT, "not set")
            })?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LedgerError::UpstreamUnavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            jwt,
        })
    }
}

#[async_trait]
impl MetadataStorage for PinataStorage {
    async fn upload(&self, file: &StorageFile) -> Result<String, LedgerError> {
        let part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.content_type)
            .map_err(|e| LedgerError::InvalidInput(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        debug!(name = %file.name, size = file.bytes.len(), "Pinata upload");

        let resp = self
            .client
            .post(format!("{}/pinning/pinFileToIPFS", self.api_url))
            .bearer_auth(&self.jwt)
            .multipart(form)
            .send()
            .await
            .map_err(|e| LedgerError::UpstreamUnavailable(format!("Pinata: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => LedgerError::missing_secret(
                    forge_core::config::ENV_STORAGE_JWT,
                    format!("rejected by Pinata ({status})"),
                ),
                _ => LedgerError::UpstreamUnavailable(format!("Pinata {status}: {body}")),
            });
        }

        let data: PinResponse = resp.json().await.map_err(|e| {
            LedgerError::UpstreamUnavailable(format!("Failed to parse Pinata response: {e}"))
        })?;
        Ok(format!("{}/ipfs/{}", self.gateway_url, data.ipfs_hash))
    }
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Keeps uploads in memory; URIs look like `memory://3/metadata.json`.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<Vec<StorageFile>>,
    unreachable: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A storage whose every upload fails with `UpstreamUnavailable`.
    pub fn unreachable() -> Self {
        let storage = Self::default();
        storage.unreachable.store(true, Ordering::SeqCst);
        storage
    }

    pub fn upload_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Fetch a previously uploaded file by URI.
    pub fn get(&self, uri: &str) -> Option<StorageFile> {
        let rest = uri.strip_prefix("memory://")?;
        let (index, _) = rest.split_once('/')?;
        let index: usize = index.parse().ok()?;
        self.files.lock().get(index).cloned()
    }
}

#[async_trait]
impl MetadataStorage for MemoryStorage {
    async fn upload(&self, file: &StorageFile) -> Result<String, LedgerError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(LedgerError::UpstreamUnavailable(
                "memory storage is marked unreachable".into(),
            ));
        }
        let mut files = self.files.lock();
        files.push(file.clone());
        Ok(format!("memory://{}/{}", files.len() - 1, file.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset() -> NftAsset {
        NftAsset {
            name: "Forge #1".into(),
            symbol: "FRG".into(),
            description: "First of its kind".into(),
            seller_fee_basis_points: 0,
            image: StorageFile::new("1.png", "image/png", vec![0x89, b'P', b'N', b'G']),
        }
    }

    #[tokio::test]
    async fn uploads_image_then_document() {
        let storage = MemoryStorage::new();
        let uri = upload_nft_metadata(&storage, &asset()).await.unwrap();

        assert_eq!(storage.upload_count(), 2);
        let document = storage.get(&uri).unwrap();
        assert_eq!(document.content_type, "application/json");
        let json: serde_json::Value = serde_json::from_slice(&document.bytes).unwrap();
        assert_eq!(json["name"], "Forge #1");
        assert_eq!(json["image"], "memory://0/1.png");
    }

    #[tokio::test]
    async fn unreachable_storage_fails_upstream() {
        let storage = MemoryStorage::unreachable();
        let err = upload_nft_metadata(&storage, &asset()).await.unwrap_err();
        assert!(matches!(err, LedgerError::UpstreamUnavailable(_)));
        assert_eq!(storage.upload_count(), 0);
    }

    #[test]
    fn pinata_requires_a_jwt() {
        let config = StorageConfig::default();
        assert!(matches!(
            PinataStorage::new(&config),
            Err(LedgerError::MissingSecret { .. })
        ));

        let config = StorageConfig {
            jwt: Some("token".into()),
            api_url: "https://api.pinata.cloud/".into(),
            ..StorageConfig::default()
        };
        let storage = PinataStorage::new(&config).unwrap();
        assert_eq!(storage.api_url, "https://api.pinata.cloud");
    }

    #[test]
    fn reads_images_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let png = tmp.path().join("art.PNG");
        std::fs::write(&png, b"png").unwrap();
        let file = StorageFile::image_from_path(&png).unwrap();
        assert_eq!(file.content_type, "image/png");
        assert_eq!(file.name, "art.PNG");

        let txt = tmp.path().join("notes.txt");
        std::fs::write(&txt, b"hi").unwrap();
        assert!(StorageFile::image_from_path(&txt).is_err());
        assert!(StorageFile::image_from_path(&tmp.path().join("missing.png")).is_err());
    }
}
