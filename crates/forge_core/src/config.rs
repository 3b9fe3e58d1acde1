use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;
use crate::rpc_config::RpcConfigStore;

/// Environment variable names read on top of `config.json`.
pub const ENV_CLUSTER: &str = "FORGE_CLUSTER";
pub const ENV_RPC_URL: &str = "FORGE_RPC_URL";
pub const ENV_COMMITMENT: &str = "FORGE_COMMITMENT";
pub const ENV_STORAGE_JWT: &str = "PINATA_JWT";

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Commitment
// ---------------------------------------------------------------------------

/// Durability level requested when waiting for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        })
    }
}

impl FromStr for Commitment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => anyhow::bail!("unknown commitment level '{other}'"),
        }
    }
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

/// Off-chain metadata storage (IPFS pinning service) settings.
///
/// The JWT is **never** written to disk; it is read from `PINATA_JWT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub api_url: String,
    pub gateway_url: String,
    pub timeout_secs: u64,
    #[serde(skip)]
    pub jwt: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.pinata.cloud".into(),
            gateway_url: "https://gateway.pinata.cloud".into(),
            timeout_secs: 60,
            jwt: None,
        }
    }
}

// ---------------------------------------------------------------------------
// ForgeConfig
// ---------------------------------------------------------------------------

/// Application configuration stored at `~/.tokenforge/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub cluster: Cluster,
    pub commitment: Commitment,
    /// Name of the environment variable holding the signing keypair.
    pub secret_env: String,
    pub confirm_timeout_secs: u64,
    /// Below this balance an airdrop is requested (non-mainnet only).
    pub min_balance_lamports: u64,
    pub airdrop_lamports: u64,
    pub storage: StorageConfig,
    pub rpc: RpcConfigStore,
    pub log_level: String,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            cluster: Cluster::Devnet,
            commitment: Commitment::Confirmed,
            secret_env: "SECRET_KEY".into(),
            confirm_timeout_secs: 60,
            min_balance_lamports: LAMPORTS_PER_SOL / 2,
            airdrop_lamports: LAMPORTS_PER_SOL,
            storage: StorageConfig::default(),
            rpc: RpcConfigStore::default(),
            log_level: "info".into(),
        }
    }
}

impl ForgeConfig {
    /// Returns the base config directory: `~/.tokenforge/`
    pub fn base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".tokenforge"))
    }

    /// Returns the config file path: `~/.tokenforge/config.json`
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("config.json"))
    }

    /// Returns the logs directory: `~/.tokenforge/logs/`
    pub fn logs_dir() -> Result<PathBuf> {
        Ok(Self::base_dir()?.join("logs"))
    }

    /// Loads the config file, then environment overrides.
    ///
    /// Runs before logging is installed, so it reports through its result only.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = Self::load_from_path(&path)?;
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load config from a specific file path. A missing file yields defaults
    /// and is not created.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Save config to a specific file path (secrets are excluded via `#[serde(skip)]`).
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(cluster) = lookup(ENV_CLUSTER) {
            self.cluster = cluster.parse()?;
        }
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.rpc.set_custom_rpc(self.cluster, url)?;
        }
        if let Some(commitment) = lookup(ENV_COMMITMENT) {
            self.commitment = commitment.parse()?;
        }
        if let Some(jwt) = lookup(ENV_STORAGE_JWT).filter(|v| !v.is_empty()) {
            self.storage.jwt = Some(jwt);
        }
        Ok(())
    }

    /// RPC endpoint for the selected cluster.
    pub fn rpc_url(&self) -> String {
        self.rpc.get_rpc(self.cluster).url
    }

    pub fn rpc_timeout_secs(&self) -> u64 {
        self.rpc.get_rpc(self.cluster).timeout_secs
    }
}

/// Load a `.env` file from the working directory or one of its parents.
///
/// Returns the file that was loaded, or `None` when there is none.
pub fn load_dotenv() -> Result<Option<PathBuf>> {
    dotenv_outcome(dotenvy::dotenv())
}

fn dotenv_outcome(result: dotenvy::Result<PathBuf>) -> Result<Option<PathBuf>> {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e).context("Failed to read .env"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_target_devnet() {
        let config = ForgeConfig::default();
        assert_eq!(config.cluster, Cluster::Devnet);
        assert_eq!(config.commitment, Commitment::Confirmed);
        assert_eq!(config.secret_env, "SECRET_KEY");
        assert_eq!(config.rpc_url(), "https://api.devnet.solana.com");
    }

    #[test]
    fn env_overrides_cluster_rpc_and_commitment() {
        let vars = env(&[
            (ENV_CLUSTER, "localnet"),
            (ENV_RPC_URL, "http://127.0.0.1:8899"),
            (ENV_COMMITMENT, "finalized"),
            (ENV_STORAGE_JWT, "jwt-token"),
        ]);
        let mut config = ForgeConfig::default();
        config.apply_env_with(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.cluster, Cluster::Localnet);
        assert_eq!(config.rpc_url(), "http://127.0.0.1:8899");
        assert_eq!(config.commitment, Commitment::Finalized);
        assert_eq!(config.storage.jwt.as_deref(), Some("jwt-token"));
    }

    #[test]
    fn env_rejects_unknown_cluster() {
        let vars = env(&[(ENV_CLUSTER, "moonnet")]);
        let mut config = ForgeConfig::default();
        assert!(config.apply_env_with(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn save_load_round_trip_excludes_jwt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");

        let mut config = ForgeConfig::default();
        config.cluster = Cluster::Testnet;
        config.storage.jwt = Some("secret".into());
        config.save_to_path(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("secret"));

        let loaded = ForgeConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.cluster, Cluster::Testnet);
        assert!(loaded.storage.jwt.is_none());
    }

    #[test]
    fn missing_file_yields_defaults_without_creating_it() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        let config = ForgeConfig::load_from_path(&path).unwrap();
        assert_eq!(config.cluster, Cluster::Devnet);
        assert!(!path.exists());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{ "cluster": "mainnet-beta" }"#).unwrap();

        let config = ForgeConfig::load_from_path(&path).unwrap();
        assert_eq!(config.cluster, Cluster::MainnetBeta);
        assert_eq!(config.confirm_timeout_secs, 60);
        assert_eq!(config.storage.gateway_url, "https://gateway.pinata.cloud");
    }

    #[test]
    fn env_file_is_loaded_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "FORGE_TEST_DOTENV_VALUE=from-file\n").unwrap();

        let loaded = dotenv_outcome(dotenvy::from_path(&path).map(|()| path.clone())).unwrap();
        assert_eq!(loaded, Some(path));
        assert_eq!(
            std::env::var("FORGE_TEST_DOTENV_VALUE").as_deref(),
            Ok("from-file")
        );
    }

    #[test]
    fn missing_env_file_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        let loaded = dotenv_outcome(dotenvy::from_path(&path).map(|()| path.clone())).unwrap();
        assert_eq!(loaded, None);
    }

    #[test]
    fn malformed_env_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "NOT A VALID LINE\n").unwrap();

        let err = dotenv_outcome(dotenvy::from_path(&path).map(|()| path.clone())).unwrap_err();
        assert!(err.to_string().contains(".env"));
    }

    #[test]
    fn commitment_parses_case_insensitively() {
        assert_eq!("Finalized".parse::<Commitment>().unwrap(), Commitment::Finalized);
        assert!("eventually".parse::<Commitment>().is_err());
    }
}
