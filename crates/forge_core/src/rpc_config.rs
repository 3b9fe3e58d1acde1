use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cluster::Cluster;

/// Configuration for a single RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub cluster: Cluster,
    pub url: String,
    pub is_custom: bool,
    pub timeout_secs: u64,
}

const DEFAULT_TIMEOUT_SECS: u64 = 30;

impl RpcConfig {
    fn default_for(cluster: Cluster) -> Self {
        Self {
            cluster,
            url: cluster.default_rpc_url().to_string(),
            is_custom: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Per-cluster RPC endpoint configuration with custom override support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfigStore {
    configs: HashMap<Cluster, RpcConfig>,
}

impl RpcConfigStore {
    /// Create a store populated with the public endpoint of every cluster.
    pub fn with_defaults() -> Self {
        let configs = Cluster::ALL
            .into_iter()
            .map(|cluster| (cluster, RpcConfig::default_for(cluster)))
            .collect();

        Self { configs }
    }

    /// RPC configuration for a cluster, falling back to the public endpoint
    /// when the stored config predates the cluster.
    pub fn get_rpc(&self, cluster: Cluster) -> RpcConfig {
        self.configs
            .get(&cluster)
            .cloned()
            .unwrap_or_else(|| RpcConfig::default_for(cluster))
    }

    /// Override the RPC URL for a cluster with a custom endpoint.
    ///
    /// Returns `Err` if the URL fails validation.
    pub fn set_custom_rpc(&mut self, cluster: Cluster, url: String) -> anyhow::Result<()> {
        if !validate_url(&url) {
            anyhow::bail!("invalid RPC URL: {url}");
        }

        let entry = self
            .configs
            .entry(cluster)
            .or_insert_with(|| RpcConfig::default_for(cluster));
        entry.url = url;
        entry.is_custom = true;
        Ok(())
    }

    /// Reset a cluster's RPC URL back to the public endpoint.
    pub fn reset_to_default(&mut self, cluster: Cluster) {
        let entry = self
            .configs
            .entry(cluster)
            .or_insert_with(|| RpcConfig::default_for(cluster));
        entry.url = cluster.default_rpc_url().to_string();
        entry.is_custom = false;
    }
}

impl Default for RpcConfigStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Validate that a URL is well-formed and uses HTTP or HTTPS.
pub fn validate_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let scheme = parsed.scheme();
            (scheme == "http" || scheme == "https") && parsed.host().is_some()
        }
        Err(_) => false,
    }
}
