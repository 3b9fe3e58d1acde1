//! Explorer links for signatures, addresses and blocks.

use std::fmt;

use forge_core::Cluster;

const EXPLORER_BASE: &str = "https://explorer.solana.com";

/// What an explorer link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Transaction,
    Address,
    Block,
}

impl LinkKind {
    fn path_segment(&self) -> &'static str {
        match self {
            LinkKind::Transaction => "tx",
            LinkKind::Address => "address",
            LinkKind::Block => "block",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkKind::Transaction => "transaction",
            LinkKind::Address => "address",
            LinkKind::Block => "block",
        })
    }
}

/// Build the explorer URL for `identifier` on `cluster`.
///
/// Pure string construction; no network access.
pub fn report_link(kind: LinkKind, identifier: &str, cluster: Cluster) -> String {
    report_link_for(kind, identifier, cluster, None)
}

/// Like [`report_link`], but localnet links point the explorer at `rpc_url`
/// when one is configured instead of the cluster's default endpoint.
pub fn report_link_for(
    kind: LinkKind,
    identifier: &str,
    cluster: Cluster,
    rpc_url: Option<&str>,
) -> String {
    let base = format!("{EXPLORER_BASE}/{}/{identifier}", kind.path_segment());
    match cluster {
        Cluster::MainnetBeta => base,
        Cluster::Localnet => {
            let endpoint = rpc_url.unwrap_or(cluster.default_rpc_url());
            let custom: String = url::form_urlencoded::byte_serialize(endpoint.as_bytes()).collect();
            format!("{base}?cluster=custom&customUrl={custom}")
        }
        other => format!("{base}?cluster={}", other.name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIG: &str =
        "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW";

    #[test]
    fn devnet_transaction_link() {
        assert_eq!(
            report_link(LinkKind::Transaction, SIG, Cluster::Devnet),
            format!("https://explorer.solana.com/tx/{SIG}?cluster=devnet")
        );
    }

    #[test]
    fn mainnet_address_link_has_no_cluster_param() {
        let link = report_link(
            LinkKind::Address,
            "DjED8R41adsUWTBEz19vqDVCfn1aAQN9oCtFtAUw2npW",
            Cluster::MainnetBeta,
        );
        assert_eq!(
            link,
            "https://explorer.solana.com/address/DjED8R41adsUWTBEz19vqDVCfn1aAQN9oCtFtAUw2npW"
        );
    }

    #[test]
    fn localnet_uses_custom_url() {
        let link = report_link(LinkKind::Block, "42", Cluster::Localnet);
        assert_eq!(
            link,
            "https://explorer.solana.com/block/42?cluster=custom&customUrl=http%3A%2F%2Flocalhost%3A8899"
        );
    }

    #[test]
    fn localnet_uses_configured_rpc_url() {
        let link = report_link_for(
            LinkKind::Transaction,
            SIG,
            Cluster::Localnet,
            Some("http://10.0.0.5:9000"),
        );
        assert_eq!(
            link,
            format!(
                "https://explorer.solana.com/tx/{SIG}?cluster=custom&customUrl=http%3A%2F%2F10.0.0.5%3A9000"
            )
        );
    }

    #[test]
    fn configured_rpc_url_does_not_change_public_clusters() {
        assert_eq!(
            report_link_for(LinkKind::Address, "abc", Cluster::Devnet, Some("http://10.0.0.5:9000")),
            report_link(LinkKind::Address, "abc", Cluster::Devnet)
        );
    }

    #[test]
    fn same_inputs_same_link() {
        for cluster in Cluster::ALL {
            let a = report_link(LinkKind::Address, "abc", cluster);
            let b = report_link(LinkKind::Address, "abc", cluster);
            assert_eq!(a, b);
        }
    }
}
