pub mod cluster;
pub mod config;
pub mod logging;
pub mod rpc_config;

pub use cluster::{Cluster, ParseClusterError};
pub use config::{Commitment, ForgeConfig, StorageConfig};
pub use rpc_config::{RpcConfig, RpcConfigStore, validate_url};
