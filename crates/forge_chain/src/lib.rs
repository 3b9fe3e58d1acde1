//! Token and NFT operations against a Solana ledger, expressed as typed
//! plans that one sequencer runs step by step.

pub mod amount;
pub mod error;
pub mod explorer;
pub mod funding;
pub mod identity;
pub mod ledger;
pub mod metadata;
pub mod pipelines;
pub mod sequencer;
pub mod storage;
pub mod token;

// Re-export primary types for convenient access.
pub use amount::TokenAmount;
pub use error::LedgerError;
pub use explorer::{LinkKind, report_link, report_link_for};
pub use funding::ensure_funded;
pub use identity::{load_keypair, load_keypair_file, load_or_generate_keypair};
pub use ledger::{Ledger, memory::{MemoryLedger, MetadataRecord}, rpc::RpcLedger};
pub use metadata::TokenMetadata;
pub use sequencer::plan::{Handle, Input, MetadataUri, NftRecord, Plan, StepOutput};
pub use sequencer::{
    ResourceKey, RunReport, SequenceError, Sequencer, StepRecord, StepState, TransactionResult,
};
pub use storage::{MemoryStorage, MetadataStorage, NftAsset, PinataStorage, StorageFile};
