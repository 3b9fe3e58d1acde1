//! Declarative plans.
//!
//! A [`Plan`] is an ordered list of typed steps. Each builder method pushes
//! one step and hands back a [`Handle`] to its output; later steps take
//! either a fixed value or such a handle as input. Handles carry the id of
//! the plan that issued them, so a handle can only point backwards into its
//! own plan.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use solana_sdk::pubkey::Pubkey;

use super::TransactionResult;
use crate::error::LedgerError;
use crate::metadata::TokenMetadata;
use crate::storage::NftAsset;

static NEXT_PLAN_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// URI of an uploaded metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataUri(pub String);

impl fmt::Display for MetadataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An NFT as created (and possibly verified) by a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NftRecord {
    pub mint: Pubkey,
    /// Token account holding the single unit, owned by the identity.
    pub token_account: Pubkey,
    pub metadata: Pubkey,
    pub master_edition: Pubkey,
    pub data: TokenMetadata,
    /// Mint of the parent collection, if this NFT is a member.
    pub collection: Option<Pubkey>,
    pub collection_verified: bool,
}

/// What a completed step produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutput {
    Address(Pubkey),
    Transaction(TransactionResult),
    Uri(MetadataUri),
    Nft(NftRecord),
}

/// A type a step can output, and so a type a [`Handle`] can refer to.
pub trait StepValue: Clone {
    const KIND: &'static str;

    fn from_output(output: &StepOutput) -> Option<Self>;
}

impl StepValue for Pubkey {
    const KIND: &'static str = "address";

    fn from_output(output: &StepOutput) -> Option<Self> {
        match output {
            StepOutput::Address(address) => Some(*address),
            _ => None,
        }
    }
}

impl StepValue for TransactionResult {
    const KIND: &'static str = "transaction";

    fn from_output(output: &StepOutput) -> Option<Self> {
        match output {
            StepOutput::Transaction(result) => Some(result.clone()),
            _ => None,
        }
    }
}

impl StepValue for MetadataUri {
    const KIND: &'static str = "uri";

    fn from_output(output: &StepOutput) -> Option<Self> {
        match output {
            StepOutput::Uri(uri) => Some(uri.clone()),
            _ => None,
        }
    }
}

impl StepValue for NftRecord {
    const KIND: &'static str = "nft";

    fn from_output(output: &StepOutput) -> Option<Self> {
        match output {
            StepOutput::Nft(record) => Some(record.clone()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Handles and inputs
// ---------------------------------------------------------------------------

/// Reference to the output of step `step` of plan `plan`.
pub struct Handle<T> {
    plan: u64,
    step: usize,
    _output: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn plan_id(&self) -> u64 {
        self.plan
    }

    pub fn step(&self) -> usize {
        self.step
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(plan {}, step {})", self.plan, self.step)
    }
}

/// A step input: a value known up front or the output of an earlier step.
#[derive(Debug, Clone)]
pub enum Input<T> {
    Fixed(T),
    Step(Handle<T>),
}

impl<T: StepValue> Input<T> {
    fn dependency(&self) -> Option<Dependency> {
        match self {
            Self::Fixed(_) => None,
            Self::Step(handle) => Some(Dependency {
                plan: handle.plan,
                step: handle.step,
                kind: T::KIND,
            }),
        }
    }

    /// The concrete value, looking handles up in `outputs` (indexed by step).
    pub(crate) fn resolve(&self, outputs: &[StepOutput]) -> Result<T, LedgerError> {
        match self {
            Self::Fixed(value) => Ok(value.clone()),
            Self::Step(handle) => outputs
                .get(handle.step)
                .and_then(T::from_output)
                .ok_or_else(|| {
                    LedgerError::UnresolvedDependency(format!(
                        "step {} has no {} output yet",
                        handle.step,
                        T::KIND
                    ))
                }),
        }
    }
}

impl<T> From<Handle<T>> for Input<T> {
    fn from(handle: Handle<T>) -> Self {
        Self::Step(handle)
    }
}

impl From<Pubkey> for Input<Pubkey> {
    fn from(value: Pubkey) -> Self {
        Self::Fixed(value)
    }
}

impl From<MetadataUri> for Input<MetadataUri> {
    fn from(value: MetadataUri) -> Self {
        Self::Fixed(value)
    }
}

impl From<NftRecord> for Input<NftRecord> {
    fn from(value: NftRecord) -> Self {
        Self::Fixed(value)
    }
}

#[derive(Debug, Clone, Copy)]
struct Dependency {
    plan: u64,
    step: usize,
    kind: &'static str,
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Step {
    /// Allocate and initialize a new mint owned by the identity.
    CreateMint { decimals: u8 },
    /// Resolve-or-create the associated token account of `owner` for `mint`.
    AssociatedAccount {
        owner: Input<Pubkey>,
        mint: Input<Pubkey>,
    },
    /// Resolve-or-create the metadata record of `mint`.
    TokenMetadata {
        mint: Input<Pubkey>,
        metadata: TokenMetadata,
    },
    MintTo {
        mint: Input<Pubkey>,
        destination: Input<Pubkey>,
        amount: u64,
    },
    Transfer {
        source: Input<Pubkey>,
        destination: Input<Pubkey>,
        amount: u64,
    },
    /// Upload an image and its metadata document.
    UploadMetadata { asset: NftAsset },
    CreateNft {
        uri: Input<MetadataUri>,
        metadata: TokenMetadata,
        collection: Option<Input<NftRecord>>,
        is_collection: bool,
    },
    VerifyCollection {
        nft: Input<NftRecord>,
        collection: Input<NftRecord>,
    },
    UpdateNftUri {
        nft: Input<NftRecord>,
        uri: Input<MetadataUri>,
    },
}

impl Step {
    /// Short name used in logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateMint { .. } => "create-mint",
            Self::AssociatedAccount { .. } => "associated-account",
            Self::TokenMetadata { .. } => "token-metadata",
            Self::MintTo { .. } => "mint-to",
            Self::Transfer { .. } => "transfer",
            Self::UploadMetadata { .. } => "upload-metadata",
            Self::CreateNft { .. } => "create-nft",
            Self::VerifyCollection { .. } => "verify-collection",
            Self::UpdateNftUri { .. } => "update-nft-uri",
        }
    }

    pub fn output_kind(&self) -> &'static str {
        match self {
            Self::CreateMint { .. }
            | Self::AssociatedAccount { .. }
            | Self::TokenMetadata { .. } => Pubkey::KIND,
            Self::MintTo { .. } | Self::Transfer { .. } | Self::UpdateNftUri { .. } => {
                TransactionResult::KIND
            }
            Self::UploadMetadata { .. } => MetadataUri::KIND,
            Self::CreateNft { .. } | Self::VerifyCollection { .. } => NftRecord::KIND,
        }
    }

    fn dependencies(&self) -> Vec<Dependency> {
        match self {
            Self::CreateMint { .. } | Self::UploadMetadata { .. } => Vec::new(),
            Self::AssociatedAccount { owner, mint } => {
                [owner.dependency(), mint.dependency()].into_iter().flatten().collect()
            }
            Self::TokenMetadata { mint, .. } => mint.dependency().into_iter().collect(),
            Self::MintTo {
                mint, destination, ..
            } => [mint.dependency(), destination.dependency()]
                .into_iter()
                .flatten()
                .collect(),
            Self::Transfer {
                source,
                destination,
                ..
            } => [source.dependency(), destination.dependency()]
                .into_iter()
                .flatten()
                .collect(),
            Self::CreateNft {
                uri, collection, ..
            } => [uri.dependency(), collection.as_ref().and_then(Input::dependency)]
                .into_iter()
                .flatten()
                .collect(),
            Self::VerifyCollection { nft, collection } => {
                [nft.dependency(), collection.dependency()].into_iter().flatten().collect()
            }
            Self::UpdateNftUri { nft, uri } => {
                [nft.dependency(), uri.dependency()].into_iter().flatten().collect()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub label: String,
    pub step: Step,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Plan {
    id: u64,
    name: String,
    steps: Vec<PlannedStep>,
}

impl Plan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_PLAN_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push<T: StepValue>(&mut self, label: impl Into<String>, step: Step) -> Handle<T> {
        debug_assert_eq!(step.output_kind(), T::KIND);
        self.steps.push(PlannedStep {
            label: label.into(),
            step,
        });
        Handle {
            plan: self.id,
            step: self.steps.len() - 1,
            _output: PhantomData,
        }
    }

    pub fn create_mint(&mut self, label: impl Into<String>, decimals: u8) -> Handle<Pubkey> {
        self.push(label, Step::CreateMint { decimals })
    }

    pub fn associated_account(
        &mut self,
        label: impl Into<String>,
        owner: impl Into<Input<Pubkey>>,
        mint: impl Into<Input<Pubkey>>,
    ) -> Handle<Pubkey> {
        self.push(
            label,
            Step::AssociatedAccount {
                owner: owner.into(),
                mint: mint.into(),
            },
        )
    }

    pub fn token_metadata(
        &mut self,
        label: impl Into<String>,
        mint: impl Into<Input<Pubkey>>,
        metadata: TokenMetadata,
    ) -> Handle<Pubkey> {
        self.push(
            label,
            Step::TokenMetadata {
                mint: mint.into(),
                metadata,
            },
        )
    }

    /// Mint `amount` minor units of `mint` into the token account `destination`.
    pub fn mint_to(
        &mut self,
        label: impl Into<String>,
        mint: impl Into<Input<Pubkey>>,
        destination: impl Into<Input<Pubkey>>,
        amount: u64,
    ) -> Handle<TransactionResult> {
        self.push(
            label,
            Step::MintTo {
                mint: mint.into(),
                destination: destination.into(),
                amount,
            },
        )
    }

    /// Move `amount` minor units between two token accounts of the same mint.
    pub fn transfer(
        &mut self,
        label: impl Into<String>,
        source: impl Into<Input<Pubkey>>,
        destination: impl Into<Input<Pubkey>>,
        amount: u64,
    ) -> Handle<TransactionResult> {
        self.push(
            label,
            Step::Transfer {
                source: source.into(),
                destination: destination.into(),
                amount,
            },
        )
    }

    pub fn upload_metadata(
        &mut self,
        label: impl Into<String>,
        asset: NftAsset,
    ) -> Handle<MetadataUri> {
        self.push(label, Step::UploadMetadata { asset })
    }

    /// A sized collection parent NFT.
    pub fn create_collection_nft(
        &mut self,
        label: impl Into<String>,
        uri: impl Into<Input<MetadataUri>>,
        metadata: TokenMetadata,
    ) -> Handle<NftRecord> {
        self.push(
            label,
            Step::CreateNft {
                uri: uri.into(),
                metadata,
                collection: None,
                is_collection: true,
            },
        )
    }

    /// A one-of-one NFT, optionally an (unverified) member of `collection`.
    pub fn create_nft(
        &mut self,
        label: impl Into<String>,
        uri: impl Into<Input<MetadataUri>>,
        metadata: TokenMetadata,
        collection: Option<Input<NftRecord>>,
    ) -> Handle<NftRecord> {
        self.push(
            label,
            Step::CreateNft {
                uri: uri.into(),
                metadata,
                collection,
                is_collection: false,
            },
        )
    }

    pub fn verify_collection(
        &mut self,
        label: impl Into<String>,
        nft: impl Into<Input<NftRecord>>,
        collection: impl Into<Input<NftRecord>>,
    ) -> Handle<NftRecord> {
        self.push(
            label,
            Step::VerifyCollection {
                nft: nft.into(),
                collection: collection.into(),
            },
        )
    }

    pub fn update_nft_uri(
        &mut self,
        label: impl Into<String>,
        nft: impl Into<Input<NftRecord>>,
        uri: impl Into<Input<MetadataUri>>,
    ) -> Handle<TransactionResult> {
        self.push(
            label,
            Step::UpdateNftUri {
                nft: nft.into(),
                uri: uri.into(),
            },
        )
    }

    /// Check that every handle points at an earlier step of this plan with
    /// a matching output. Returns the offending step index on failure.
    pub fn validate(&self) -> Result<(), (usize, LedgerError)> {
        for (index, planned) in self.steps.iter().enumerate() {
            for dep in planned.step.dependencies() {
                let reason = if dep.plan != self.id {
                    Some(format!(
                        "'{}' references step {} of another plan",
                        planned.label, dep.step
                    ))
                } else if dep.step >= index {
                    Some(format!(
                        "'{}' references step {} which does not run before it",
                        planned.label, dep.step
                    ))
                } else if self.steps[dep.step].step.output_kind() != dep.kind {
                    Some(format!(
                        "'{}' expects a {} from step {}",
                        planned.label, dep.kind, dep.step
                    ))
                } else {
                    None
                };
                if let Some(reason) = reason {
                    return Err((index, LedgerError::UnresolvedDependency(reason)));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_point_at_their_step() {
        let mut plan = Plan::new("tokens");
        let mint = plan.create_mint("mint", 2);
        let account = plan.associated_account("account", Pubkey::new_unique(), mint);
        plan.mint_to("mint-to", mint, account, 1000);

        assert_eq!(mint.step(), 0);
        assert_eq!(account.step(), 1);
        assert_eq!(mint.plan_id(), plan.id());
        assert_eq!(plan.len(), 3);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn plans_get_distinct_ids() {
        assert_ne!(Plan::new("a").id(), Plan::new("b").id());
    }

    #[test]
    fn foreign_handles_are_unresolved() {
        let mut other = Plan::new("other");
        let foreign = other.create_mint("mint", 0);

        let mut plan = Plan::new("plan");
        plan.associated_account("account", Pubkey::new_unique(), foreign);

        let (index, err) = plan.validate().unwrap_err();
        assert_eq!(index, 0);
        assert!(matches!(err, LedgerError::UnresolvedDependency(_)));
    }

    #[test]
    fn fixed_inputs_resolve_without_outputs() {
        let key = Pubkey::new_unique();
        let input: Input<Pubkey> = key.into();
        assert_eq!(input.resolve(&[]).unwrap(), key);
    }

    #[test]
    fn handle_resolution_checks_the_output_kind() {
        let mut plan = Plan::new("plan");
        let mint = plan.create_mint("mint", 0);
        let input: Input<Pubkey> = mint.into();

        let uri = StepOutput::Uri(MetadataUri("memory://0/x".into()));
        assert!(matches!(
            input.resolve(&[uri]),
            Err(LedgerError::UnresolvedDependency(_))
        ));
        let address = Pubkey::new_unique();
        assert_eq!(input.resolve(&[StepOutput::Address(address)]).unwrap(), address);
    }

    #[test]
    fn step_kinds_match_their_handles() {
        let mut plan = Plan::new("plan");
        let uri = plan.upload_metadata(
            "upload",
            NftAsset {
                name: "n".into(),
                symbol: "s".into(),
                description: String::new(),
                seller_fee_basis_points: 0,
                image: crate::storage::StorageFile::new("a.png", "image/png", vec![1]),
            },
        );
        let nft = plan.create_nft("nft", uri, TokenMetadata::new("n", "s", ""), None);
        plan.update_nft_uri("update", nft, uri);

        let kinds: Vec<_> = plan.steps().iter().map(|s| s.step.output_kind()).collect();
        assert_eq!(kinds, ["uri", "nft", "transaction"]);
    }
}
