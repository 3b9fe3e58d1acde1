//! Ledger error taxonomy.

use std::time::Duration;

/// Errors any step of a plan may fail with.
///
/// None of these are retried; the sequencer aborts the run on the first one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The signing identity (or a storage credential) could not be loaded.
    #[error("Missing secret {name}: {reason}")]
    MissingSecret { name: String, reason: String },

    /// A resource a step depends on does not exist on the ledger.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// The endpoint refused the transaction (fees, signatures, program error).
    #[error("Transaction rejected: {reason}")]
    TransactionRejected { reason: String, logs: Vec<String> },

    /// The transaction was sent but never reached the requested commitment.
    #[error("Transaction {signature} not confirmed after {waited:?}")]
    ConfirmationTimeout { signature: String, waited: Duration },

    /// The RPC endpoint or the metadata storage could not be reached.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A step references an output no earlier step produced.
    #[error("Unresolved dependency: {0}")]
    UnresolvedDependency(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl LedgerError {
    pub fn missing_secret(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingSecret {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::TransactionRejected {
            reason: reason.into(),
            logs: Vec::new(),
        }
    }

    /// Program logs attached by the endpoint, if any.
    pub fn logs(&self) -> &[String] {
        match self {
            Self::TransactionRejected { logs, .. } => logs,
            _ => &[],
        }
    }
}
