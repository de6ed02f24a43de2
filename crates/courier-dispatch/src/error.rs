use std::time::Duration;

use thiserror::Error;

use courier_shared::WireError;
use courier_store::StoreError;

/// Errors surfaced by the dispatcher.
///
/// Collaborator failures are wrapped, never rewritten: the original error is
/// available through `source()`.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Conflicting send flags. Raised before any side effect.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Encryption layer error: {0}")]
    Encryption(#[source] anyhow::Error),

    #[error("Transport error: {0}")]
    Transport(#[source] anyhow::Error),

    #[error("Datasync error: {0}")]
    Datasync(#[source] anyhow::Error),

    /// The pre-dispatch hook refused the message.
    #[error("Pre-dispatch hook failed: {0}")]
    Hook(#[source] anyhow::Error),

    #[error("Shared secret handler failed: {0}")]
    SharedSecret(#[source] anyhow::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DispatchError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Data-integrity failures abandon a reassembly job for good.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::Store(
                StoreError::HashMismatch
                    | StoreError::InvalidSegmentCount { .. }
                    | StoreError::InvalidSegmentIndex { .. }
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;
