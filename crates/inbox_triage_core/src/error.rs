//! crates/inbox_triage_core/src/error.rs
//!
//! Error types for the ledger controllers. Only operations that touch a port
//! can fail; the reward engine and entity mutators never do.

use crate::ports::PortError;
use crate::session::SessionPhase;

/// Why a batch could not be turned into a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    #[error("the item source returned no items")]
    EmptyBatch,
    #[error("fetch failed: {0}")]
    Failed(String),
}

/// The primary error type for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Batch retrieval failed or was empty. Retryable.
    #[error("Fetch failure: {0}")]
    Fetch(FetchFailure),

    /// A local save failed. The operation did not take effect.
    #[error("Persistence failure: {0}")]
    Persistence(#[source] PortError),

    /// The identity provider could not supply a user.
    #[error("Identity error: {0}")]
    Identity(#[source] PortError),

    #[error("Cannot {operation} while the session is {phase}")]
    InvalidTransition {
        operation: &'static str,
        phase: SessionPhase,
    },

    /// The client acted on an item that is not under the cursor.
    #[error("Item {0} is not the current item")]
    UnexpectedItem(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    /// Whether the user can simply retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Fetch(_))
    }
}

/// A convenience type alias for `Result<T, LedgerError>`.
pub type LedgerResult<T> = Result<T, LedgerError>;
