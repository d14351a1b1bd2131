// Error taxonomy for the ledger engine
//
// Display text is what callers see. Diagnostic detail is logged with tracing
// at the point of failure, not carried here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Rejected before any write was attempted
    #[error("invalid transaction: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("account {0} has transactions and cannot be closed")]
    HasTransactions(String),

    /// Atomic write or read failed; partial writes were rolled back
    #[error("storage failure: {0}")]
    Persistence(String),

    /// The store mutation committed but the journal files were not rewritten
    #[error("saved, but journal files could not be regenerated: {0}")]
    Projection(String),

    #[error("parse error in {location}: {message}")]
    Parse { location: String, message: String },
}

impl LedgerError {
    pub fn parse(location: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::Parse {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used by the HTTP envelope
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Duplicate(_) => "duplicate",
            LedgerError::HasTransactions(_) => "has_transactions",
            LedgerError::Persistence(_) => "persistence",
            LedgerError::Projection(_) => "projection",
            LedgerError::Parse { .. } => "parse",
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Persistence(err.to_string())
    }
}

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;
