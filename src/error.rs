//! Ledger Error Types
//!
//! One taxonomy for the whole crate. Store failures are classified by
//! PostgreSQL SQLSTATE so callers can tell transient conflicts (retry the
//! whole transfer) from permanent failures.

use std::fmt;

use thiserror::Error;

/// Step of the transfer unit of work that produced an error
///
/// Errors raised while opening or committing the unit of work carry no step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStep {
    CreateTransfer,
    CreateFromEntry,
    CreateToEntry,
    /// First balance update (lower account id)
    FirstBalance,
    /// Second balance update (higher account id)
    SecondBalance,
}

impl TransferStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStep::CreateTransfer => "create_transfer",
            TransferStep::CreateFromEntry => "create_from_entry",
            TransferStep::CreateToEntry => "create_to_entry",
            TransferStep::FirstBalance => "first_balance_update",
            TransferStep::SecondBalance => "second_balance_update",
        }
    }
}

impl fmt::Display for TransferStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Storage,
    Cancelled,
}

#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    // === Caller Errors (no unit of work opened) ===
    #[error("Validation failed: {0}")]
    Validation(String),

    // === Store Errors (unit of work rolled back) ===
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock-wait timeout, serialization failure or detected deadlock
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Transfer failed at {step}: {source}")]
    Step {
        step: TransferStep,
        #[source]
        source: Box<LedgerError>,
    },
}

impl LedgerError {
    pub fn not_found(entity: &str, id: i64) -> Self {
        LedgerError::NotFound(format!("{} {}", entity, id))
    }

    /// Attach the failing transfer step
    pub fn at(self, step: TransferStep) -> Self {
        LedgerError::Step {
            step,
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::Storage(_) => ErrorKind::Storage,
            LedgerError::Cancelled(_) => ErrorKind::Cancelled,
            LedgerError::Step { source, .. } => source.kind(),
        }
    }

    /// Innermost failing step, if the error came out of a transfer
    pub fn step(&self) -> Option<TransferStep> {
        match self {
            LedgerError::Step { step, source } => source.step().or(Some(*step)),
            _ => None,
        }
    }

    /// Stable error code for callers and logs
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Storage => "STORAGE_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    /// Only conflicts are worth retrying the whole transfer for
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

// PostgreSQL SQLSTATE codes we classify explicitly
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";
pub(crate) const FOREIGN_KEY_VIOLATION: &str = "23503";

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => LedgerError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(
                    SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE | QUERY_CANCELED,
                ) => LedgerError::Conflict(db_err.message().to_string()),
                Some(FOREIGN_KEY_VIOLATION) => LedgerError::NotFound(db_err.message().to_string()),
                _ => LedgerError::Storage(e.to_string()),
            },
            _ => LedgerError::Storage(e.to_string()),
        }
    }
}
