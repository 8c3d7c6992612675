//! Ledger row types and store parameters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Balance-holding account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    /// Smallest currency unit (e.g. cents)
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable signed balance change on one account
///
/// Positive amount = credit, negative = debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entry {
    pub id: i64,
    pub account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Movement of `amount` from one account to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transfer {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateAccountParams {
    pub id: i64,
    pub balance: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateEntryParams {
    pub account_id: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateTransferParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

/// Paging window shared by every list operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.limit <= 0 {
            return Err(LedgerError::Validation(format!(
                "limit must be positive, got {}",
                self.limit
            )));
        }
        if self.offset < 0 {
            return Err(LedgerError::Validation(format!(
                "offset must not be negative, got {}",
                self.offset
            )));
        }
        Ok(())
    }

    /// Apply the window to an already ordered iterator
    pub fn slice<T>(&self, rows: impl Iterator<Item = T>) -> Vec<T> {
        rows.skip(self.offset.max(0) as usize)
            .take(self.limit.max(0) as usize)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListAccountsParams {
    pub page: Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListEntriesParams {
    pub account_id: i64,
    pub page: Page,
}

/// Transfers where `from_account_id` sent OR `to_account_id` received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListTransfersParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub page: Page,
}

impl ListTransfersParams {
    pub fn matches(&self, transfer: &Transfer) -> bool {
        transfer.from_account_id == self.from_account_id
            || transfer.to_account_id == self.to_account_id
    }
}
