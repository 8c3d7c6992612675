//! Transfer request and result types

use serde::{Deserialize, Serialize};

use crate::models::{Account, Entry, Transfer};

/// Caller input for one money transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParams {
    pub from_account_id: i64,
    pub to_account_id: i64,
    /// Must be positive; signed so bad input is representable and rejected
    pub amount: i64,
}

impl TransferParams {
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }
}

/// Everything one committed transfer produced
///
/// Accounts are snapshots taken after both balance updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}
