//! Money Transfer
//!
//! Moves an amount between two accounts as one atomic unit of work.
//!
//! # Safety Invariants
//!
//! 1. **All-or-nothing**: the transfer row, both entries and both balance
//!    updates commit together or not at all
//! 2. **Store-side deltas**: balances change only via
//!    `balance = balance + delta`, never read-modify-write in memory
//! 3. **Lock order**: account rows are locked in ascending id order
//! 4. **No retries**: conflicts are returned to the caller, who may retry the
//!    whole transfer (each retry is a new transfer)

pub mod coordinator;
pub mod types;


// Re-exports for convenience
pub use coordinator::TransferCoordinator;
pub use types::{TransferParams, TransferResult};
