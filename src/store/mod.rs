//! Record Store
//!
//! Two seams, both async traits:
//! - [`Session`]: one open unit of work. Every row operation runs inside it
//!   and becomes visible to other sessions only on [`Session::commit`].
//! - [`Store`]: opens sessions.
//!
//! Dropping a session without committing rolls it back and releases every
//! row lock it holds. [`run_atomic`] builds on that guarantee.
//!
//! Implementations:
//! - [`PgStore`] - PostgreSQL via sqlx
//! - [`MemoryStore`] - in-process, same locking semantics

pub mod atomic;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use atomic::{run_atomic, run_atomic_until};
pub use memory::{MemoryStore, StoreOp};
pub use postgres::{PgSession, PgStore};

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, ListEntriesParams, ListTransfersParams, Transfer, UpdateAccountParams,
};

/// One open unit of work against the record store
#[async_trait]
pub trait Session: Send {
    // === Account ===
    async fn create_account(&mut self, params: CreateAccountParams)
    -> Result<Account, LedgerError>;

    async fn get_account(&mut self, id: i64) -> Result<Account, LedgerError>;

    /// Overwrite the balance (administrative; transfers use `add_account_balance`)
    async fn update_account(&mut self, params: UpdateAccountParams)
    -> Result<Account, LedgerError>;

    async fn delete_account(&mut self, id: i64) -> Result<(), LedgerError>;

    async fn list_accounts(
        &mut self,
        params: ListAccountsParams,
    ) -> Result<Vec<Account>, LedgerError>;

    /// `balance = balance + delta` as one store-side statement
    ///
    /// Takes the account's row lock and holds it until the session ends.
    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, LedgerError>;

    // === Entry ===
    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, LedgerError>;

    async fn get_entry(&mut self, id: i64) -> Result<Entry, LedgerError>;

    async fn list_entries(&mut self, params: ListEntriesParams)
    -> Result<Vec<Entry>, LedgerError>;

    // === Transfer ===
    async fn create_transfer(
        &mut self,
        params: CreateTransferParams,
    ) -> Result<Transfer, LedgerError>;

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, LedgerError>;

    async fn list_transfers(
        &mut self,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, LedgerError>;

    // === Lifecycle ===
    async fn commit(self) -> Result<(), LedgerError>;

    async fn rollback(self) -> Result<(), LedgerError>;
}

/// Opens units of work
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Session: Session + 'static;

    /// Get store name for logging
    fn name(&self) -> &'static str;

    async fn begin(&self) -> Result<Self::Session, LedgerError>;

    /// Read one committed account outside any caller transaction
    async fn find_account(&self, id: i64) -> Result<Option<Account>, LedgerError>;
}
