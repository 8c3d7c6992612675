//! PostgreSQL Record Store
//!
//! `PgSession` owns a `sqlx::Transaction`. sqlx rolls the transaction back
//! when it is dropped unfinished, which is what makes cancellation and
//! panics safe for [`run_atomic`](super::run_atomic).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use super::repository::{AccountRepository, EntryRepository, TransferRepository};
use super::{Session, Store};
use crate::error::LedgerError;
use crate::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, ListEntriesParams, ListTransfersParams, Transfer, UpdateAccountParams,
};

/// Transaction isolation level
///
/// READ COMMITTED is enough for the transfer path: every balance change is a
/// single `UPDATE ... SET balance = balance + $n`, which locks the row and
/// re-reads the latest committed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Settings applied at the start of every unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionOptions {
    pub isolation: IsolationLevel,
    /// `SET LOCAL lock_timeout`; `None` keeps the server default
    pub lock_timeout: Option<Duration>,
}

impl SessionOptions {
    /// Statements to run right after BEGIN, in order
    fn setup_statements(&self) -> Vec<String> {
        let mut statements = Vec::new();
        if self.isolation != IsolationLevel::ReadCommitted {
            statements.push(format!(
                "SET TRANSACTION ISOLATION LEVEL {}",
                self.isolation.as_sql()
            ));
        }
        if let Some(timeout) = self.lock_timeout {
            statements.push(format!(
                "SET LOCAL lock_timeout = '{}ms'",
                timeout.as_millis().max(1)
            ));
        }
        statements
    }
}

/// Record store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    options: SessionOptions,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_options(pool, SessionOptions::default())
    }

    pub fn with_options(pool: PgPool, options: SessionOptions) -> Self {
        Self { pool, options }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    type Session = PgSession;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<PgSession, LedgerError> {
        let mut tx = self.pool.begin().await?;
        for statement in self.options.setup_statements() {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        debug!(isolation = self.options.isolation.as_sql(), "Transaction started");
        Ok(PgSession { tx })
    }

    async fn find_account(&self, id: i64) -> Result<Option<Account>, LedgerError> {
        match AccountRepository::get(&self.pool, id).await {
            Ok(account) => Ok(Some(account)),
            Err(LedgerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// One open PostgreSQL transaction
pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Session for PgSession {
    async fn create_account(
        &mut self,
        params: CreateAccountParams,
    ) -> Result<Account, LedgerError> {
        AccountRepository::create(&mut *self.tx, &params).await
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, LedgerError> {
        AccountRepository::get(&mut *self.tx, id).await
    }

    async fn update_account(
        &mut self,
        params: UpdateAccountParams,
    ) -> Result<Account, LedgerError> {
        AccountRepository::update(&mut *self.tx, params).await
    }

    async fn delete_account(&mut self, id: i64) -> Result<(), LedgerError> {
        AccountRepository::delete(&mut *self.tx, id).await
    }

    async fn list_accounts(
        &mut self,
        params: ListAccountsParams,
    ) -> Result<Vec<Account>, LedgerError> {
        AccountRepository::list(&mut *self.tx, params).await
    }

    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, LedgerError> {
        AccountRepository::add_balance(&mut *self.tx, id, delta).await
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, LedgerError> {
        EntryRepository::create(&mut *self.tx, params).await
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, LedgerError> {
        EntryRepository::get(&mut *self.tx, id).await
    }

    async fn list_entries(
        &mut self,
        params: ListEntriesParams,
    ) -> Result<Vec<Entry>, LedgerError> {
        EntryRepository::list(&mut *self.tx, params).await
    }

    async fn create_transfer(
        &mut self,
        params: CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        TransferRepository::create(&mut *self.tx, params).await
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, LedgerError> {
        TransferRepository::get(&mut *self.tx, id).await
    }

    async fn list_transfers(
        &mut self,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, LedgerError> {
        TransferRepository::list(&mut *self.tx, params).await
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
