//! Repository layer for PostgreSQL row operations
//!
//! Every function is generic over the executor so the same query runs
//! against the pool (autocommit) or inside an open transaction
//! (`&mut *tx`).

use sqlx::PgExecutor;

use crate::error::{FOREIGN_KEY_VIOLATION, LedgerError};
use crate::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, ListEntriesParams, ListTransfersParams, Transfer, UpdateAccountParams,
};

/// Account repository for CRUD operations
pub struct AccountRepository;

impl AccountRepository {
    /// Create a new account
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        params: &CreateAccountParams,
    ) -> Result<Account, LedgerError> {
        let account = sqlx::query_as::<_, Account>(
            r#"INSERT INTO accounts (owner, balance, currency)
               VALUES ($1, $2, $3)
               RETURNING id, owner, balance, currency, created_at"#,
        )
        .bind(&params.owner)
        .bind(params.balance)
        .bind(&params.currency)
        .fetch_one(executor)
        .await?;

        Ok(account)
    }

    /// Get account by ID
    pub async fn get<'e>(executor: impl PgExecutor<'e>, id: i64) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", id))
    }

    /// Overwrite the balance
    pub async fn update<'e>(
        executor: impl PgExecutor<'e>,
        params: UpdateAccountParams,
    ) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(
            r#"UPDATE accounts SET balance = $2
               WHERE id = $1
               RETURNING id, owner, balance, currency, created_at"#,
        )
        .bind(params.id)
        .bind(params.balance)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", params.id))
    }

    /// Delete an account that no entry or transfer references
    pub async fn delete<'e>(executor: impl PgExecutor<'e>, id: i64) -> Result<(), LedgerError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await
            .map_err(|e| {
                let referenced = matches!(
                    &e,
                    sqlx::Error::Database(db_err)
                        if db_err.code().as_deref() == Some(FOREIGN_KEY_VIOLATION)
                );
                if referenced {
                    LedgerError::Validation(format!(
                        "account {} is still referenced by entries or transfers",
                        id
                    ))
                } else {
                    LedgerError::from(e)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::not_found("account", id));
        }
        Ok(())
    }

    pub async fn list<'e>(
        executor: impl PgExecutor<'e>,
        params: ListAccountsParams,
    ) -> Result<Vec<Account>, LedgerError> {
        params.page.validate()?;
        let rows = sqlx::query_as::<_, Account>(
            r#"SELECT id, owner, balance, currency, created_at
               FROM accounts ORDER BY id
               LIMIT $1 OFFSET $2"#,
        )
        .bind(params.page.limit)
        .bind(params.page.offset)
        .fetch_all(executor)
        .await?;

        Ok(rows)
    }

    /// Atomic server-side increment: `balance = balance + delta`
    ///
    /// The UPDATE takes the row lock; it is held until the surrounding
    /// transaction ends.
    pub async fn add_balance<'e>(
        executor: impl PgExecutor<'e>,
        id: i64,
        delta: i64,
    ) -> Result<Account, LedgerError> {
        sqlx::query_as::<_, Account>(
            r#"UPDATE accounts SET balance = balance + $2
               WHERE id = $1
               RETURNING id, owner, balance, currency, created_at"#,
        )
        .bind(id)
        .bind(delta)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", id))
    }
}

/// Entry repository (insert and read only; entries are immutable)
pub struct EntryRepository;

impl EntryRepository {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        params: CreateEntryParams,
    ) -> Result<Entry, LedgerError> {
        let entry = sqlx::query_as::<_, Entry>(
            r#"INSERT INTO entries (account_id, amount)
               VALUES ($1, $2)
               RETURNING id, account_id, amount, created_at"#,
        )
        .bind(params.account_id)
        .bind(params.amount)
        .fetch_one(executor)
        .await?;

        Ok(entry)
    }

    pub async fn get<'e>(executor: impl PgExecutor<'e>, id: i64) -> Result<Entry, LedgerError> {
        sqlx::query_as::<_, Entry>(
            r#"SELECT id, account_id, amount, created_at
               FROM entries WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| LedgerError::not_found("entry", id))
    }

    pub async fn list<'e>(
        executor: impl PgExecutor<'e>,
        params: ListEntriesParams,
    ) -> Result<Vec<Entry>, LedgerError> {
        params.page.validate()?;
        let rows = sqlx::query_as::<_, Entry>(
            r#"SELECT id, account_id, amount, created_at
               FROM entries WHERE account_id = $1
               ORDER BY id
               LIMIT $2 OFFSET $3"#,
        )
        .bind(params.account_id)
        .bind(params.page.limit)
        .bind(params.page.offset)
        .fetch_all(executor)
        .await?;

        Ok(rows)
    }
}

/// Transfer repository (insert and read only)
pub struct TransferRepository;

impl TransferRepository {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        params: CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        let transfer = sqlx::query_as::<_, Transfer>(
            r#"INSERT INTO transfers (from_account_id, to_account_id, amount)
               VALUES ($1, $2, $3)
               RETURNING id, from_account_id, to_account_id, amount, created_at"#,
        )
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .fetch_one(executor)
        .await?;

        Ok(transfer)
    }

    pub async fn get<'e>(executor: impl PgExecutor<'e>, id: i64) -> Result<Transfer, LedgerError> {
        sqlx::query_as::<_, Transfer>(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| LedgerError::not_found("transfer", id))
    }

    /// Transfers sent by `from_account_id` or received by `to_account_id`
    pub async fn list<'e>(
        executor: impl PgExecutor<'e>,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, LedgerError> {
        params.page.validate()?;
        let rows = sqlx::query_as::<_, Transfer>(
            r#"SELECT id, from_account_id, to_account_id, amount, created_at
               FROM transfers
               WHERE from_account_id = $1 OR to_account_id = $2
               ORDER BY id
               LIMIT $3 OFFSET $4"#,
        )
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.page.limit)
        .bind(params.page.offset)
        .fetch_all(executor)
        .await?;

        Ok(rows)
    }
}
