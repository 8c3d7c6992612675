//! In-memory Record Store
//!
//! Mirrors the PostgreSQL semantics the transfer path relies on:
//! - writes are staged in the session and published on commit
//! - `add_account_balance`, `update_account` and `delete_account` take the
//!   account's row lock and hold it until the session ends
//! - inserts check that referenced accounts exist and take a key-share lock
//!   on them; `delete_account` needs the exclusive key lock, so it waits for
//!   pending inserts (PostgreSQL `FOR KEY SHARE`)
//! - lock waits are bounded; expiry is a `Conflict`
//!
//! Locks are tokio owned guards kept inside the session, so dropping a
//! session (rollback, cancellation, panic) releases them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::debug;

use super::{Session, Store};
use crate::error::LedgerError;
use crate::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListAccountsParams, ListEntriesParams, ListTransfersParams, Transfer, UpdateAccountParams,
};

/// Default bound on a single row-lock wait
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Store operations that can be made to fail with [`MemoryStore::fail_next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Begin,
    Commit,
    CreateAccount,
    GetAccount,
    UpdateAccount,
    DeleteAccount,
    ListAccounts,
    AddAccountBalance,
    CreateEntry,
    GetEntry,
    ListEntries,
    CreateTransfer,
    GetTransfer,
    ListTransfers,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
}

/// Locks of one account row
#[derive(Clone, Default)]
struct RowLock {
    /// Row lock for updates and deletes
    update: Arc<tokio::sync::Mutex<()>>,
    /// Shared by inserts that reference the row, exclusive for delete
    key: Arc<tokio::sync::RwLock<()>>,
}

impl RowLock {
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.update) == 1 && Arc::strong_count(&self.key) == 1
    }
}

struct Inner {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<i64, RowLock>>,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
    lock_timeout: Duration,
    /// Pending fault per op: calls left until it fires, and the error
    faults: Mutex<HashMap<StoreOp, (usize, LedgerError)>>,
    commit_ack_delay: Mutex<Option<Duration>>,
}

impl Inner {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn row_locks(&self) -> MutexGuard<'_, HashMap<i64, RowLock>> {
        self.row_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn row_lock(&self, id: i64) -> RowLock {
        self.row_locks().entry(id).or_default().clone()
    }

    /// Forget the locks of `ids` that nobody holds or waits on
    fn prune_row_locks(&self, ids: impl IntoIterator<Item = i64>) {
        let mut locks = self.row_locks();
        for id in ids {
            if locks.get(&id).is_some_and(RowLock::is_idle) {
                locks.remove(&id);
            }
        }
    }

    fn check_fault(&self, op: StoreOp) -> Result<(), LedgerError> {
        let mut faults = self
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some((remaining, _)) = faults.get_mut(&op) else {
            return Ok(());
        };
        if *remaining > 1 {
            *remaining -= 1;
            return Ok(());
        }
        match faults.remove(&op) {
            Some((_, err)) => {
                debug!(?op, error = %err, "Injected store fault");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn commit_ack_delay(&self) -> Option<Duration> {
        *self
            .commit_ack_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process record store
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                next_account_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                lock_timeout,
                faults: Mutex::new(HashMap::new()),
                commit_ack_delay: Mutex::new(None),
            }),
        }
    }

    /// Make the next `op` fail with `error` (one shot)
    pub fn fail_next(&self, op: StoreOp, error: LedgerError) {
        self.fail_nth(op, 1, error);
    }

    /// Let `nth - 1` calls of `op` through, then fail the next one (one shot)
    pub fn fail_nth(&self, op: StoreOp, nth: usize, error: LedgerError) {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(op, (nth.max(1), error));
    }

    /// Publish commits at once but return from `commit` only after `delay`
    ///
    /// Models a commit acknowledgement that is still in flight when the
    /// caller gives up.
    pub fn delay_commit_ack(&self, delay: Duration) {
        *self
            .inner
            .commit_ack_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(delay);
    }

    /// Insert a committed account directly
    pub fn seed_account(&self, owner: &str, balance: i64, currency: &str) -> Account {
        let account = Account {
            id: self.inner.next_account_id.fetch_add(1, Ordering::SeqCst),
            owner: owner.to_string(),
            balance,
            currency: currency.to_string(),
            created_at: Utc::now(),
        };
        self.inner
            .tables()
            .accounts
            .insert(account.id, account.clone());
        account
    }

    // === Committed-state snapshots ===

    pub fn account(&self, id: i64) -> Option<Account> {
        self.inner.tables().accounts.get(&id).cloned()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.inner.tables().entries.values().cloned().collect()
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.inner.tables().transfers.values().cloned().collect()
    }

    /// Sum of all committed balances
    pub fn total_balance(&self) -> i64 {
        self.inner
            .tables()
            .accounts
            .values()
            .map(|a| a.balance)
            .sum()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Session = MemorySession;

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<MemorySession, LedgerError> {
        self.inner.check_fault(StoreOp::Begin)?;
        Ok(MemorySession {
            inner: self.inner.clone(),
            row_guards: HashMap::new(),
            key_shares: HashMap::new(),
            key_guards: HashMap::new(),
            touched: BTreeSet::new(),
            accounts: BTreeMap::new(),
            entries: BTreeMap::new(),
            transfers: BTreeMap::new(),
        })
    }

    async fn find_account(&self, id: i64) -> Result<Option<Account>, LedgerError> {
        self.inner.check_fault(StoreOp::GetAccount)?;
        Ok(self.account(id))
    }
}

/// Unit of work on a [`MemoryStore`]
///
/// Staged rows are private to the session until commit.
pub struct MemorySession {
    inner: Arc<Inner>,
    row_guards: HashMap<i64, OwnedMutexGuard<()>>,
    key_shares: HashMap<i64, OwnedRwLockReadGuard<()>>,
    key_guards: HashMap<i64, OwnedRwLockWriteGuard<()>>,
    /// Every account whose locks this session asked for
    touched: BTreeSet<i64>,
    /// `None` marks a staged delete
    accounts: BTreeMap<i64, Option<Account>>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
}

/// Wait at most `timeout` for a lock on account `id`
async fn acquire<G>(
    timeout: Duration,
    id: i64,
    lock: impl Future<Output = G>,
) -> Result<G, LedgerError> {
    tokio::time::timeout(timeout, lock).await.map_err(|_| {
        LedgerError::Conflict(format!(
            "lock wait timeout on account {} after {:?}",
            id, timeout
        ))
    })
}

impl MemorySession {
    /// Acquire the account's row lock, once per session
    async fn lock_account(&mut self, id: i64) -> Result<(), LedgerError> {
        if self.row_guards.contains_key(&id) {
            return Ok(());
        }
        self.touched.insert(id);

        let lock = self.inner.row_lock(id).update;
        let guard = acquire(self.inner.lock_timeout, id, lock.lock_owned()).await?;
        self.row_guards.insert(id, guard);
        Ok(())
    }

    /// Key-share lock for an insert that references the account
    async fn share_account(&mut self, id: i64) -> Result<(), LedgerError> {
        if self.key_shares.contains_key(&id) || self.key_guards.contains_key(&id) {
            return Ok(());
        }
        self.touched.insert(id);

        let key = self.inner.row_lock(id).key;
        let guard = acquire(self.inner.lock_timeout, id, key.read_owned()).await?;
        self.key_shares.insert(id, guard);
        Ok(())
    }

    /// Exclusive key lock for a delete; waits for other sessions' inserts
    async fn lock_account_key(&mut self, id: i64) -> Result<(), LedgerError> {
        if self.key_guards.contains_key(&id) {
            return Ok(());
        }
        self.touched.insert(id);
        // Upgrade: this session's own share would block the write lock
        self.key_shares.remove(&id);

        let key = self.inner.row_lock(id).key;
        let guard = acquire(self.inner.lock_timeout, id, key.write_owned()).await?;
        self.key_guards.insert(id, guard);
        Ok(())
    }

    fn release_locks(&mut self) {
        self.row_guards.clear();
        self.key_shares.clear();
        self.key_guards.clear();
        let touched = std::mem::take(&mut self.touched);
        self.inner.prune_row_locks(touched);
    }

    /// Account as seen by this session
    fn visible_account(&self, id: i64) -> Option<Account> {
        match self.accounts.get(&id) {
            Some(staged) => staged.clone(),
            None => self.inner.tables().accounts.get(&id).cloned(),
        }
    }

    fn require_account(&self, id: i64) -> Result<Account, LedgerError> {
        self.visible_account(id)
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    fn visible_accounts(&self) -> Vec<Account> {
        let mut merged = self.inner.tables().accounts.clone();
        for (id, staged) in &self.accounts {
            match staged {
                Some(account) => {
                    merged.insert(*id, account.clone());
                }
                None => {
                    merged.remove(id);
                }
            }
        }
        merged.into_values().collect()
    }

    fn is_referenced(&self, account_id: i64) -> bool {
        let tables = self.inner.tables();
        let refers = |e: &Entry| e.account_id == account_id;
        let refers_transfer =
            |t: &Transfer| t.from_account_id == account_id || t.to_account_id == account_id;

        tables.entries.values().any(refers)
            || self.entries.values().any(refers)
            || tables.transfers.values().any(refers_transfer)
            || self.transfers.values().any(refers_transfer)
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn create_account(
        &mut self,
        params: CreateAccountParams,
    ) -> Result<Account, LedgerError> {
        self.inner.check_fault(StoreOp::CreateAccount)?;
        let id = self.inner.next_account_id.fetch_add(1, Ordering::SeqCst);
        self.lock_account(id).await?;

        let account = Account {
            id,
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        self.accounts.insert(id, Some(account.clone()));
        Ok(account)
    }

    async fn get_account(&mut self, id: i64) -> Result<Account, LedgerError> {
        self.inner.check_fault(StoreOp::GetAccount)?;
        tokio::task::yield_now().await;
        self.require_account(id)
    }

    async fn update_account(
        &mut self,
        params: UpdateAccountParams,
    ) -> Result<Account, LedgerError> {
        self.inner.check_fault(StoreOp::UpdateAccount)?;
        self.lock_account(params.id).await?;

        let mut account = self.require_account(params.id)?;
        account.balance = params.balance;
        self.accounts.insert(params.id, Some(account.clone()));
        Ok(account)
    }

    async fn delete_account(&mut self, id: i64) -> Result<(), LedgerError> {
        self.inner.check_fault(StoreOp::DeleteAccount)?;
        self.lock_account(id).await?;
        self.lock_account_key(id).await?;

        self.require_account(id)?;
        if self.is_referenced(id) {
            return Err(LedgerError::Validation(format!(
                "account {} is still referenced by entries or transfers",
                id
            )));
        }
        self.accounts.insert(id, None);
        Ok(())
    }

    async fn list_accounts(
        &mut self,
        params: ListAccountsParams,
    ) -> Result<Vec<Account>, LedgerError> {
        self.inner.check_fault(StoreOp::ListAccounts)?;
        params.page.validate()?;
        Ok(params.page.slice(self.visible_accounts().into_iter()))
    }

    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, LedgerError> {
        self.inner.check_fault(StoreOp::AddAccountBalance)?;
        self.lock_account(id).await?;
        // Let contending sessions run while the lock is held
        tokio::task::yield_now().await;

        let mut account = self.require_account(id)?;
        account.balance = account.balance.checked_add(delta).ok_or_else(|| {
            LedgerError::Storage(format!("balance overflow on account {}", id))
        })?;
        self.accounts.insert(id, Some(account.clone()));
        Ok(account)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry, LedgerError> {
        self.inner.check_fault(StoreOp::CreateEntry)?;
        tokio::task::yield_now().await;
        self.share_account(params.account_id).await?;
        self.require_account(params.account_id)?;

        let entry = Entry {
            id: self.inner.next_entry_id.fetch_add(1, Ordering::SeqCst),
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, LedgerError> {
        self.inner.check_fault(StoreOp::GetEntry)?;
        if let Some(entry) = self.entries.get(&id) {
            return Ok(entry.clone());
        }
        self.inner
            .tables()
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("entry", id))
    }

    async fn list_entries(
        &mut self,
        params: ListEntriesParams,
    ) -> Result<Vec<Entry>, LedgerError> {
        self.inner.check_fault(StoreOp::ListEntries)?;
        params.page.validate()?;

        let mut merged = self.inner.tables().entries.clone();
        merged.extend(self.entries.iter().map(|(id, e)| (*id, e.clone())));
        Ok(params.page.slice(
            merged
                .into_values()
                .filter(|e| e.account_id == params.account_id),
        ))
    }

    async fn create_transfer(
        &mut self,
        params: CreateTransferParams,
    ) -> Result<Transfer, LedgerError> {
        self.inner.check_fault(StoreOp::CreateTransfer)?;
        tokio::task::yield_now().await;
        let (low, high) = if params.from_account_id < params.to_account_id {
            (params.from_account_id, params.to_account_id)
        } else {
            (params.to_account_id, params.from_account_id)
        };
        self.share_account(low).await?;
        self.share_account(high).await?;
        self.require_account(params.from_account_id)?;
        self.require_account(params.to_account_id)?;

        let transfer = Transfer {
            id: self.inner.next_transfer_id.fetch_add(1, Ordering::SeqCst),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, LedgerError> {
        self.inner.check_fault(StoreOp::GetTransfer)?;
        if let Some(transfer) = self.transfers.get(&id) {
            return Ok(transfer.clone());
        }
        self.inner
            .tables()
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("transfer", id))
    }

    async fn list_transfers(
        &mut self,
        params: ListTransfersParams,
    ) -> Result<Vec<Transfer>, LedgerError> {
        self.inner.check_fault(StoreOp::ListTransfers)?;
        params.page.validate()?;

        let mut merged = self.inner.tables().transfers.clone();
        merged.extend(self.transfers.iter().map(|(id, t)| (*id, t.clone())));
        Ok(params
            .page
            .slice(merged.into_values().filter(|t| params.matches(t))))
    }

    async fn commit(mut self) -> Result<(), LedgerError> {
        self.inner.check_fault(StoreOp::Commit)?;

        let accounts = std::mem::take(&mut self.accounts);
        let entries = std::mem::take(&mut self.entries);
        let transfers = std::mem::take(&mut self.transfers);
        {
            let mut tables = self.inner.tables();
            for (id, staged) in accounts {
                match staged {
                    Some(account) => {
                        tables.accounts.insert(id, account);
                    }
                    None => {
                        tables.accounts.remove(&id);
                    }
                }
            }
            tables.entries.extend(entries);
            tables.transfers.extend(transfers);
        }
        self.release_locks();

        if let Some(delay) = self.inner.commit_ack_delay() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release_locks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::Page;

    #[tokio::test]
    async fn test_staged_writes_invisible_until_commit() {
        let store = MemoryStore::new();
        let account = store.seed_account("alice", 100, "USD");

        let mut session = store.begin().await.unwrap();
        let updated = session.add_account_balance(account.id, 50).await.unwrap();
        assert_eq!(updated.balance, 150);
        assert_eq!(store.account(account.id).unwrap().balance, 100);

        session.commit().await.unwrap();
        assert_eq!(store.account(account.id).unwrap().balance, 150);
    }

    #[tokio::test]
    async fn test_drop_discards_and_unlocks() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(200));
        let account = store.seed_account("alice", 100, "USD");

        {
            let mut session = store.begin().await.unwrap();
            session.add_account_balance(account.id, -30).await.unwrap();
        }

        let mut session = store.begin().await.unwrap();
        let updated = session.add_account_balance(account.id, 1).await.unwrap();
        assert_eq!(updated.balance, 101);
    }

    #[tokio::test]
    async fn test_lock_wait_timeout_is_conflict() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let account = store.seed_account("alice", 100, "USD");

        let mut holder = store.begin().await.unwrap();
        holder.add_account_balance(account.id, 10).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.add_account_balance(account.id, 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        holder.commit().await.unwrap();
        let updated = waiter.add_account_balance(account.id, 10).await.unwrap();
        assert_eq!(updated.balance, 120);
    }

    #[tokio::test]
    async fn test_unordered_locking_surfaces_conflict_not_hang() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(100));
        let a = store.seed_account("a", 100, "USD").id;
        let b = store.seed_account("b", 100, "USD").id;

        let mut s1 = store.begin().await.unwrap();
        let mut s2 = store.begin().await.unwrap();
        s1.add_account_balance(a, -10).await.unwrap();
        s2.add_account_balance(b, -10).await.unwrap();

        let (r1, r2) = tokio::join!(s1.add_account_balance(b, 10), s2.add_account_balance(a, 10));
        assert_eq!(r1.unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(r2.unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_entry_requires_existing_account() {
        let store = MemoryStore::new();
        let mut session = store.begin().await.unwrap();

        let err = session
            .create_entry(CreateEntryParams {
                account_id: 999,
                amount: 10,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_crud_round_trip() {
        let store = MemoryStore::new();
        let mut session = store.begin().await.unwrap();

        let account = session
            .create_account(CreateAccountParams {
                owner: "bob".to_string(),
                balance: 500,
                currency: "EUR".to_string(),
            })
            .await
            .unwrap();
        assert!(account.id > 0);

        let fetched = session.get_account(account.id).await.unwrap();
        assert_eq!(fetched, account);

        let updated = session
            .update_account(UpdateAccountParams {
                id: account.id,
                balance: 42,
            })
            .await
            .unwrap();
        assert_eq!(updated.balance, 42);
        assert_eq!(updated.owner, "bob");
        session.commit().await.unwrap();

        let mut session = store.begin().await.unwrap();
        session.delete_account(account.id).await.unwrap();
        let err = session.get_account(account.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        session.commit().await.unwrap();
        assert!(store.account(account.id).is_none());
    }

    #[tokio::test]
    async fn test_delete_referenced_account_rejected() {
        let store = MemoryStore::new();
        let account = store.seed_account("carol", 10, "USD");

        let mut session = store.begin().await.unwrap();
        session
            .create_entry(CreateEntryParams {
                account_id: account.id,
                amount: 5,
            })
            .await
            .unwrap();
        let err = session.delete_account(account.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_delete_waits_for_pending_insert() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let account = store.seed_account("dave", 10, "USD");

        let mut writer = store.begin().await.unwrap();
        writer
            .create_entry(CreateEntryParams {
                account_id: account.id,
                amount: 5,
            })
            .await
            .unwrap();

        let mut deleter = store.begin().await.unwrap();
        let err = deleter.delete_account(account.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        deleter.rollback().await.unwrap();

        writer.commit().await.unwrap();
        assert!(store.account(account.id).is_some());
        assert_eq!(store.entries().len(), 1);

        let mut deleter = store.begin().await.unwrap();
        let err = deleter.delete_account(account.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_insert_after_committed_delete_is_not_found() {
        let store = MemoryStore::with_lock_timeout(Duration::from_secs(1));
        let account = store.seed_account("erin", 10, "USD");

        let mut deleter = store.begin().await.unwrap();
        deleter.delete_account(account.id).await.unwrap();

        let writer_store = store.clone();
        let insert = tokio::spawn(async move {
            let mut writer = writer_store.begin().await.unwrap();
            writer
                .create_transfer(CreateTransferParams {
                    from_account_id: account.id,
                    to_account_id: account.id,
                    amount: 1,
                })
                .await
                .map(|_| ())
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        deleter.commit().await.unwrap();

        let err = insert.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(store.account(account.id).is_none());
        assert!(store.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_idle_row_locks_are_forgotten() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let account = store.seed_account("frank", 10, "USD");
        let lock_count = |store: &MemoryStore| store.inner.row_locks().len();

        let mut session = store.begin().await.unwrap();
        session.add_account_balance(account.id, 1).await.unwrap();
        session
            .create_entry(CreateEntryParams {
                account_id: account.id,
                amount: 1,
            })
            .await
            .unwrap();
        let err = session.add_account_balance(9999, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(lock_count(&store), 2);

        let mut waiter = store.begin().await.unwrap();
        waiter.add_account_balance(account.id, 1).await.unwrap_err();
        drop(waiter);
        assert_eq!(lock_count(&store), 2);

        session.commit().await.unwrap();
        assert_eq!(lock_count(&store), 0);

        let mut session = store.begin().await.unwrap();
        session.add_account_balance(account.id, 1).await.unwrap();
        session.rollback().await.unwrap();
        assert_eq!(lock_count(&store), 0);
    }

    #[tokio::test]
    async fn test_list_accounts_paging() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.seed_account(&format!("owner{}", i), i, "USD");
        }

        let mut session = store.begin().await.unwrap();
        let accounts = session
            .list_accounts(ListAccountsParams {
                page: Page::new(5, 5),
            })
            .await
            .unwrap();
        assert_eq!(accounts.len(), 5);
        assert_eq!(accounts[0].owner, "owner5");
    }

    #[tokio::test]
    async fn test_list_transfers_either_direction() {
        let store = MemoryStore::new();
        let a = store.seed_account("a", 1000, "USD").id;
        let b = store.seed_account("b", 1000, "USD").id;
        let c = store.seed_account("c", 1000, "USD").id;

        let mut session = store.begin().await.unwrap();
        for _ in 0..5 {
            for (from, to) in [(a, b), (b, a), (b, c)] {
                session
                    .create_transfer(CreateTransferParams {
                        from_account_id: from,
                        to_account_id: to,
                        amount: 10,
                    })
                    .await
                    .unwrap();
            }
        }
        session.commit().await.unwrap();

        let mut session = store.begin().await.unwrap();
        let transfers = session
            .list_transfers(ListTransfersParams {
                from_account_id: a,
                to_account_id: a,
                page: Page::new(5, 5),
            })
            .await
            .unwrap();
        assert_eq!(transfers.len(), 5);
        assert!(
            transfers
                .iter()
                .all(|t| t.from_account_id == a || t.to_account_id == a)
        );
    }

    #[tokio::test]
    async fn test_fault_is_one_shot() {
        let store = MemoryStore::new();
        store.fail_next(StoreOp::Begin, LedgerError::Storage("down".to_string()));

        assert!(store.begin().await.is_err());
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_nth_skips_earlier_calls() {
        let store = MemoryStore::new();
        store.fail_nth(StoreOp::Begin, 3, LedgerError::Storage("down".to_string()));

        assert!(store.begin().await.is_ok());
        assert!(store.begin().await.is_ok());
        assert!(store.begin().await.is_err());
        assert!(store.begin().await.is_ok());
    }
}
