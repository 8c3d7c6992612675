//! Transfer Coordinator
//!
//! Runs one money transfer as a single unit of work:
//!
//! ```text
//! validate → BEGIN → transfer row → debit entry → credit entry
//!          → balance(lower id) → balance(higher id) → COMMIT
//! ```
//!
//! Balances change only through the store-side `balance = balance + delta`
//! primitive, so concurrent transfers cannot lose updates. Row locks are
//! always taken in ascending account-id order, so two transfers between the
//! same pair in opposite directions cannot wait on each other in a cycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::types::{TransferParams, TransferResult};
use crate::error::{LedgerError, TransferStep};
use crate::models::{Account, CreateEntryParams, CreateTransferParams};
use crate::store::{Session, Store, run_atomic_until};

/// Transfer Coordinator - stateless apart from its store handle
pub struct TransferCoordinator<S: Store> {
    store: Arc<S>,
    deadline: Option<Duration>,
}

impl<S: Store> Clone for TransferCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            deadline: self.deadline,
        }
    }
}

impl<S: Store> TransferCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            deadline: None,
        }
    }

    /// Bound every `transfer` call; expiry rolls back and returns `Cancelled`
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Move `amount` from one account to another
    pub async fn transfer(&self, params: TransferParams) -> Result<TransferResult, LedgerError> {
        match self.deadline {
            Some(deadline) => {
                self.transfer_until(params, tokio::time::sleep(deadline))
                    .await
            }
            None => {
                self.transfer_until(params, std::future::pending::<()>())
                    .await
            }
        }
    }

    /// Like [`transfer`](Self::transfer), abandoned as soon as `cancel` resolves
    ///
    /// An abandoned transfer is rolled back: nothing it wrote is committed.
    /// `cancel` is not raced against the commit itself, so a transfer that
    /// reached COMMIT is reported by its commit outcome, never as `Cancelled`.
    pub async fn transfer_until<C>(
        &self,
        params: TransferParams,
        cancel: C,
    ) -> Result<TransferResult, LedgerError>
    where
        C: Future<Output = ()> + Send,
    {
        let mut cancel = std::pin::pin!(cancel);

        let validated = tokio::select! {
            biased;
            validated = self.validate(&params) => validated,
            _ = cancel.as_mut() => Err(LedgerError::Cancelled(format!(
                "transfer {} -> {} abandoned before it started",
                params.from_account_id, params.to_account_id
            ))),
        };
        if let Err(e) = validated {
            info!(
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                code = e.code(),
                error = %e,
                "Transfer rejected"
            );
            return Err(e);
        }

        let result = run_atomic_until(self.store.as_ref(), cancel, move |session| {
            Box::pin(execute(session, params))
        })
        .await;

        match &result {
            Ok(r) => info!(
                transfer_id = r.transfer.id,
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                "Transfer committed"
            ),
            Err(e) => warn!(
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                code = e.code(),
                step = e.step().map(|s| s.as_str()),
                error = %e,
                "Transfer rolled back"
            ),
        }
        result
    }

    /// Caller errors, rejected before any unit of work opens
    async fn validate(&self, params: &TransferParams) -> Result<(), LedgerError> {
        if params.amount <= 0 {
            return Err(LedgerError::Validation(format!(
                "amount must be positive, got {}",
                params.amount
            )));
        }

        if params.from_account_id == params.to_account_id {
            return Err(LedgerError::Validation(format!(
                "source and destination account are both {}",
                params.from_account_id
            )));
        }

        let from = self.known_account(params.from_account_id).await?;
        let to = self.known_account(params.to_account_id).await?;

        if from.currency != to.currency {
            return Err(LedgerError::Validation(format!(
                "currency mismatch: account {} is {}, account {} is {}",
                from.id, from.currency, to.id, to.currency
            )));
        }

        Ok(())
    }

    async fn known_account(&self, id: i64) -> Result<Account, LedgerError> {
        self.store
            .find_account(id)
            .await?
            .ok_or_else(|| LedgerError::Validation(format!("unknown account {}", id)))
    }
}

/// Balance updates as `(account_id, delta, step)`, lower account id first
pub(crate) fn balance_updates(params: &TransferParams) -> [(i64, i64, TransferStep); 2] {
    let debit = (params.from_account_id, -params.amount);
    let credit = (params.to_account_id, params.amount);
    let (first, second) = if params.from_account_id < params.to_account_id {
        (debit, credit)
    } else {
        (credit, debit)
    };
    [
        (first.0, first.1, TransferStep::FirstBalance),
        (second.0, second.1, TransferStep::SecondBalance),
    ]
}

/// The unit of work body
async fn execute<T: Session>(
    session: &mut T,
    params: TransferParams,
) -> Result<TransferResult, LedgerError> {
    let transfer = session
        .create_transfer(CreateTransferParams {
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
        })
        .await
        .map_err(|e| e.at(TransferStep::CreateTransfer))?;

    let from_entry = session
        .create_entry(CreateEntryParams {
            account_id: params.from_account_id,
            amount: -params.amount,
        })
        .await
        .map_err(|e| e.at(TransferStep::CreateFromEntry))?;

    let to_entry = session
        .create_entry(CreateEntryParams {
            account_id: params.to_account_id,
            amount: params.amount,
        })
        .await
        .map_err(|e| e.at(TransferStep::CreateToEntry))?;

    let mut from_account = None;
    let mut to_account = None;
    for (account_id, delta, step) in balance_updates(&params) {
        debug!(transfer_id = transfer.id, account_id, delta, %step, "Applying balance delta");
        let account = session
            .add_account_balance(account_id, delta)
            .await
            .map_err(|e| e.at(step))?;
        if account_id == params.from_account_id {
            from_account = Some(account);
        } else {
            to_account = Some(account);
        }
    }

    match (from_account, to_account) {
        (Some(from_account), Some(to_account)) => Ok(TransferResult {
            transfer,
            from_entry,
            to_entry,
            from_account,
            to_account,
        }),
        _ => Err(LedgerError::Storage(format!(
            "transfer {} did not update both accounts",
            transfer.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;

    /// Formatted log output of the current thread's subscriber
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn coordinator() -> (TransferCoordinator<MemoryStore>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (TransferCoordinator::new(store.clone()), store)
    }

    #[test]
    fn test_balance_updates_lower_id_first() {
        let forward = balance_updates(&TransferParams::new(3, 7, 10));
        assert_eq!(forward[0], (3, -10, TransferStep::FirstBalance));
        assert_eq!(forward[1], (7, 10, TransferStep::SecondBalance));

        let backward = balance_updates(&TransferParams::new(7, 3, 10));
        assert_eq!(backward[0], (3, 10, TransferStep::FirstBalance));
        assert_eq!(backward[1], (7, -10, TransferStep::SecondBalance));
    }

    #[test]
    fn test_balance_updates_net_zero() {
        let updates = balance_updates(&TransferParams::new(9, 2, 55));
        assert_eq!(updates.iter().map(|u| u.1).sum::<i64>(), 0);
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let (coordinator, store) = coordinator();
        let x = store.seed_account("x", 100, "USD").id;
        let y = store.seed_account("y", 50, "USD").id;

        for amount in [0, -5] {
            let err = coordinator
                .transfer(TransferParams::new(x, y, amount))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
            assert_eq!(err.step(), None);
        }
        assert!(store.transfers().is_empty());
        assert!(store.entries().is_empty());
        assert_eq!(store.account(x).unwrap().balance, 100);
        assert_eq!(store.account(y).unwrap().balance, 50);
    }

    #[tokio::test]
    async fn test_same_account_rejected() {
        let (coordinator, store) = coordinator();
        let x = store.seed_account("x", 100, "USD").id;

        let err = coordinator
            .transfer(TransferParams::new(x, x, 10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(store.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_account_rejected_before_unit_of_work() {
        let (coordinator, store) = coordinator();
        let x = store.seed_account("x", 100, "USD").id;
        // A Begin fault would surface as Storage if a unit of work were opened
        store.fail_next(
            crate::store::StoreOp::Begin,
            LedgerError::Storage("should not begin".to_string()),
        );

        let err = coordinator
            .transfer(TransferParams::new(x, 9999, 10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("unknown account 9999"));
    }

    #[tokio::test]
    async fn test_currency_mismatch_rejected() {
        let (coordinator, store) = coordinator();
        let usd = store.seed_account("x", 100, "USD").id;
        let eur = store.seed_account("y", 100, "EUR").id;

        let err = coordinator
            .transfer(TransferParams::new(usd, eur, 10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(store.total_balance(), 200);
    }

    #[tokio::test]
    async fn test_rejection_logged_without_rollback() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (coordinator, store) = coordinator();
        let x = store.seed_account("x", 100, "USD").id;
        let y = store.seed_account("y", 100, "USD").id;

        coordinator
            .transfer(TransferParams::new(x, y, 0))
            .await
            .unwrap_err();

        let output = logs.contents();
        assert!(output.contains("Transfer rejected"), "{}", output);
        assert!(output.contains("VALIDATION_ERROR"), "{}", output);
        assert!(!output.contains("rolled back"), "{}", output);
        assert!(!output.contains("WARN"), "{}", output);
    }
}
