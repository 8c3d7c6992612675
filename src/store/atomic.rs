//! Transactional Session runner

use std::future::Future;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{Session, Store};
use crate::error::LedgerError;

/// Run `work` inside exactly one unit of work
///
/// - `work` succeeds: commit; a commit failure is returned as-is
/// - `work` fails: roll back, return the work's error unchanged
/// - the returned future is dropped or `work` panics: the session is dropped,
///   which rolls back and releases its locks
///
/// `work` must only capture owned data; the future it returns borrows the
/// session and nothing else.
///
/// ```ignore
/// let account = run_atomic(&store, move |s| Box::pin(async move {
///     s.add_account_balance(id, 10).await
/// })).await?;
/// ```
pub async fn run_atomic<S, T, F>(store: &S, work: F) -> Result<T, LedgerError>
where
    S: Store,
    T: Send,
    F: for<'s> FnOnce(&'s mut S::Session) -> BoxFuture<'s, Result<T, LedgerError>> + Send,
{
    run_atomic_until(store, std::future::pending::<()>(), work).await
}

/// [`run_atomic`] that abandons `work` as soon as `cancel` resolves
///
/// `cancel` is only raced against `work`. Once `work` has succeeded the
/// commit always runs to completion: a commit that reached the store is
/// never reported as `Cancelled`.
pub async fn run_atomic_until<S, T, F, C>(store: &S, cancel: C, work: F) -> Result<T, LedgerError>
where
    S: Store,
    T: Send,
    F: for<'s> FnOnce(&'s mut S::Session) -> BoxFuture<'s, Result<T, LedgerError>> + Send,
    C: Future<Output = ()> + Send,
{
    let mut session = store.begin().await?;

    let outcome = tokio::select! {
        biased;
        outcome = work(&mut session) => outcome,
        _ = cancel => Err(LedgerError::Cancelled(
            "unit of work abandoned before commit".to_string(),
        )),
    };

    match outcome {
        Ok(value) => {
            session.commit().await?;
            debug!(store = store.name(), "Unit of work committed");
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = session.rollback().await {
                // Dropped connection rolls back server-side; keep the original error
                warn!(
                    store = store.name(),
                    error = %rollback_err,
                    "Rollback failed after unit of work error"
                );
            }
            debug!(store = store.name(), error = %e, "Unit of work rolled back");
            Err(e)
        }
    }
}
