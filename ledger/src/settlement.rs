//! # Settlement
//!
//! Balances move when a transaction record is created. Settlement is the
//! later, out-of-band pass that hands recorded transactions to whatever
//! downstream system needs them (clearing, reporting, an external core) and
//! flags each one `APPLIED` once that system has taken it.
//!
//! The worker never guesses what "apply" means. It passes a batch of pending
//! records to a [`SettlementHook`] and marks exactly the ids the hook
//! acknowledges. Anything not acknowledged stays pending and is offered again
//! on the next pass.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{Deadline, LedgerStore, StoreError};
use crate::types::{Transaction, TransactionId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("settlement hook failed: {0}")]
    Hook(String),

    /// The shutdown signal was received.
    #[error("settlement worker received shutdown signal")]
    Shutdown,
}

// ---------------------------------------------------------------------------
// Hook
// ---------------------------------------------------------------------------

/// Receives pending transactions and reports which ones it has applied.
#[async_trait]
pub trait SettlementHook: Send + Sync + 'static {
    /// Processes a batch, oldest first. Returns the ids that may be marked
    /// applied. An error leaves the whole batch pending.
    async fn apply(&self, batch: &[Transaction]) -> Result<Vec<TransactionId>, SettlementError>;
}

/// Acknowledges every record as-is. Balances already moved at transfer time,
/// so there is nothing further to apply locally.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcknowledgeHook;

#[async_trait]
impl SettlementHook for AcknowledgeHook {
    async fn apply(&self, batch: &[Transaction]) -> Result<Vec<TransactionId>, SettlementError> {
        Ok(batch.iter().map(|tx| tx.id).collect())
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Outcome of one settlement pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SettlementReport {
    /// Pending records offered to the hook.
    pub offered: usize,
    /// Records flagged applied.
    pub applied: usize,
}

/// Called after every pass that reached the store, with that pass's report.
pub type PassObserver = Box<dyn Fn(&SettlementReport) + Send + Sync>;

/// Periodically drains pending transactions through a [`SettlementHook`].
pub struct SettlementWorker<S, H> {
    store: Arc<S>,
    hook: H,
    batch_size: usize,
    observer: Option<PassObserver>,
}

impl<S: LedgerStore, H: SettlementHook> SettlementWorker<S, H> {
    pub fn new(store: Arc<S>, hook: H, batch_size: usize) -> Self {
        Self {
            store,
            hook,
            batch_size: batch_size.max(1),
            observer: None,
        }
    }

    /// Reports each pass to `observer`. `applied` in the report is what the
    /// store actually flipped, which can be less than what the hook
    /// acknowledged.
    pub fn with_observer(
        mut self,
        observer: impl Fn(&SettlementReport) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// One pass: fetch up to `batch_size` pending records, offer them to the
    /// hook, mark what it acknowledged.
    pub async fn run_once(&self) -> Result<SettlementReport, SettlementError> {
        let batch = self.store.pending_transactions(self.batch_size).await?;
        if batch.is_empty() {
            return Ok(SettlementReport::default());
        }

        let acknowledged = self.hook.apply(&batch).await?;
        let applied = self
            .store
            .mark_applied(&acknowledged, Deadline::NONE)
            .await?;

        debug!(
            offered = batch.len(),
            acknowledged = acknowledged.len(),
            applied,
            "settlement pass complete"
        );
        let report = SettlementReport {
            offered: batch.len(),
            applied,
        };
        if let Some(observer) = &self.observer {
            observer(&report);
        }
        Ok(report)
    }

    /// Passes until the pending queue is empty or the hook stops making
    /// progress.
    pub async fn drain(&self) -> Result<SettlementReport, SettlementError> {
        let mut total = SettlementReport::default();
        loop {
            let report = self.run_once().await?;
            total.offered += report.offered;
            total.applied += report.applied;
            if report.applied == 0 || report.offered < self.batch_size {
                return Ok(total);
            }
        }
    }

    /// Runs passes every `interval` until a shutdown signal is received.
    ///
    /// Failed passes are logged and retried on the next tick. Returns
    /// `Err(SettlementError::Shutdown)` on the clean exit path.
    pub async fn run(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), SettlementError> {
        info!(
            interval_ms = interval.as_millis() as u64,
            batch = self.batch_size,
            "settlement worker starting"
        );

        loop {
            if *shutdown.borrow() {
                info!("settlement worker received shutdown signal, exiting cleanly");
                return Err(SettlementError::Shutdown);
            }

            match self.drain().await {
                Ok(report) if report.offered > 0 => {
                    info!(
                        offered = report.offered,
                        applied = report.applied,
                        "settled pending transactions"
                    );
                }
                Ok(_) => debug!("no pending transactions"),
                Err(e) => warn!(error = %e, "settlement pass failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("settlement worker shutting down during sleep");
                    return Err(SettlementError::Shutdown);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryLedger, TransferRequest};
    use crate::types::TransactionStatus;

    // -- Helpers ------------------------------------------------------------

    /// Acknowledges only even ids.
    struct EvenHook;

    #[async_trait]
    impl SettlementHook for EvenHook {
        async fn apply(
            &self,
            batch: &[Transaction],
        ) -> Result<Vec<TransactionId>, SettlementError> {
            Ok(batch.iter().map(|t| t.id).filter(|id| id % 2 == 0).collect())
        }
    }

    /// Acknowledges the batch twice over plus an id that does not exist.
    struct OverEagerHook;

    #[async_trait]
    impl SettlementHook for OverEagerHook {
        async fn apply(
            &self,
            batch: &[Transaction],
        ) -> Result<Vec<TransactionId>, SettlementError> {
            let mut ids: Vec<_> = batch.iter().map(|t| t.id).collect();
            ids.extend(batch.iter().map(|t| t.id));
            ids.push(TransactionId::MAX);
            Ok(ids)
        }
    }

    struct FailingHook;

    #[async_trait]
    impl SettlementHook for FailingHook {
        async fn apply(&self, _: &[Transaction]) -> Result<Vec<TransactionId>, SettlementError> {
            Err(SettlementError::Hook("downstream unavailable".into()))
        }
    }

    async fn store_with_transfers(count: usize) -> (Arc<MemoryLedger>, Vec<TransactionId>) {
        let store = Arc::new(MemoryLedger::new());
        let a = store.get_or_create_owner(1, Deadline::NONE).await.unwrap();
        let b = store.get_or_create_owner(2, Deadline::NONE).await.unwrap();
        let sender = store.create_account(a.id, Deadline::NONE).await.unwrap();
        let receiver = store.create_account(b.id, Deadline::NONE).await.unwrap();
        store.seed_balance(sender.id, 1_000_000);

        let mut ids = Vec::new();
        for _ in 0..count {
            let tx = store
                .transfer(
                    TransferRequest {
                        sender_id: sender.id,
                        receiver_id: receiver.id,
                        amount_cents: 1,
                        description: String::new(),
                    },
                    Deadline::NONE,
                )
                .await
                .unwrap();
            ids.push(tx.id);
        }
        (store, ids)
    }

    // -- Tests --------------------------------------------------------------

    #[tokio::test]
    async fn acknowledge_hook_settles_everything() {
        let (store, ids) = store_with_transfers(5).await;
        let worker = SettlementWorker::new(Arc::clone(&store), AcknowledgeHook, 2);

        let report = worker.drain().await.unwrap();
        assert_eq!(report.applied, 5);
        assert!(store.pending_transactions(10).await.unwrap().is_empty());
        for id in ids {
            let tx = store.transaction(id).await.unwrap().unwrap();
            assert_eq!(tx.status, TransactionStatus::Applied);
        }
    }

    #[tokio::test]
    async fn only_acknowledged_ids_are_marked() {
        let (store, ids) = store_with_transfers(4).await;
        let worker = SettlementWorker::new(Arc::clone(&store), EvenHook, 10);

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.offered, 4);
        assert_eq!(report.applied, 2);

        let still_pending: Vec<_> = store
            .pending_transactions(10)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        let odd: Vec<_> = ids.into_iter().filter(|id| id % 2 == 1).collect();
        assert_eq!(still_pending, odd);
    }

    #[tokio::test]
    async fn observer_sees_what_the_store_changed() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (store, _) = store_with_transfers(3).await;
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let worker = SettlementWorker::new(Arc::clone(&store), OverEagerHook, 10)
            .with_observer(move |report| {
                counter.fetch_add(report.applied, Ordering::SeqCst);
            });

        let report = worker.run_once().await.unwrap();
        assert_eq!(report.applied, 3);
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        // Nothing left to flip on a second pass.
        assert_eq!(worker.run_once().await.unwrap().applied, 0);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hook_failure_leaves_batch_pending() {
        let (store, _) = store_with_transfers(3).await;
        let worker = SettlementWorker::new(Arc::clone(&store), FailingHook, 10);

        assert!(matches!(
            worker.run_once().await,
            Err(SettlementError::Hook(_))
        ));
        assert_eq!(store.pending_transactions(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op() {
        let store = Arc::new(MemoryLedger::new());
        let worker = SettlementWorker::new(store, AcknowledgeHook, 10);
        assert_eq!(worker.run_once().await.unwrap(), SettlementReport::default());
    }

    #[tokio::test]
    async fn shutdown_signal_stops_worker() {
        let (store, _) = store_with_transfers(1).await;
        let worker = SettlementWorker::new(Arc::clone(&store), AcknowledgeHook, 10);
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = shutdown_tx.send(true);
        });

        let result = worker.run(Duration::from_secs(60), shutdown_rx).await;
        assert!(matches!(result, Err(SettlementError::Shutdown)));
        assert!(store.pending_transactions(10).await.unwrap().is_empty());
    }
}
