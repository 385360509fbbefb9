//! Resolves feed transactions into income events and runs the engine on them.

use crate::core::allocation::{AllocationOutcome, allocate};
use crate::core::error::{AllocationError, Result};
use crate::core::feed::TransactionFeed;
use crate::core::ledger::{AllocationLedger, IncomeEvent};
use crate::core::rules::RuleSource;
use anyhow::anyhow;
use futures::future::join_all;
use tracing::{debug, info};

pub struct AllocationService<'a> {
    feed: &'a (dyn TransactionFeed + Send + Sync),
    rules: &'a (dyn RuleSource + Send + Sync),
    ledger: &'a (dyn AllocationLedger + Send + Sync),
}

#[derive(Debug)]
pub struct SyncEntry {
    pub transaction_id: String,
    pub result: Result<AllocationOutcome>,
}

/// Outcome of allocating every income transaction in the feed.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub entries: Vec<SyncEntry>,
    /// Feed entries that were not income.
    pub skipped: usize,
}

impl SyncReport {
    pub fn allocated(&self) -> usize {
        self.count(|r| matches!(r, Ok(AllocationOutcome::Allocated(_))))
    }

    pub fn already_allocated(&self) -> usize {
        self.count(|r| matches!(r, Ok(AllocationOutcome::AlreadyAllocated(_))))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| r.is_err())
    }

    fn count(&self, pred: impl Fn(&Result<AllocationOutcome>) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.result)).count()
    }
}

impl<'a> AllocationService<'a> {
    pub fn new(
        feed: &'a (dyn TransactionFeed + Send + Sync),
        rules: &'a (dyn RuleSource + Send + Sync),
        ledger: &'a (dyn AllocationLedger + Send + Sync),
    ) -> Self {
        Self {
            feed,
            rules,
            ledger,
        }
    }

    /// Allocates a single feed transaction by id.
    pub async fn process_transaction(
        &self,
        user_id: &str,
        transaction_id: &str,
    ) -> Result<AllocationOutcome> {
        let transaction = self
            .feed
            .transaction(user_id, transaction_id)
            .await
            .map_err(AllocationError::Feed)?
            .ok_or_else(|| AllocationError::transaction_not_found(transaction_id))?;
        if transaction.id != transaction_id {
            return Err(AllocationError::Feed(anyhow!(
                "Feed returned transaction {} when asked for {}",
                transaction.id,
                transaction_id
            )));
        }

        let event = transaction
            .as_income()
            .ok_or_else(|| AllocationError::NotIncome(transaction.id.clone()))?;
        debug!(user_id, transaction_id, amount = %event.amount, "Processing income");

        allocate(user_id, &event, self.rules, self.ledger).await
    }

    /// Allocates every income transaction the feed knows about. Transactions
    /// allocated earlier come back as `AlreadyAllocated`; `update_callback`
    /// fires once per transaction that reached the engine.
    pub async fn sync(
        &self,
        user_id: &str,
        update_callback: &(dyn Fn() + Send + Sync),
    ) -> Result<SyncReport> {
        // Unknown users fail here rather than once per transaction.
        self.rules.rules(user_id).await?;

        let transactions = self
            .feed
            .transactions(user_id)
            .await
            .map_err(AllocationError::Feed)?;
        let total = transactions.len();
        let income: Vec<IncomeEvent> = transactions.iter().filter_map(|t| t.as_income()).collect();
        let skipped = total - income.len();

        let futures = income.iter().map(|event| async move {
            let result = match self.ledger.record(user_id, &event.transaction_id).await {
                Ok(Some(existing)) => Ok(AllocationOutcome::AlreadyAllocated(existing)),
                Ok(None) => {
                    let result = allocate(user_id, event, self.rules, self.ledger).await;
                    update_callback();
                    result
                }
                Err(e) => Err(e),
            };
            SyncEntry {
                transaction_id: event.transaction_id.clone(),
                result,
            }
        });
        let report = SyncReport {
            entries: join_all(futures).await,
            skipped,
        };

        info!(
            user_id,
            allocated = report.allocated(),
            already_allocated = report.already_allocated(),
            failed = report.failed(),
            skipped,
            "Sync finished"
        );
        Ok(report)
    }

    /// Number of income transactions `sync` would send to the engine.
    pub async fn pending_income(&self, user_id: &str) -> Result<usize> {
        let transactions = self
            .feed
            .transactions(user_id)
            .await
            .map_err(AllocationError::Feed)?;
        let mut pending = 0;
        for event in transactions.iter().filter_map(|t| t.as_income()) {
            if self
                .ledger
                .record(user_id, &event.transaction_id)
                .await?
                .is_none()
            {
                pending += 1;
            }
        }
        Ok(pending)
    }
}
