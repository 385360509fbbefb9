//! Upstream transaction feed abstractions

use crate::core::ledger::IncomeEvent;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A raw feed entry. Positive amounts are deposits, negative are withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedTransaction {
    pub id: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl FeedTransaction {
    /// Classifies the entry: deposits become income events, anything else
    /// is not allocated.
    pub fn as_income(&self) -> Option<IncomeEvent> {
        if self.amount <= Decimal::ZERO {
            return None;
        }
        Some(IncomeEvent {
            transaction_id: self.id.clone(),
            date: self.date,
            amount: self.amount,
            currency: self.currency.clone(),
        })
    }
}

#[async_trait]
pub trait TransactionFeed: Send + Sync {
    async fn transaction(&self, user_id: &str, id: &str) -> Result<Option<FeedTransaction>>;

    async fn transactions(&self, user_id: &str) -> Result<Vec<FeedTransaction>>;
}

/// A feed backed by the local ledger, filled in by hand.
#[async_trait]
pub trait TransactionLog: TransactionFeed {
    /// Returns false if a transaction with the same id is already recorded.
    async fn add_transaction(
        &self,
        user_id: &str,
        transaction: FeedTransaction,
    ) -> crate::core::error::Result<bool>;
}
