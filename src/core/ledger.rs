//! Ledger types: income events, allocation records and bucket balances,
//! plus the persistence seam the engine commits through.

use crate::core::error::{AllocationError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single incoming deposit to be split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeEvent {
    pub transaction_id: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationOutput {
    pub rule_id: String,
    pub name: String,
    /// The rule's configured percentage, before any normalisation.
    pub percentage: Decimal,
    pub amount: Decimal,
}

/// Append-only history entry, one per allocated transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub id: String,
    pub transaction_id: String,
    pub executed_at: DateTime<Utc>,
    pub currency: String,
    pub total_income: Decimal,
    pub outputs: Vec<AllocationOutput>,
}

impl AllocationRecord {
    pub fn allocated(&self) -> Decimal {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    /// Income left to the main account.
    pub fn remainder(&self) -> Decimal {
        self.total_income - self.allocated()
    }
}

/// Running total credited to one rule's bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketBalance {
    pub rule_id: String,
    pub name: String,
    pub balance: Decimal,
}

impl BucketBalance {
    pub fn credit(&mut self, output: &AllocationOutput) -> Result<()> {
        self.balance = self.balance.checked_add(output.amount).ok_or_else(|| {
            AllocationError::BalanceOverflow {
                rule_id: self.rule_id.clone(),
            }
        })?;
        self.name = output.name.clone();
        Ok(())
    }
}

impl From<&AllocationOutput> for BucketBalance {
    fn from(output: &AllocationOutput) -> Self {
        BucketBalance {
            rule_id: output.rule_id.clone(),
            name: output.name.clone(),
            balance: output.amount,
        }
    }
}

/// Applies every output of a record to a balance map keyed by rule id.
/// On error the map may be partially updated.
pub(crate) fn apply_outputs(
    balances: &mut HashMap<String, BucketBalance>,
    record: &AllocationRecord,
) -> Result<()> {
    for output in &record.outputs {
        match balances.get_mut(&output.rule_id) {
            Some(balance) => balance.credit(output)?,
            None => {
                balances.insert(output.rule_id.clone(), output.into());
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// Result of committing a record to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    Committed,
    /// A record for the same transaction already exists; nothing was written.
    Duplicate(AllocationRecord),
}

/// Persistence sink for allocations.
#[async_trait]
pub trait AllocationLedger: Send + Sync {
    /// Appends the record and credits every bucket it names in one atomic
    /// step. Balance increments must not be computed from a read taken
    /// outside the commit. A transaction id is committed at most once per user.
    async fn commit(&self, user_id: &str, record: &AllocationRecord) -> Result<CommitStatus>;

    async fn record(&self, user_id: &str, transaction_id: &str)
    -> Result<Option<AllocationRecord>>;

    /// Allocation history, newest first.
    async fn records(&self, user_id: &str) -> Result<Vec<AllocationRecord>>;

    /// Bucket balances ordered by rule id.
    async fn balances(&self, user_id: &str) -> Result<Vec<BucketBalance>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Registers a user. Returns false if the id was already taken.
    async fn add_user(&self, profile: UserProfile) -> Result<bool>;

    async fn user(&self, user_id: &str) -> Result<Option<UserProfile>>;
}
