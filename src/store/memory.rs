use crate::core::error::{AllocationError, Result};
use crate::core::feed::{FeedTransaction, TransactionFeed, TransactionLog};
use crate::core::ledger::{
    AllocationLedger, AllocationRecord, BucketBalance, CommitStatus, UserDirectory, UserProfile,
    apply_outputs,
};
use crate::core::rules::{AllocationRule, RuleSource, RuleStore, upsert_rule};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct LedgerState {
    users: HashMap<String, UserProfile>,
    rules: HashMap<String, Vec<AllocationRule>>,
    balances: HashMap<String, HashMap<String, BucketBalance>>,
    // Append order per user.
    records: HashMap<String, Vec<AllocationRecord>>,
    transactions: HashMap<String, Vec<FeedTransaction>>,
}

impl LedgerState {
    fn ensure_user(&self, user_id: &str) -> Result<()> {
        if self.users.contains_key(user_id) {
            Ok(())
        } else {
            Err(AllocationError::user_not_found(user_id))
        }
    }
}

/// In-memory ledger. Every operation holds one lock for its whole duration,
/// so a commit is atomic with respect to all other operations.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for MemoryLedger {
    async fn add_user(&self, profile: UserProfile) -> Result<bool> {
        let mut state = self.inner.lock().await;
        if state.users.contains_key(&profile.id) {
            return Ok(false);
        }
        debug!(user_id = %profile.id, "User ADD");
        state.rules.entry(profile.id.clone()).or_default();
        state.users.insert(profile.id.clone(), profile);
        Ok(true)
    }

    async fn user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let state = self.inner.lock().await;
        Ok(state.users.get(user_id).cloned())
    }
}

#[async_trait]
impl RuleSource for MemoryLedger {
    async fn rules(&self, user_id: &str) -> Result<Vec<AllocationRule>> {
        let state = self.inner.lock().await;
        state.ensure_user(user_id)?;
        Ok(state.rules.get(user_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl RuleStore for MemoryLedger {
    async fn put_rule(&self, user_id: &str, rule: AllocationRule) -> Result<()> {
        rule.validate()?;
        let mut state = self.inner.lock().await;
        state.ensure_user(user_id)?;
        debug!(user_id, rule_id = %rule.id, "Rule PUT");
        upsert_rule(state.rules.entry(user_id.to_string()).or_default(), rule);
        Ok(())
    }

    async fn remove_rule(&self, user_id: &str, rule_id: &str) -> Result<()> {
        let mut state = self.inner.lock().await;
        state.ensure_user(user_id)?;
        let rules = state.rules.entry(user_id.to_string()).or_default();
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        if rules.len() == before {
            return Err(AllocationError::rule_not_found(rule_id));
        }
        debug!(user_id, rule_id, "Rule REMOVE");
        Ok(())
    }
}

#[async_trait]
impl AllocationLedger for MemoryLedger {
    async fn commit(&self, user_id: &str, record: &AllocationRecord) -> Result<CommitStatus> {
        let mut state = self.inner.lock().await;
        state.ensure_user(user_id)?;

        if let Some(existing) = state
            .records
            .get(user_id)
            .and_then(|records| {
                records
                    .iter()
                    .find(|r| r.transaction_id == record.transaction_id)
            })
            .cloned()
        {
            return Ok(CommitStatus::Duplicate(existing));
        }

        // Credit a copy so a failed commit leaves no trace.
        let mut balances = state.balances.get(user_id).cloned().unwrap_or_default();
        apply_outputs(&mut balances, record)?;
        state.balances.insert(user_id.to_string(), balances);
        state
            .records
            .entry(user_id.to_string())
            .or_default()
            .push(record.clone());
        debug!(user_id, transaction_id = %record.transaction_id, "Allocation COMMIT");
        Ok(CommitStatus::Committed)
    }

    async fn record(
        &self,
        user_id: &str,
        transaction_id: &str,
    ) -> Result<Option<AllocationRecord>> {
        let state = self.inner.lock().await;
        Ok(state.records.get(user_id).and_then(|records| {
            records
                .iter()
                .find(|r| r.transaction_id == transaction_id)
                .cloned()
        }))
    }

    async fn records(&self, user_id: &str) -> Result<Vec<AllocationRecord>> {
        let state = self.inner.lock().await;
        state.ensure_user(user_id)?;
        let mut records = state.records.get(user_id).cloned().unwrap_or_default();
        records.reverse();
        Ok(records)
    }

    async fn balances(&self, user_id: &str) -> Result<Vec<BucketBalance>> {
        let state = self.inner.lock().await;
        state.ensure_user(user_id)?;
        let mut balances: Vec<BucketBalance> = state
            .balances
            .get(user_id)
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default();
        balances.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
        Ok(balances)
    }
}

#[async_trait]
impl TransactionLog for MemoryLedger {
    async fn add_transaction(&self, user_id: &str, transaction: FeedTransaction) -> Result<bool> {
        let mut state = self.inner.lock().await;
        state.ensure_user(user_id)?;
        let transactions = state.transactions.entry(user_id.to_string()).or_default();
        if transactions.iter().any(|t| t.id == transaction.id) {
            return Ok(false);
        }
        transactions.push(transaction);
        Ok(true)
    }
}

#[async_trait]
impl TransactionFeed for MemoryLedger {
    async fn transaction(
        &self,
        user_id: &str,
        id: &str,
    ) -> anyhow::Result<Option<FeedTransaction>> {
        let state = self.inner.lock().await;
        Ok(state
            .transactions
            .get(user_id)
            .and_then(|ts| ts.iter().find(|t| t.id == id).cloned()))
    }

    async fn transactions(&self, user_id: &str) -> anyhow::Result<Vec<FeedTransaction>> {
        let state = self.inner.lock().await;
        let mut transactions = state.transactions.get(user_id).cloned().unwrap_or_default();
        transactions.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::AllocationOutput;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn profile(id: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            display_name: id.to_string(),
            created_at: Utc::now(),
        }
    }

    fn record(transaction_id: &str, outputs: &[(&str, Decimal)]) -> AllocationRecord {
        AllocationRecord {
            id: format!("rec-{transaction_id}"),
            transaction_id: transaction_id.to_string(),
            executed_at: Utc::now(),
            currency: "USD".to_string(),
            total_income: dec!(100),
            outputs: outputs
                .iter()
                .map(|(rule_id, amount)| AllocationOutput {
                    rule_id: rule_id.to_string(),
                    name: rule_id.to_string(),
                    percentage: dec!(10),
                    amount: *amount,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let ledger = MemoryLedger::new();
        assert!(ledger.rules("nobody").await.unwrap_err().is_not_found());
        assert!(
            ledger
                .commit("nobody", &record("t1", &[("tax", dec!(1))]))
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_add_user_twice() {
        let ledger = MemoryLedger::new();
        assert!(ledger.add_user(profile("acme")).await.unwrap());
        assert!(!ledger.add_user(profile("acme")).await.unwrap());
        assert!(ledger.rules("acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rule_put_and_remove() {
        let ledger = MemoryLedger::new();
        ledger.add_user(profile("acme")).await.unwrap();
        ledger
            .put_rule("acme", AllocationRule::new("tax", "Tax", dec!(30)))
            .await
            .unwrap();
        ledger
            .put_rule("acme", AllocationRule::new("ads", "Ads", dec!(10)))
            .await
            .unwrap();

        let err = ledger
            .put_rule("acme", AllocationRule::new("bad", "Bad", dec!(-1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidRule(_)));

        ledger.remove_rule("acme", "tax").await.unwrap();
        let rules = ledger.rules("acme").await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "ads");

        assert!(
            ledger
                .remove_rule("acme", "tax")
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_commit_accumulates_and_rejects_duplicates() {
        let ledger = MemoryLedger::new();
        ledger.add_user(profile("acme")).await.unwrap();

        let first = record("t1", &[("tax", dec!(30)), ("save", dec!(10))]);
        assert_eq!(
            ledger.commit("acme", &first).await.unwrap(),
            CommitStatus::Committed
        );
        ledger
            .commit("acme", &record("t2", &[("tax", dec!(5.50))]))
            .await
            .unwrap();

        let dup = ledger
            .commit("acme", &record("t1", &[("tax", dec!(999))]))
            .await
            .unwrap();
        assert_eq!(dup, CommitStatus::Duplicate(first));

        let balances = ledger.balances("acme").await.unwrap();
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].rule_id, "save");
        assert_eq!(balances[0].balance, dec!(10));
        assert_eq!(balances[1].balance, dec!(35.50));

        let records = ledger.records("acme").await.unwrap();
        assert_eq!(records[0].transaction_id, "t2");
        assert_eq!(records[1].transaction_id, "t1");
        assert!(ledger.record("acme", "t1").await.unwrap().is_some());
        assert!(ledger.record("acme", "t3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overflowing_commit_writes_nothing() {
        let ledger = MemoryLedger::new();
        ledger.add_user(profile("acme")).await.unwrap();
        ledger
            .commit("acme", &record("t1", &[("tax", Decimal::MAX)]))
            .await
            .unwrap();

        let err = ledger
            .commit("acme", &record("t2", &[("save", dec!(5)), ("tax", dec!(1))]))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::BalanceOverflow { .. }));

        let balances = ledger.balances("acme").await.unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].balance, Decimal::MAX);
        assert!(ledger.record("acme", "t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_log() {
        let ledger = MemoryLedger::new();
        ledger.add_user(profile("acme")).await.unwrap();
        let txn = FeedTransaction {
            id: "t1".into(),
            date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            amount: dec!(250),
            currency: "USD".into(),
            description: None,
        };
        assert!(ledger.add_transaction("acme", txn.clone()).await.unwrap());
        assert!(!ledger.add_transaction("acme", txn.clone()).await.unwrap());

        assert_eq!(ledger.transaction("acme", "t1").await.unwrap(), Some(txn));
        assert!(ledger.transaction("acme", "t2").await.unwrap().is_none());
        assert_eq!(ledger.transactions("acme").await.unwrap().len(), 1);
    }
}
