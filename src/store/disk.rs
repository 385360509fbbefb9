use crate::core::error::{AllocationError, Result};
use crate::core::feed::{FeedTransaction, TransactionFeed, TransactionLog};
use crate::core::ledger::{
    AllocationLedger, AllocationRecord, BucketBalance, CommitStatus, UserDirectory, UserProfile,
};
use crate::core::rules::{AllocationRule, RuleSource, RuleStore, upsert_rule};
use async_trait::async_trait;
use fjall::{PartitionCreateOptions, TransactionalKeyspace, TransactionalPartitionHandle};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

/// Ledger persisted in a fjall keyspace.
///
/// Writes go through fjall's single-writer transactions, so a commit sees no
/// concurrent writer between reading a balance and writing it back, and the
/// record and its balance updates become visible together.
pub struct FjallLedger {
    keyspace: TransactionalKeyspace,
    users: TransactionalPartitionHandle,
    rules: TransactionalPartitionHandle,
    balances: TransactionalPartitionHandle,
    records: TransactionalPartitionHandle,
    transactions: TransactionalPartitionHandle,
}

// Per-user entries are keyed "<user>\0<id>" so a prefix scan lists one user.
fn scoped_key(user_id: &str, id: &str) -> String {
    format!("{user_id}\0{id}")
}

fn user_prefix(user_id: &str) -> String {
    format!("{user_id}\0")
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

impl FjallLedger {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path).map_err(|e| {
            AllocationError::Persistence(format!(
                "Failed to create ledger directory {}: {e}",
                path.display()
            ))
        })?;

        let keyspace = fjall::Config::new(path).open_transactional()?;
        let open = |name: &str| keyspace.open_partition(name, PartitionCreateOptions::default());
        let users = open("users")?;
        let rules = open("rules")?;
        let balances = open("balances")?;
        let records = open("records")?;
        let transactions = open("transactions")?;
        debug!("Opened ledger at {}", path.display());

        Ok(Self {
            keyspace,
            users,
            rules,
            balances,
            records,
            transactions,
        })
    }

    fn ensure_user(&self, user_id: &str) -> Result<()> {
        if self.keyspace.read_tx().get(&self.users, user_id)?.is_none() {
            return Err(AllocationError::user_not_found(user_id));
        }
        Ok(())
    }

    fn scan<T: DeserializeOwned>(
        &self,
        partition: &TransactionalPartitionHandle,
        user_id: &str,
    ) -> Result<Vec<T>> {
        let tx = self.keyspace.read_tx();
        let mut items = Vec::new();
        for entry in tx.prefix(partition, user_prefix(user_id)) {
            let (_, value) = entry?;
            items.push(decode(&value)?);
        }
        Ok(items)
    }

    fn load_rules(&self, user_id: &str) -> Result<Vec<AllocationRule>> {
        match self.keyspace.read_tx().get(&self.rules, user_id)? {
            Some(bytes) => decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    // Rule sets are small and stored as one ordered document per user.
    fn update_rules<F>(&self, user_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<AllocationRule>) -> Result<()>,
    {
        let mut tx = self.keyspace.write_tx();
        if tx.get(&self.users, user_id)?.is_none() {
            return Err(AllocationError::user_not_found(user_id));
        }
        let mut rules: Vec<AllocationRule> = match tx.get(&self.rules, user_id)? {
            Some(bytes) => decode(&bytes)?,
            None => Vec::new(),
        };
        update(&mut rules)?;
        tx.insert(&self.rules, user_id, serde_json::to_vec(&rules)?);
        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for FjallLedger {
    async fn add_user(&self, profile: UserProfile) -> Result<bool> {
        let mut tx = self.keyspace.write_tx();
        if tx.get(&self.users, &profile.id)?.is_some() {
            return Ok(false);
        }
        tx.insert(&self.users, profile.id.as_str(), serde_json::to_vec(&profile)?);
        tx.commit()?;
        debug!(user_id = %profile.id, "User ADD");
        Ok(true)
    }

    async fn user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        match self.keyspace.read_tx().get(&self.users, user_id)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RuleSource for FjallLedger {
    async fn rules(&self, user_id: &str) -> Result<Vec<AllocationRule>> {
        self.ensure_user(user_id)?;
        self.load_rules(user_id)
    }
}

#[async_trait]
impl RuleStore for FjallLedger {
    async fn put_rule(&self, user_id: &str, rule: AllocationRule) -> Result<()> {
        rule.validate()?;
        debug!(user_id, rule_id = %rule.id, "Rule PUT");
        self.update_rules(user_id, |rules| {
            upsert_rule(rules, rule);
            Ok(())
        })
    }

    async fn remove_rule(&self, user_id: &str, rule_id: &str) -> Result<()> {
        debug!(user_id, rule_id, "Rule REMOVE");
        self.update_rules(user_id, |rules| {
            let before = rules.len();
            rules.retain(|r| r.id != rule_id);
            if rules.len() == before {
                return Err(AllocationError::rule_not_found(rule_id));
            }
            Ok(())
        })
    }
}

#[async_trait]
impl AllocationLedger for FjallLedger {
    async fn commit(&self, user_id: &str, record: &AllocationRecord) -> Result<CommitStatus> {
        let mut tx = self.keyspace.write_tx();
        if tx.get(&self.users, user_id)?.is_none() {
            return Err(AllocationError::user_not_found(user_id));
        }

        let record_key = scoped_key(user_id, &record.transaction_id);
        if let Some(bytes) = tx.get(&self.records, &record_key)? {
            return Ok(CommitStatus::Duplicate(decode(&bytes)?));
        }
        tx.insert(&self.records, record_key.as_str(), serde_json::to_vec(record)?);

        for output in &record.outputs {
            let balance_key = scoped_key(user_id, &output.rule_id);
            let balance = match tx.get(&self.balances, &balance_key)? {
                Some(bytes) => {
                    let mut balance: BucketBalance = decode(&bytes)?;
                    balance.credit(output)?;
                    balance
                }
                None => BucketBalance::from(output),
            };
            tx.insert(
                &self.balances,
                balance_key.as_str(),
                serde_json::to_vec(&balance)?,
            );
        }

        tx.commit()?;
        debug!(user_id, transaction_id = %record.transaction_id, "Allocation COMMIT");
        Ok(CommitStatus::Committed)
    }

    async fn record(
        &self,
        user_id: &str,
        transaction_id: &str,
    ) -> Result<Option<AllocationRecord>> {
        let key = scoped_key(user_id, transaction_id);
        match self.keyspace.read_tx().get(&self.records, &key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn records(&self, user_id: &str) -> Result<Vec<AllocationRecord>> {
        self.ensure_user(user_id)?;
        let mut records: Vec<AllocationRecord> = self.scan(&self.records, user_id)?;
        records.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        Ok(records)
    }

    async fn balances(&self, user_id: &str) -> Result<Vec<BucketBalance>> {
        self.ensure_user(user_id)?;
        // Keys are "<user>\0<rule_id>", so scan order is rule id order.
        self.scan(&self.balances, user_id)
    }
}

#[async_trait]
impl TransactionLog for FjallLedger {
    async fn add_transaction(&self, user_id: &str, transaction: FeedTransaction) -> Result<bool> {
        let mut tx = self.keyspace.write_tx();
        if tx.get(&self.users, user_id)?.is_none() {
            return Err(AllocationError::user_not_found(user_id));
        }
        let key = scoped_key(user_id, &transaction.id);
        if tx.get(&self.transactions, &key)?.is_some() {
            return Ok(false);
        }
        tx.insert(
            &self.transactions,
            key.as_str(),
            serde_json::to_vec(&transaction)?,
        );
        tx.commit()?;
        Ok(true)
    }
}

#[async_trait]
impl TransactionFeed for FjallLedger {
    async fn transaction(
        &self,
        user_id: &str,
        id: &str,
    ) -> anyhow::Result<Option<FeedTransaction>> {
        let key = scoped_key(user_id, id);
        match self.keyspace.read_tx().get(&self.transactions, &key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn transactions(&self, user_id: &str) -> anyhow::Result<Vec<FeedTransaction>> {
        let mut transactions: Vec<FeedTransaction> = self.scan(&self.transactions, user_id)?;
        transactions.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        Ok(transactions)
    }
}
