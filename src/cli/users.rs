use crate::core::config::AppConfig;
use crate::core::feed::{FeedTransaction, TransactionLog};
use crate::core::ledger::{UserDirectory, UserProfile};
use crate::core::rules::RuleStore;
use anyhow::{Result, bail};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::info;

/// Registers a user and seeds the configured default rules.
pub async fn add_user<S>(store: &S, config: &AppConfig, id: &str, name: Option<&str>) -> Result<()>
where
    S: UserDirectory + RuleStore,
{
    let profile = UserProfile {
        id: id.to_string(),
        display_name: name.unwrap_or(id).to_string(),
        created_at: Utc::now(),
    };
    if !store.add_user(profile).await? {
        bail!("User {id} already exists");
    }
    for rule in &config.default_rules {
        store.put_rule(id, rule.clone()).await?;
    }
    info!(
        user_id = id,
        rules = config.default_rules.len(),
        "User created"
    );
    println!(
        "Created user {} with {} default rule(s)",
        id,
        config.default_rules.len()
    );
    Ok(())
}

/// Records a transaction in the local ledger's feed.
pub async fn add_income(
    log: &(dyn TransactionLog + Send + Sync),
    user_id: &str,
    transaction: IncomeInput,
    default_currency: &str,
) -> Result<()> {
    let transaction = FeedTransaction {
        id: transaction.id,
        date: transaction.date.unwrap_or_else(|| Utc::now().date_naive()),
        amount: transaction.amount,
        currency: transaction
            .currency
            .unwrap_or_else(|| default_currency.to_string()),
        description: transaction.description,
    };
    let id = transaction.id.clone();
    if !log.add_transaction(user_id, transaction).await? {
        bail!("Transaction {id} is already recorded");
    }
    println!("Recorded transaction {id}");
    Ok(())
}

#[derive(Debug, Clone)]
pub struct IncomeInput {
    pub id: String,
    pub amount: Decimal,
    /// Falls back to the configured currency.
    pub currency: Option<String>,
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
}
