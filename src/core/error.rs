//! Error taxonomy for allocation and ledger operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AllocationError>;

#[derive(Error, Debug)]
pub enum AllocationError {
    /// The referenced user or transaction has no corresponding record.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Transaction {0} is not an income deposit")]
    NotIncome(String),

    #[error("Invalid income amount for transaction {transaction_id}: {reason}")]
    InvalidAmount {
        transaction_id: String,
        reason: &'static str,
    },

    #[error("Invalid allocation rule: {0}")]
    InvalidRule(String),

    /// Crediting the bucket would exceed the representable range.
    #[error("Balance of bucket {rule_id} would overflow")]
    BalanceOverflow { rule_id: String },

    /// Any failure writing to or reading from the ledger. Never retried locally.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Transaction feed failure: {0}")]
    Feed(#[source] anyhow::Error),
}

impl AllocationError {
    pub fn user_not_found(user_id: &str) -> Self {
        AllocationError::NotFound {
            kind: "User",
            id: user_id.to_string(),
        }
    }

    pub fn transaction_not_found(transaction_id: &str) -> Self {
        AllocationError::NotFound {
            kind: "Transaction",
            id: transaction_id.to_string(),
        }
    }

    pub fn rule_not_found(rule_id: &str) -> Self {
        AllocationError::NotFound {
            kind: "Rule",
            id: rule_id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AllocationError::NotFound { .. })
    }
}

impl From<fjall::Error> for AllocationError {
    fn from(e: fjall::Error) -> Self {
        AllocationError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for AllocationError {
    fn from(e: serde_json::Error) -> Self {
        AllocationError::Persistence(format!("Corrupt ledger entry: {e}"))
    }
}
