//! Allocation engine and the seams it talks to the outside world through

pub mod allocation;
pub mod config;
pub mod error;
pub mod feed;
pub mod ledger;
pub mod log;
pub mod rules;
pub mod service;

// Re-export main types for cleaner imports
pub use allocation::{AllocationOutcome, allocate, distribute, round2};
pub use error::AllocationError;
pub use feed::{FeedTransaction, TransactionFeed, TransactionLog};
pub use ledger::{
    AllocationLedger, AllocationOutput, AllocationRecord, BucketBalance, CommitStatus,
    IncomeEvent, UserDirectory, UserProfile,
};
pub use rules::{AllocationRule, RuleSource, RuleStore};
pub use service::{AllocationService, SyncReport};
