//! Percentage-based income allocation.
//!
//! An income event is split across the user's rules: every rule with a
//! positive percentage receives `round2(income * percentage / 100)`. When the
//! percentages add up to more than 100 the amounts are rescaled by
//! `100 / total` so that nothing beyond the income is handed out. Whatever is
//! left under 100% stays in the main account and is not tracked here.

use crate::core::error::{AllocationError, Result};
use crate::core::ledger::{
    AllocationLedger, AllocationOutput, AllocationRecord, CommitStatus, IncomeEvent,
};
use crate::core::rules::{AllocationRule, RuleSource};
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationOutcome {
    Allocated(AllocationRecord),
    /// The transaction was allocated before; carries the original record.
    AlreadyAllocated(AllocationRecord),
    /// The user has no rule with a positive percentage. Nothing was written.
    NoRulesConfigured,
}

impl AllocationOutcome {
    pub fn record(&self) -> Option<&AllocationRecord> {
        match self {
            AllocationOutcome::Allocated(r) | AllocationOutcome::AlreadyAllocated(r) => Some(r),
            AllocationOutcome::NoRulesConfigured => None,
        }
    }
}

/// Rounds half away from zero to currency minor units.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Computes the per-rule split of `income` without touching any store.
///
/// Outputs keep rule order and never sum above `income`. Returns `None` when
/// an amount does not fit in a `Decimal`.
pub fn distribute(income: Decimal, rules: &[AllocationRule]) -> Option<Vec<AllocationOutput>> {
    let income = income.abs();
    let mut total_percentage = Decimal::ZERO;
    let mut outputs = Vec::new();

    for rule in rules.iter().filter(|rule| rule.percentage > Decimal::ZERO) {
        total_percentage = total_percentage.checked_add(rule.percentage)?;
        let share = rule.percentage.checked_div(Decimal::ONE_HUNDRED)?;
        outputs.push(AllocationOutput {
            rule_id: rule.id.clone(),
            name: rule.name.clone(),
            percentage: rule.percentage,
            amount: round2(income.checked_mul(share)?),
        });
    }

    if total_percentage > Decimal::ONE_HUNDRED {
        let factor = Decimal::ONE_HUNDRED.checked_div(total_percentage)?;
        debug!(%total_percentage, %factor, "Rules over-allocate income, rescaling");
        for output in &mut outputs {
            output.amount = round2(output.amount.checked_mul(factor)?);
        }
    }

    trim_excess(&mut outputs, income)?;
    Some(outputs)
}

// Per-rule rounding can overshoot the income by a few cents. Take them back
// from the largest outputs, later rules first on ties.
fn trim_excess(outputs: &mut [AllocationOutput], income: Decimal) -> Option<()> {
    let cent = Decimal::new(1, 2);
    let total = outputs
        .iter()
        .try_fold(Decimal::ZERO, |acc, o| acc.checked_add(o.amount))?;
    let mut excess = total.checked_sub(income)?;
    while excess > Decimal::ZERO {
        let Some(largest) = outputs.iter_mut().max_by_key(|o| o.amount) else {
            break;
        };
        if largest.amount <= Decimal::ZERO {
            break;
        }
        let step = cent.min(largest.amount);
        debug!(rule_id = %largest.rule_id, %step, "Trimming rounding excess");
        largest.amount -= step;
        excess -= step;
    }
    Some(())
}

/// Allocates one income event for `user_id`.
///
/// The record and the balance increments are committed together by the
/// ledger, which also rejects a second commit for the same transaction.
pub async fn allocate(
    user_id: &str,
    event: &IncomeEvent,
    rule_source: &(dyn RuleSource + Send + Sync),
    ledger: &(dyn AllocationLedger + Send + Sync),
) -> Result<AllocationOutcome> {
    let income = event.amount.abs();
    if income.is_zero() {
        return Err(AllocationError::InvalidAmount {
            transaction_id: event.transaction_id.clone(),
            reason: "amount must be non-zero",
        });
    }

    let rules = rule_source.rules(user_id).await?;
    let outputs =
        distribute(income, &rules).ok_or_else(|| AllocationError::InvalidAmount {
            transaction_id: event.transaction_id.clone(),
            reason: "amount is too large to allocate",
        })?;
    if outputs.is_empty() {
        info!(
            user_id,
            transaction_id = %event.transaction_id,
            "No allocation rules configured, skipping"
        );
        return Ok(AllocationOutcome::NoRulesConfigured);
    }

    let record = AllocationRecord {
        id: Uuid::new_v4().to_string(),
        transaction_id: event.transaction_id.clone(),
        executed_at: Utc::now(),
        currency: event.currency.clone(),
        total_income: income,
        outputs,
    };

    match ledger.commit(user_id, &record).await? {
        CommitStatus::Committed => {
            info!(
                user_id,
                transaction_id = %record.transaction_id,
                allocated = %record.allocated(),
                remainder = %record.remainder(),
                "Income allocated"
            );
            Ok(AllocationOutcome::Allocated(record))
        }
        CommitStatus::Duplicate(existing) => {
            warn!(
                user_id,
                transaction_id = %existing.transaction_id,
                "Transaction already allocated"
            );
            Ok(AllocationOutcome::AlreadyAllocated(existing))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::UserDirectory;
    use crate::core::ledger::UserProfile;
    use crate::core::rules::RuleStore;
    use crate::store::memory::MemoryLedger;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn rule(id: &str, percentage: Decimal) -> AllocationRule {
        AllocationRule::new(id, &id.to_uppercase(), percentage)
    }

    fn event(id: &str, amount: Decimal) -> IncomeEvent {
        IncomeEvent {
            transaction_id: id.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            amount,
            currency: "USD".to_string(),
        }
    }

    fn amounts(outputs: &[AllocationOutput]) -> Vec<Decimal> {
        outputs.iter().map(|o| o.amount).collect()
    }

    async fn ledger_with_rules(rules: Vec<AllocationRule>) -> MemoryLedger {
        let ledger = MemoryLedger::new();
        ledger
            .add_user(UserProfile {
                id: "acme".into(),
                display_name: "Acme Studio".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        for r in rules {
            ledger.put_rule("acme", r).await.unwrap();
        }
        ledger
    }

    #[test]
    fn test_round2_half_away_from_zero() {
        assert_eq!(round2(dec!(0.005)), dec!(0.01));
        assert_eq!(round2(dec!(0.004)), dec!(0.00));
        assert_eq!(round2(dec!(-0.005)), dec!(-0.01));
        assert_eq!(round2(dec!(2.675)), dec!(2.68));
    }

    #[test]
    fn test_distribute_under_allocation_leaves_remainder() {
        let rules = vec![
            rule("tax", dec!(30)),
            rule("marketing", dec!(15)),
            rule("savings", dec!(10)),
        ];
        let outputs = distribute(dec!(1000.00), &rules).unwrap();
        assert_eq!(amounts(&outputs), vec![dec!(300.00), dec!(150.00), dec!(100.00)]);
        let sum: Decimal = outputs.iter().map(|o| o.amount).sum();
        assert_eq!(sum, dec!(550.00));
        assert_eq!(dec!(1000.00) - sum, dec!(450.00));
    }

    #[test]
    fn test_distribute_over_allocation_is_rescaled() {
        let rules = vec![rule("a", dec!(60)), rule("b", dec!(60))];
        let outputs = distribute(dec!(100.00), &rules).unwrap();
        assert_eq!(amounts(&outputs), vec![dec!(50.00), dec!(50.00)]);
        // Original percentages are kept on the record.
        assert_eq!(outputs[0].percentage, dec!(60));
    }

    #[test]
    fn test_distribute_skips_non_positive_rules() {
        let rules = vec![rule("zero", dec!(0)), rule("neg", dec!(-10)), rule("ok", dec!(5))];
        let outputs = distribute(dec!(200), &rules).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].rule_id, "ok");
        assert_eq!(outputs[0].amount, dec!(10.00));

        assert!(distribute(dec!(200), &[rule("r1", dec!(0))]).unwrap().is_empty());
        assert!(distribute(dec!(200), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_distribute_trims_rounding_overshoot() {
        // Each half cent rounds up to a full cent.
        let outputs =
            distribute(dec!(0.01), &[rule("a", dec!(50)), rule("b", dec!(50))]).unwrap();
        assert_eq!(amounts(&outputs), vec![dec!(0.01), dec!(0.00)]);

        let outputs = distribute(
            dec!(0.01),
            &[rule("a", dec!(50)), rule("b", dec!(50)), rule("c", dec!(50))],
        )
        .unwrap();
        let sum: Decimal = outputs.iter().map(|o| o.amount).sum();
        assert!(sum <= dec!(0.01));
    }

    #[test]
    fn test_distribute_uses_absolute_income() {
        let outputs = distribute(dec!(-80), &[rule("a", dec!(25))]).unwrap();
        assert_eq!(outputs[0].amount, dec!(20.00));
    }

    #[test]
    fn test_distribute_reports_overflow() {
        assert!(distribute(Decimal::MAX, &[rule("a", dec!(150))]).is_none());
        // Near the limit the split either fits or is refused, it never panics.
        let rules = [rule("a", dec!(100)), rule("b", dec!(100))];
        if let Some(outputs) = distribute(Decimal::MAX, &rules) {
            assert_eq!(outputs.len(), 2);
        }
    }

    struct FixedRules(Vec<AllocationRule>);

    #[async_trait::async_trait]
    impl RuleSource for FixedRules {
        async fn rules(&self, _user_id: &str) -> Result<Vec<AllocationRule>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_allocate_rejects_amount_too_large() {
        let ledger = ledger_with_rules(vec![]).await;
        let rules = FixedRules(vec![rule("a", dec!(150))]);

        let err = allocate("acme", &event("huge", Decimal::MAX), &rules, &ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidAmount { .. }));
        assert!(err.to_string().contains("too large"));
        assert!(ledger.records("acme").await.unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_under_100_matches_total_within_rounding(
            cents in 1i64..=100_000_000,
            percents in prop::collection::vec(0u32..=2000, 1..8),
        ) {
            // Percentages in hundredths, scaled down so they sum to <= 100.
            let raw: Vec<Decimal> = percents.iter().map(|p| Decimal::new(*p as i64, 2)).collect();
            let sum: Decimal = raw.iter().sum();
            let scale = if sum > Decimal::ONE_HUNDRED { Decimal::ONE_HUNDRED / sum } else { Decimal::ONE };
            let rules: Vec<AllocationRule> = raw
                .iter()
                .enumerate()
                .map(|(i, p)| rule(&format!("r{i}"), (*p * scale).round_dp_with_strategy(4, RoundingStrategy::ToZero)))
                .collect();
            let income = Decimal::new(cents, 2);

            let outputs = distribute(income, &rules).unwrap();
            let total_pct: Decimal = rules.iter().map(|r| r.percentage).filter(|p| *p > Decimal::ZERO).sum();
            prop_assert!(total_pct <= Decimal::ONE_HUNDRED);

            let sum: Decimal = outputs.iter().map(|o| o.amount).sum();
            let expected = round2(income * total_pct / Decimal::ONE_HUNDRED);
            let tolerance = Decimal::new(1, 2) * Decimal::from(rules.len());
            prop_assert!((sum - expected).abs() <= tolerance);
            prop_assert!(sum <= income);
        }

        #[test]
        fn prop_over_100_never_exceeds_income(
            cents in 1i64..=100_000_000,
            percents in prop::collection::vec(51u32..=100, 2..8),
        ) {
            let rules: Vec<AllocationRule> = percents
                .iter()
                .enumerate()
                .map(|(i, p)| rule(&format!("r{i}"), Decimal::from(*p)))
                .collect();
            let income = Decimal::new(cents, 2);

            let outputs = distribute(income, &rules).unwrap();
            let sum: Decimal = outputs.iter().map(|o| o.amount).sum();
            prop_assert!(sum <= income);
            prop_assert!(outputs.iter().all(|o| o.amount >= Decimal::ZERO));
        }

        #[test]
        fn prop_non_positive_rules_never_appear(
            percents in prop::collection::vec(-50i64..=50, 0..10),
        ) {
            let rules: Vec<AllocationRule> = percents
                .iter()
                .enumerate()
                .map(|(i, p)| rule(&format!("r{i}"), Decimal::from(*p)))
                .collect();
            let outputs = distribute(dec!(1234.56), &rules).unwrap();
            for output in &outputs {
                prop_assert!(output.percentage > Decimal::ZERO);
            }
            let positive = rules.iter().filter(|r| r.percentage > Decimal::ZERO).count();
            prop_assert_eq!(outputs.len(), positive);
        }
    }

    #[tokio::test]
    async fn test_allocate_writes_record_and_balances() {
        let ledger = ledger_with_rules(vec![
            rule("tax", dec!(30)),
            rule("marketing", dec!(15)),
            rule("savings", dec!(10)),
        ])
        .await;

        let outcome = allocate("acme", &event("txn-1", dec!(1000.00)), &ledger, &ledger)
            .await
            .unwrap();
        let AllocationOutcome::Allocated(record) = outcome else {
            panic!("Expected a fresh allocation, got {outcome:?}");
        };
        assert_eq!(record.total_income, dec!(1000.00));
        assert_eq!(record.remainder(), dec!(450.00));

        let balances = ledger.balances("acme").await.unwrap();
        let by_id: Vec<_> = balances
            .iter()
            .map(|b| (b.rule_id.as_str(), b.balance))
            .collect();
        assert_eq!(
            by_id,
            vec![
                ("marketing", dec!(150.00)),
                ("savings", dec!(100.00)),
                ("tax", dec!(300.00)),
            ]
        );
        assert_eq!(ledger.records("acme").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_allocate_without_rules_is_a_no_op() {
        let ledger = ledger_with_rules(vec![]).await;
        let outcome = allocate("acme", &event("txn-1", dec!(500.00)), &ledger, &ledger)
            .await
            .unwrap();
        assert_eq!(outcome, AllocationOutcome::NoRulesConfigured);
        assert!(ledger.records("acme").await.unwrap().is_empty());
        assert!(ledger.balances("acme").await.unwrap().is_empty());

        let ledger = ledger_with_rules(vec![rule("r1", dec!(0))]).await;
        let outcome = allocate("acme", &event("txn-1", dec!(500.00)), &ledger, &ledger)
            .await
            .unwrap();
        assert_eq!(outcome, AllocationOutcome::NoRulesConfigured);
        assert!(ledger.records("acme").await.unwrap().is_empty());
        assert!(ledger.balances("acme").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_allocate_is_idempotent_per_transaction() {
        let ledger = ledger_with_rules(vec![rule("tax", dec!(25))]).await;

        let first = allocate("acme", &event("txn-1", dec!(400)), &ledger, &ledger)
            .await
            .unwrap();
        let second = allocate("acme", &event("txn-1", dec!(400)), &ledger, &ledger)
            .await
            .unwrap();

        let AllocationOutcome::AlreadyAllocated(existing) = second else {
            panic!("Expected duplicate detection, got {second:?}");
        };
        assert_eq!(Some(&existing), first.record());
        assert_eq!(ledger.records("acme").await.unwrap().len(), 1);
        assert_eq!(ledger.balances("acme").await.unwrap()[0].balance, dec!(100.00));
    }

    #[tokio::test]
    async fn test_allocate_rejects_zero_and_unknown_user() {
        let ledger = ledger_with_rules(vec![rule("tax", dec!(25))]).await;

        let err = allocate("acme", &event("txn-0", dec!(0)), &ledger, &ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidAmount { .. }));

        let err = allocate("ghost", &event("txn-1", dec!(10)), &ledger, &ledger)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_allocations_do_not_lose_updates() {
        let ledger = Arc::new(ledger_with_rules(vec![rule("tax", dec!(10))]).await);

        let mut handles = Vec::new();
        for i in 0..50 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                // Every transaction id appears twice.
                let id = format!("txn-{}", i % 25);
                allocate("acme", &event(&id, dec!(100)), &*ledger, &*ledger).await
            }));
        }
        let mut allocated = 0;
        for handle in handles {
            if let AllocationOutcome::Allocated(_) = handle.await.unwrap().unwrap() {
                allocated += 1;
            }
        }

        assert_eq!(allocated, 25);
        assert_eq!(ledger.records("acme").await.unwrap().len(), 25);
        assert_eq!(ledger.balances("acme").await.unwrap()[0].balance, dec!(250.00));
    }
}
