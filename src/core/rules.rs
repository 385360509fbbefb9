//! Allocation rules and the seam the engine reads them through.

use crate::core::error::{AllocationError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A named percentage-of-income target bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRule {
    pub id: String,
    pub name: String,
    pub percentage: Decimal,
}

impl AllocationRule {
    pub fn new(id: &str, name: &str, percentage: Decimal) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            percentage,
        }
    }

    /// Checks a rule before it is stored. The engine itself tolerates bad
    /// percentages, this only keeps obviously wrong input out of the ledger.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AllocationError::InvalidRule("rule id is empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(AllocationError::InvalidRule(format!(
                "rule {} has an empty name",
                self.id
            )));
        }
        if self.percentage < Decimal::ZERO {
            return Err(AllocationError::InvalidRule(format!(
                "rule {} has a negative percentage ({})",
                self.id, self.percentage
            )));
        }
        if self.percentage > Decimal::ONE_HUNDRED {
            return Err(AllocationError::InvalidRule(format!(
                "rule {} exceeds 100% ({})",
                self.id, self.percentage
            )));
        }
        Ok(())
    }
}

/// Sum of all positive percentages in a rule set.
pub fn total_percentage(rules: &[AllocationRule]) -> Decimal {
    rules
        .iter()
        .map(|r| r.percentage)
        .filter(|p| *p > Decimal::ZERO)
        .sum()
}

/// Read-only access to a user's ordered rule set.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Returns the rules in their configured order. Fails with `NotFound`
    /// when the user is unknown; a known user may have no rules.
    async fn rules(&self, user_id: &str) -> Result<Vec<AllocationRule>>;
}

/// Mutating access to rule sets, used by the management commands.
#[async_trait]
pub trait RuleStore: RuleSource {
    /// Inserts the rule, or replaces the rule with the same id in place.
    async fn put_rule(&self, user_id: &str, rule: AllocationRule) -> Result<()>;

    async fn remove_rule(&self, user_id: &str, rule_id: &str) -> Result<()>;
}

/// Applies an upsert to an ordered rule list: replaced in place when the id
/// exists, appended otherwise.
pub(crate) fn upsert_rule(rules: &mut Vec<AllocationRule>, rule: AllocationRule) {
    match rules.iter_mut().find(|r| r.id == rule.id) {
        Some(existing) => *existing = rule,
        None => rules.push(rule),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_rule() {
        assert!(AllocationRule::new("tax", "Tax", dec!(30)).validate().is_ok());
        assert!(AllocationRule::new("tax", "Tax", dec!(0)).validate().is_ok());
        assert!(AllocationRule::new("tax", "Tax", dec!(100)).validate().is_ok());

        let err = AllocationRule::new("tax", "Tax", dec!(-1))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("negative"));

        let err = AllocationRule::new("tax", "Tax", dec!(100.5))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("exceeds 100%"));

        assert!(AllocationRule::new(" ", "Tax", dec!(1)).validate().is_err());
        assert!(AllocationRule::new("tax", "", dec!(1)).validate().is_err());
    }

    #[test]
    fn test_total_percentage_ignores_non_positive() {
        let rules = vec![
            AllocationRule::new("a", "A", dec!(60)),
            AllocationRule::new("b", "B", dec!(0)),
            AllocationRule::new("c", "C", dec!(-5)),
            AllocationRule::new("d", "D", dec!(60)),
        ];
        assert_eq!(total_percentage(&rules), dec!(120));
    }

    #[test]
    fn test_upsert_keeps_order() {
        let mut rules = vec![
            AllocationRule::new("tax", "Tax", dec!(30)),
            AllocationRule::new("ads", "Marketing", dec!(15)),
        ];
        upsert_rule(&mut rules, AllocationRule::new("tax", "Taxes", dec!(25)));
        upsert_rule(&mut rules, AllocationRule::new("save", "Savings", dec!(10)));

        let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["tax", "ads", "save"]);
        assert_eq!(rules[0].name, "Taxes");
        assert_eq!(rules[0].percentage, dec!(25));
    }
}
