use super::ui;
use crate::core::rules::{AllocationRule, RuleStore, total_percentage};
use anyhow::Result;
use comfy_table::Cell;
use rust_decimal::Decimal;
use tracing::warn;

pub fn render_rules(user_id: &str, rules: &[AllocationRule]) -> String {
    let mut output = format!(
        "Allocation rules for {}\n\n",
        ui::style_text(user_id, ui::StyleType::Title)
    );
    if rules.is_empty() {
        output.push_str(&ui::style_text(
            "No rules configured. Income will not be allocated.",
            ui::StyleType::Warning,
        ));
        return output;
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Id"),
        ui::header_cell("Bucket"),
        ui::header_cell("Percentage"),
    ]);
    for rule in rules {
        let id = if rule.percentage > Decimal::ZERO {
            Cell::new(&rule.id)
        } else {
            Cell::new(ui::style_text(&rule.id, ui::StyleType::Subtle))
        };
        table.add_row(vec![
            id,
            Cell::new(&rule.name),
            ui::percentage_cell(rule.percentage),
        ]);
    }
    output.push_str(&table.to_string());

    let total = total_percentage(rules);
    output.push_str(&format!(
        "\n\n{} {}%",
        ui::style_text("Total:", ui::StyleType::TotalLabel),
        total.normalize()
    ));
    if total > Decimal::ONE_HUNDRED {
        output.push_str(&format!(
            "\n{}",
            ui::style_text(
                "Rules exceed 100%; allocations are scaled down proportionally.",
                ui::StyleType::Warning,
            )
        ));
    } else if total < Decimal::ONE_HUNDRED {
        output.push_str(&format!(
            "\n{}",
            ui::style_text(
                &format!(
                    "{}% of income stays in the main account.",
                    (Decimal::ONE_HUNDRED - total).normalize()
                ),
                ui::StyleType::Subtle,
            )
        ));
    }
    output
}

pub async fn list(store: &(dyn RuleStore + Send + Sync), user_id: &str) -> Result<()> {
    let rules = store.rules(user_id).await?;
    println!("{}", render_rules(user_id, &rules));
    Ok(())
}

pub async fn set(
    store: &(dyn RuleStore + Send + Sync),
    user_id: &str,
    rule: AllocationRule,
) -> Result<()> {
    let rule_id = rule.id.clone();
    store.put_rule(user_id, rule).await?;

    let rules = store.rules(user_id).await?;
    let total = total_percentage(&rules);
    if total > Decimal::ONE_HUNDRED {
        warn!(user_id, %total, "Allocation rules exceed 100%");
    }
    println!("Saved rule {rule_id}\n");
    println!("{}", render_rules(user_id, &rules));
    Ok(())
}

pub async fn remove(
    store: &(dyn RuleStore + Send + Sync),
    user_id: &str,
    rule_id: &str,
) -> Result<()> {
    store.remove_rule(user_id, rule_id).await?;
    println!("Removed rule {rule_id}");
    Ok(())
}
