use super::ui;
use crate::core::error::AllocationError;
use crate::core::ledger::{
    AllocationLedger, AllocationRecord, BucketBalance, UserDirectory, UserProfile,
};
use anyhow::Result;
use comfy_table::Cell;
use rust_decimal::Decimal;

pub fn render_balances(owner: &str, balances: &[BucketBalance]) -> String {
    let mut output = format!(
        "Bucket balances for {}\n\n",
        ui::style_text(owner, ui::StyleType::Title)
    );
    if balances.is_empty() {
        output.push_str(&ui::style_text(
            "Nothing allocated yet.",
            ui::StyleType::Subtle,
        ));
        return output;
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Bucket"),
        ui::header_cell("Id"),
        ui::header_cell("Balance"),
    ]);
    for balance in balances {
        table.add_row(vec![
            Cell::new(&balance.name),
            Cell::new(ui::style_text(&balance.rule_id, ui::StyleType::Subtle)),
            ui::money_cell(balance.balance),
        ]);
    }
    let total = balances
        .iter()
        .try_fold(Decimal::ZERO, |acc, b| acc.checked_add(b.balance));
    if let Some(total) = total {
        table.add_row(vec![
            Cell::new(ui::style_text("Total", ui::StyleType::TotalLabel)),
            Cell::new(""),
            ui::total_cell(total),
        ]);
    }
    output.push_str(&table.to_string());
    output
}

/// One row per record; `limit` keeps only the newest entries.
pub fn render_history(records: &[AllocationRecord], limit: Option<usize>) -> String {
    if records.is_empty() {
        return ui::style_text("No allocations recorded.", ui::StyleType::Subtle);
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Executed"),
        ui::header_cell("Transaction"),
        ui::header_cell("Income"),
        ui::header_cell("Allocated"),
        ui::header_cell("Remainder"),
        ui::header_cell("Split"),
    ]);
    let shown = limit.unwrap_or(records.len()).min(records.len());
    for record in &records[..shown] {
        let split = record
            .outputs
            .iter()
            .map(|o| format!("{} {:.2}", o.name, o.amount))
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(record.executed_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(&record.transaction_id),
            Cell::new(format!("{:.2} {}", record.total_income, record.currency)),
            ui::money_cell(record.allocated()),
            ui::money_cell(record.remainder()),
            Cell::new(split),
        ]);
    }

    let mut output = table.to_string();
    if shown < records.len() {
        output.push_str(&format!(
            "\n{}",
            ui::style_text(
                &format!("{} older record(s) not shown", records.len() - shown),
                ui::StyleType::Subtle
            )
        ));
    }
    output
}

async fn profile<S: UserDirectory>(store: &S, user_id: &str) -> Result<UserProfile> {
    let profile = store
        .user(user_id)
        .await?
        .ok_or_else(|| AllocationError::user_not_found(user_id))?;
    Ok(profile)
}

pub async fn balances<S>(store: &S, user_id: &str) -> Result<()>
where
    S: AllocationLedger + UserDirectory,
{
    let profile = profile(store, user_id).await?;
    let balances = store.balances(user_id).await?;
    println!("{}", render_balances(&profile.display_name, &balances));
    Ok(())
}

pub async fn history<S>(store: &S, user_id: &str, limit: Option<usize>) -> Result<()>
where
    S: AllocationLedger + UserDirectory,
{
    let profile = profile(store, user_id).await?;
    let records = store.records(user_id).await?;
    println!(
        "Allocation history for {}\n",
        ui::style_text(&profile.display_name, ui::StyleType::Title)
    );
    println!("{}", render_history(&records, limit));
    Ok(())
}
