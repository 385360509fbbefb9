use super::ui;
use crate::core::allocation::AllocationOutcome;
use crate::core::ledger::AllocationRecord;
use crate::core::service::{AllocationService, SyncReport};
use anyhow::Result;
use comfy_table::Cell;
use tracing::debug;

pub fn render_record(record: &AllocationRecord) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Bucket"),
        ui::header_cell("Rule"),
        ui::header_cell(&format!("Amount ({})", record.currency)),
    ]);
    for output in &record.outputs {
        table.add_row(vec![
            Cell::new(&output.name),
            ui::percentage_cell(output.percentage),
            ui::money_cell(output.amount),
        ]);
    }
    table.add_row(vec![
        Cell::new(ui::style_text("Main account", ui::StyleType::Subtle)),
        Cell::new(""),
        ui::money_cell(record.remainder()),
    ]);

    format!(
        "Transaction {} ({} {:.2})\n\n{}\n\n{} {}",
        ui::style_text(&record.transaction_id, ui::StyleType::Title),
        record.currency,
        record.total_income,
        table,
        ui::style_text("Allocated:", ui::StyleType::TotalLabel),
        ui::style_text(
            &format!("{:.2}", record.allocated()),
            ui::StyleType::TotalValue
        ),
    )
}

pub fn render_outcome(transaction_id: &str, outcome: &AllocationOutcome) -> String {
    match outcome {
        AllocationOutcome::Allocated(record) => render_record(record),
        AllocationOutcome::AlreadyAllocated(record) => format!(
            "{}\n\n{}",
            ui::style_text(
                &format!(
                    "Transaction {transaction_id} was already allocated on {}",
                    record.executed_at.format("%Y-%m-%d %H:%M UTC")
                ),
                ui::StyleType::Warning,
            ),
            render_record(record)
        ),
        AllocationOutcome::NoRulesConfigured => ui::style_text(
            &format!("No allocation rules configured; transaction {transaction_id} left untouched"),
            ui::StyleType::Warning,
        ),
    }
}

pub fn render_sync_report(report: &SyncReport) -> String {
    let mut output = format!(
        "Allocated {}, already allocated {}, failed {}, skipped {} non-income",
        report.allocated(),
        report.already_allocated(),
        report.failed(),
        report.skipped
    );
    for entry in &report.entries {
        if let Err(e) = &entry.result {
            output.push_str(&format!(
                "\n{}",
                ui::style_text(
                    &format!("{}: {}", entry.transaction_id, e),
                    ui::StyleType::Error
                )
            ));
        }
    }
    output
}

pub async fn run(service: &AllocationService<'_>, user_id: &str, transaction_id: &str) -> Result<()> {
    let outcome = service.process_transaction(user_id, transaction_id).await?;
    if let Some(record) = outcome.record() {
        debug!(record_id = %record.id, transaction_id, "Allocation record");
    }
    println!("{}", render_outcome(transaction_id, &outcome));
    Ok(())
}

pub async fn sync(service: &AllocationService<'_>, user_id: &str) -> Result<()> {
    let pending = service.pending_income(user_id).await?;
    let pb = ui::new_progress_bar(pending as u64, true);
    pb.set_message("Allocating income...");

    let report = service.sync(user_id, &|| pb.inc(1)).await;
    pb.finish_and_clear();

    let report = report?;
    println!("{}", render_sync_report(&report));
    if report.failed() > 0 {
        anyhow::bail!("{} transaction(s) failed to allocate", report.failed());
    }
    Ok(())
}
