pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::cli::users::IncomeInput;
use crate::core::config::AppConfig;
use crate::core::feed::TransactionFeed;
use crate::core::rules::AllocationRule;
use crate::core::service::AllocationService;
use crate::providers::HttpTransactionFeed;
use crate::store::FjallLedger;
use anyhow::{Context, Result};
use tracing::{debug, info};

pub enum RulesCommand {
    List,
    Set(AllocationRule),
    Remove { id: String },
}

pub enum AppCommand {
    AddUser { id: String, name: Option<String> },
    Rules(RulesCommand),
    AddIncome(IncomeInput),
    Allocate { transaction_id: String },
    Sync,
    Balances,
    History { limit: Option<usize> },
}

/// Global options shared by every command.
#[derive(Debug, Default)]
pub struct RunOptions<'a> {
    pub config_path: Option<&'a str>,
    pub user: Option<&'a str>,
}

pub async fn run_command(command: AppCommand, options: RunOptions<'_>) -> Result<()> {
    info!("FlowBank starting...");

    let config = match options.config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let ledger_path = config.ledger_path()?;
    let ledger = FjallLedger::open(&ledger_path)
        .with_context(|| format!("Failed to open ledger at {}", ledger_path.display()))?;

    if let AppCommand::AddUser { id, name } = &command {
        return cli::users::add_user(&ledger, &config, id, name.as_deref()).await;
    }
    let user_id = config.resolve_user(options.user)?;

    let http_feed = match &config.feed.http {
        Some(http) => Some(HttpTransactionFeed::new(&http.base_url)?),
        None => None,
    };
    let feed: &(dyn TransactionFeed + Send + Sync) = match &http_feed {
        Some(feed) => feed,
        None => &ledger,
    };
    let service = AllocationService::new(feed, &ledger, &ledger);

    match command {
        AppCommand::AddUser { .. } => Ok(()),
        AppCommand::Rules(RulesCommand::List) => cli::rules::list(&ledger, &user_id).await,
        AppCommand::Rules(RulesCommand::Set(rule)) => {
            cli::rules::set(&ledger, &user_id, rule).await
        }
        AppCommand::Rules(RulesCommand::Remove { id }) => {
            cli::rules::remove(&ledger, &user_id, &id).await
        }
        AppCommand::AddIncome(input) => {
            if http_feed.is_some() {
                anyhow::bail!(
                    "A remote feed is configured; record income there instead of locally"
                );
            }
            cli::users::add_income(&ledger, &user_id, input, &config.currency).await
        }
        AppCommand::Allocate { transaction_id } => {
            cli::allocate::run(&service, &user_id, &transaction_id).await
        }
        AppCommand::Sync => cli::allocate::sync(&service, &user_id).await,
        AppCommand::Balances => cli::report::balances(&ledger, &user_id).await,
        AppCommand::History { limit } => cli::report::history(&ledger, &user_id, limit).await,
    }
}
