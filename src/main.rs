use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use flowbank::cli::users::IncomeInput;
use flowbank::core::log::init_logging;
use flowbank::core::rules::AllocationRule;
use flowbank::{AppCommand, RulesCommand, RunOptions};
use rust_decimal::Decimal;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    /// User to act as (defaults to `user` from the config file)
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Manage users
    #[command(subcommand)]
    User(UserCommands),
    /// Manage allocation rules
    #[command(subcommand)]
    Rules(RuleCommands),
    /// Record transactions in the local feed
    #[command(subcommand)]
    Income(IncomeCommands),
    /// Allocate one income transaction
    Allocate {
        /// Transaction id in the feed
        transaction_id: String,
    },
    /// Allocate every income transaction not allocated yet
    Sync,
    /// Display bucket balances
    Balances,
    /// Display allocation history
    History {
        /// Show only the newest N records
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a user, seeded with the configured default rules
    Add {
        id: String,
        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum RuleCommands {
    /// List rules in allocation order
    List,
    /// Add a rule or replace the rule with the same id
    Set {
        id: String,
        name: String,
        /// Percentage of each income, 0 to 100
        percentage: Decimal,
    },
    /// Remove a rule; its balance is kept
    Remove { id: String },
}

#[derive(Subcommand)]
enum IncomeCommands {
    /// Record a transaction; negative amounts are withdrawals
    Add {
        id: String,
        #[arg(allow_hyphen_values = true)]
        amount: Decimal,
        /// Defaults to the configured currency
        #[arg(long)]
        currency: Option<String>,
        /// Transaction date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(short, long)]
        description: Option<String>,
    },
}

impl Commands {
    fn into_app_command(self) -> AppCommand {
        match self {
            Commands::User(UserCommands::Add { id, name }) => AppCommand::AddUser { id, name },
            Commands::Rules(RuleCommands::List) => AppCommand::Rules(RulesCommand::List),
            Commands::Rules(RuleCommands::Set {
                id,
                name,
                percentage,
            }) => AppCommand::Rules(RulesCommand::Set(AllocationRule {
                id,
                name,
                percentage,
            })),
            Commands::Rules(RuleCommands::Remove { id }) => {
                AppCommand::Rules(RulesCommand::Remove { id })
            }
            Commands::Income(IncomeCommands::Add {
                id,
                amount,
                currency,
                date,
                description,
            }) => AppCommand::AddIncome(IncomeInput {
                id,
                amount,
                currency,
                date,
                description,
            }),
            Commands::Allocate { transaction_id } => AppCommand::Allocate { transaction_id },
            Commands::Sync => AppCommand::Sync,
            Commands::Balances => AppCommand::Balances,
            Commands::History { limit } => AppCommand::History { limit },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let options = RunOptions {
        config_path: cli.config_path.as_deref(),
        user: cli.user.as_deref(),
    };
    let result = match cli.command {
        Some(Commands::Setup) => flowbank::cli::setup::setup(),
        Some(cmd) => flowbank::run_command(cmd.into_app_command(), options).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
