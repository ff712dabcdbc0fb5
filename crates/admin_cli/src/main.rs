use std::{error::Error, sync::Arc};

use clap::{Args, Parser, Subcommand, ValueEnum};
use engine::{
    BulkOptions, DocumentStore, Engine, MemoryStore, MoneyCents, NewBankAccount, SqlStore,
    TransactionDraft, ValidationReport,
};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};

mod config;

#[derive(Parser, Debug)]
#[command(name = "ledger_admin")]
#[command(about = "Maintenance utilities for the bank ledger")]
struct Cli {
    /// Optional config file path (TOML).
    #[arg(long)]
    config: Option<String>,

    /// Database connection string (also read from `DATABASE_URL`); `memory`
    /// uses a throwaway in-process store.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply or inspect the SQL schema migrations.
    Migrate(MigrateArgs),
    /// Rebuild the year-end balance cache of every account.
    InitYearEnd,
    /// Compare the year-end cache with the transaction history.
    ValidateYearEnd,
    /// Compare stored and running balances of every account.
    ValidateBalances,
    /// Recompute `current_balance` and the year-end cache of one account.
    Recompute(RecomputeArgs),
    Account(Account),
    Transaction(Transaction),
}

#[derive(Args, Debug)]
struct MigrateArgs {
    #[arg(value_enum, default_value_t = MigrateAction::Up)]
    action: MigrateAction,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MigrateAction {
    Up,
    Down,
    Fresh,
    Status,
}

#[derive(Args, Debug)]
struct RecomputeArgs {
    #[arg(long)]
    account: String,
}

#[derive(Args, Debug)]
struct Account {
    #[command(subcommand)]
    command: AccountCommand,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    Create(AccountCreateArgs),
    List,
}

#[derive(Args, Debug)]
struct AccountCreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    number: String,
    /// Opening balance, e.g. `1000.00`.
    #[arg(long, default_value = "0")]
    initial: String,
}

#[derive(Args, Debug)]
struct Transaction {
    #[command(subcommand)]
    command: TransactionCommand,
}

#[derive(Subcommand, Debug)]
enum TransactionCommand {
    Add(TransactionAddArgs),
    List(TransactionListArgs),
    /// Delete transactions and their splits.
    Delete(TransactionDeleteArgs),
}

#[derive(Args, Debug)]
struct TransactionAddArgs {
    #[arg(long)]
    account: String,
    #[arg(long)]
    date: String,
    /// Signed amount: positive for an income, negative for an expense.
    #[arg(long, allow_hyphen_values = true)]
    amount: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    category: Option<String>,
}

#[derive(Args, Debug)]
struct TransactionListArgs {
    #[arg(long)]
    account: String,
}

#[derive(Args, Debug)]
struct TransactionDeleteArgs {
    #[arg(required = true)]
    ids: Vec<String>,
}

async fn open_store(
    database_url: &str,
    batch_limit: usize,
) -> Result<Arc<dyn DocumentStore>, Box<dyn Error + Send + Sync>> {
    if database_url == "memory" {
        return Ok(Arc::new(MemoryStore::with_batch_limit(batch_limit)));
    }
    let db = connect_db(database_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(Arc::new(SqlStore::with_batch_limit(db, batch_limit).await?))
}

async fn connect_db(database_url: &str) -> Result<DatabaseConnection, Box<dyn Error + Send + Sync>> {
    if database_url == "memory" {
        return Err("the memory store has no schema to migrate".into());
    }
    Ok(Database::connect(database_url).await?)
}

async fn migrate(database_url: &str, action: MigrateAction) -> Result<(), Box<dyn Error + Send + Sync>> {
    let db = connect_db(database_url).await?;
    match action {
        MigrateAction::Up => migration::Migrator::up(&db, None).await?,
        MigrateAction::Down => migration::Migrator::down(&db, None).await?,
        MigrateAction::Fresh => migration::Migrator::fresh(&db).await?,
        MigrateAction::Status => migration::Migrator::status(&db).await?,
    }
    tracing::info!("migrations {action:?} done on {database_url}");
    Ok(())
}

fn print_report(what: &str, report: &ValidationReport) -> bool {
    if report.is_valid {
        println!("{what}: ok");
    } else {
        println!("{what}: {} problem(s)", report.errors.len());
        for error in &report.errors {
            println!("  {error}");
        }
    }
    report.is_valid
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let settings = config::load(cli.config.as_deref(), cli.database_url)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "ledger_admin={level},engine={level}",
            level = settings.level
        ))
        .init();

    if let Command::Migrate(args) = &cli.command {
        return migrate(&settings.database_url, args.action).await;
    }

    let store = open_store(&settings.database_url, settings.ledger.batch_limit).await?;
    let engine = Engine::builder()
        .store(store)
        .settings(settings.ledger)
        .build()
        .await?;

    match cli.command {
        Command::Migrate(_) => {}
        Command::InitYearEnd => {
            let summary = engine.initialize_year_end_balances().await?;
            println!(
                "initialized {} year-end balance(s) over {} account(s)",
                summary.entries, summary.accounts
            );
            for skipped in &summary.quarantined {
                println!(
                    "  skipped {}/{}: {}",
                    skipped.collection, skipped.id, skipped.reason
                );
            }
        }
        Command::ValidateYearEnd => {
            let report = engine.validate_year_end_balances().await?;
            if !print_report("year-end balances", &report) {
                std::process::exit(1);
            }
        }
        Command::ValidateBalances => {
            let running = engine.validate_consistency().await?;
            let current = engine.validate_current_balances().await?;
            let running_ok = print_report("running balances", &running);
            let current_ok = print_report("current balances", &current);
            if !(running_ok && current_ok) {
                std::process::exit(1);
            }
        }
        Command::Recompute(args) => {
            let balance = engine.recompute_account_balance(&args.account).await?;
            println!("account {}: {balance}", args.account);
        }
        Command::Account(Account {
            command: AccountCommand::Create(args),
        }) => {
            let initial: MoneyCents = args.initial.parse()?;
            let account = engine
                .create_bank_account(NewBankAccount::new(&args.name, &args.number, initial))
                .await?;
            println!("created bank account: {} ({})", account.name, account.id);
        }
        Command::Account(Account {
            command: AccountCommand::List,
        }) => {
            for account in engine.bank_accounts().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    account.id, account.name, account.account_number, account.current_balance
                );
            }
        }
        Command::Transaction(Transaction {
            command: TransactionCommand::Add(args),
        }) => {
            let amount: MoneyCents = args.amount.parse()?;
            let mut draft = if amount.is_negative() {
                TransactionDraft::expense(&args.account, &args.date, -amount)
            } else {
                TransactionDraft::income(&args.account, &args.date, amount)
            };
            draft.description = args.description;
            draft.category = args.category;
            let created = engine.create_transaction(draft).await?;
            println!(
                "created transaction {} ({})",
                created.transaction_number.unwrap_or_default(),
                created.id
            );
        }
        Command::Transaction(Transaction {
            command: TransactionCommand::List(args),
        }) => {
            let running = engine.account_running_balances(&args.account).await?;
            let balances = running.by_id();
            for txn in engine.transactions_for_account(&args.account).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    txn.transaction_number.as_deref().unwrap_or("-"),
                    txn.transaction_date,
                    txn.net_amount(),
                    balances.get(&txn.id).copied().unwrap_or_default(),
                    txn.description.as_deref().unwrap_or_default()
                );
            }
            for warning in &running.warnings {
                eprintln!("warning: {warning}");
            }
        }
        Command::Transaction(Transaction {
            command: TransactionCommand::Delete(args),
        }) => {
            let options = BulkOptions::new().on_progress(|progress| {
                tracing::info!(
                    "{}: {}/{} ({}%)",
                    progress.current_step.as_deref().unwrap_or("working"),
                    progress.completed,
                    progress.total,
                    progress.percentage
                );
            });
            let outcome = engine.delete_transactions(&args.ids, options).await?;
            println!("deleted {}, failed {}", outcome.success, outcome.failed);
            for error in outcome.errors.iter().chain(&outcome.warnings) {
                println!("  {error}");
            }
            if outcome.failed > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
