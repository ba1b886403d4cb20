//! txbank command-line entry point.
//!
//! # Responsibility
//! - Map flags and environment variables onto a [`StoreConfig`].
//! - Run one account or transfer operation per invocation.
//! - Print results as JSON on stdout and the error chain on stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use txbank_core::{
    default_log_level, init_logging, init_stderr_logging, AccountService, ConnectionSource,
    PoolConfig, RejectSentinel, SqliteAccountRepository, StoreConfig, TransactionManager,
    TransferService,
};

#[derive(Parser, Debug)]
#[command(
    name = "txbank",
    author,
    version,
    about = "Account store with transactional balance transfers"
)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "TXBANK_DB", default_value = "txbank.db")]
    db: PathBuf,

    /// Maximum number of pooled connections
    #[arg(long, global = true, env = "TXBANK_POOL_SIZE", default_value_t = 4)]
    pool_size: usize,

    /// How long to wait for a free pooled connection
    #[arg(long, global = true, default_value_t = 5000)]
    acquire_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error); logs to stderr unless
    /// `--log-dir` is set
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Absolute directory for rotating log files
    #[arg(long, global = true, env = "TXBANK_LOG_DIR")]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and apply migrations
    Init,
    /// Insert a new account
    Create {
        id: String,
        balance: i64,
        /// Retry once with a regenerated id if the id is taken
        #[arg(long)]
        retry: bool,
    },
    /// Show one account
    Get { id: String },
    /// Overwrite an account balance
    Update { id: String, balance: i64 },
    /// Delete an account
    Delete { id: String },
    /// Move an amount between two accounts in one transaction
    Transfer {
        from: String,
        to: String,
        amount: i64,
        /// Target account id that is always rejected
        #[arg(long)]
        sentinel: Option<String>,
    },
    /// Check that the core library is linked
    Ping,
}

#[derive(Serialize)]
struct Deleted<'a> {
    id: &'a str,
    deleted: bool,
}

#[derive(Serialize)]
struct Updated<'a> {
    id: &'a str,
    balance: i64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match (cli.log_dir.as_deref(), cli.log_level.as_deref()) {
        (Some(log_dir), level) => init_logging(level.unwrap_or(default_log_level()), log_dir),
        (None, Some(level)) => init_stderr_logging(level),
        (None, None) => Ok(()),
    }
    .context("failed to initialize logging")?;

    let pool = PoolConfig::default()
        .max_size(cli.pool_size)
        .acquire_timeout(Duration::from_millis(cli.acquire_timeout_ms));
    let config = StoreConfig::file(cli.db.clone()).pooled(pool);

    match cli.command {
        Commands::Ping => print_json(&serde_json::json!({
            "ping": txbank_core::ping(),
            "version": txbank_core::core_version(),
        })),
        Commands::Init => {
            config
                .build_source()
                .with_context(|| format!("failed to open {}", cli.db.display()))?;
            info!("event=cli_init module=cli status=ok");
            print_json(&serde_json::json!({ "db": cli.db, "initialized": true }))
        }
        command => {
            let (source, tx_manager) = config
                .build()
                .with_context(|| format!("failed to open {}", cli.db.display()))?;
            run_store_command(command, source, tx_manager)
        }
    }
}

fn run_store_command(
    command: Commands,
    source: Arc<dyn ConnectionSource>,
    tx_manager: TransactionManager,
) -> Result<()> {
    let repo = SqliteAccountRepository::new(source);
    let accounts = AccountService::new(&repo);

    match command {
        Commands::Create { id, balance, retry } => {
            let account = if retry {
                accounts.create_with_retry(&id, balance)
            } else {
                accounts.create(id.as_str(), balance)
            }
            .with_context(|| format!("failed to create account `{id}`"))?;
            print_json(&account)
        }
        Commands::Get { id } => {
            let account = accounts
                .get(&id)
                .with_context(|| format!("failed to load account `{id}`"))?;
            print_json(&account)
        }
        Commands::Update { id, balance } => {
            accounts
                .update_balance(&id, balance)
                .with_context(|| format!("failed to update account `{id}`"))?;
            print_json(&Updated { id: &id, balance })
        }
        Commands::Delete { id } => {
            let deleted = accounts
                .delete(&id)
                .with_context(|| format!("failed to delete account `{id}`"))?;
            print_json(&Deleted { id: &id, deleted })
        }
        Commands::Transfer {
            from,
            to,
            amount,
            sentinel,
        } => {
            let validator = sentinel.map(RejectSentinel::new).unwrap_or_default();
            let service = TransferService::with_validator(&repo, tx_manager, validator);
            let receipt = service.transfer(&from, &to, amount)?;
            print_json(&receipt)
        }
        Commands::Init | Commands::Ping => Ok(()),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}
