//! # billcast CLI
//!
//! ## Usage
//!
//! ```bash
//! billcast --config ./config/billcast.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `billcast init` | Create the ledger and warehouse databases |
//! | `billcast sources` | Show the configured message source and its status |
//! | `billcast bills` | Browse bills page by page |
//! | `billcast export` | Export every bill to CSV |
//! | `billcast ledger add-entity <id>` | Register an entity |
//! | `billcast ledger add ...` | Record a transaction |
//! | `billcast forecast --entity <id>` | Sync and forecast monthly spending |
//! | `billcast serve` | Start the HTTP API |
//!
//! Log verbosity follows `RUST_LOG`; `--verbose` raises the default to
//! `debug`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use billcast::{config, crawl, export, forecast, ledger, migrate, server, sources};
use billcast::progress::ProgressMode;
use billcast_core::models::{SortDirection, SortKey, Transaction};

#[derive(Parser)]
#[command(
    name = "billcast",
    about = "Bill discovery, CSV export, and spending forecasts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/billcast.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize both databases. Safe to run repeatedly.
    Init,

    /// Show the configured message source and whether it can be opened.
    Sources,

    /// Browse bills one page at a time.
    Bills {
        /// Number of pages to walk.
        #[arg(long, default_value_t = 1)]
        pages: u32,

        /// Re-order each page by this field (date, amount, vendor, subject,
        /// sender, bill_number).
        #[arg(long)]
        sort: Option<SortKey>,

        /// asc or desc. Omit to toggle from the default.
        #[arg(long)]
        direction: Option<SortDirection>,
    },

    /// Export every bill with an amount to CSV.
    Export {
        /// Output file. Defaults to `<export.output_dir>/all_bills_<date>.csv`.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// auto, off, human, or json. Progress goes to stderr.
        #[arg(long, default_value = "auto")]
        progress: ProgressMode,
    },

    /// Sync an entity's ledger into the warehouse and print its forecast.
    Forecast {
        #[arg(long)]
        entity: String,

        /// Stop after the sync and print the sync report.
        #[arg(long)]
        sync_only: bool,
    },

    /// Write to the transaction ledger.
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum LedgerAction {
    /// Register an entity (or rename an existing one).
    AddEntity {
        id: String,
        #[arg(long)]
        name: Option<String>,
    },

    /// Record one transaction. The entity is created if missing.
    Add {
        #[arg(long)]
        entity: String,

        /// Transaction type, e.g. EXPENSE or INCOME.
        #[arg(long = "type")]
        kind: String,

        /// Decimal amount.
        #[arg(long, allow_hyphen_values = true)]
        amount: String,

        #[arg(long)]
        category: String,

        /// YYYY-MM-DD or an RFC 3339 timestamp.
        #[arg(long)]
        date: String,

        #[arg(long)]
        description: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Databases initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Bills {
            pages,
            sort,
            direction,
        } => {
            crawl::run_bills(&cfg, pages, sort, direction).await?;
        }
        Commands::Export { output, progress } => {
            export::run_export(&cfg, output.as_deref(), progress).await?;
        }
        Commands::Forecast { entity, sync_only } => {
            forecast::run_forecast(&cfg, &entity, sync_only).await?;
        }
        Commands::Ledger { action } => match action {
            LedgerAction::AddEntity { id, name } => {
                ledger::run_add_entity(&cfg, &id, name.as_deref()).await?;
            }
            LedgerAction::Add {
                entity,
                kind,
                amount,
                category,
                date,
                description,
            } => {
                let txn = Transaction {
                    id: None,
                    entity,
                    kind,
                    amount,
                    category,
                    date: ledger::parse_ledger_date(&date)?,
                    description,
                };
                ledger::run_add_transaction(&cfg, txn).await?;
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
