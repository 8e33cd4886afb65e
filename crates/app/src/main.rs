use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::AppContext;
use config::AppConfig;

#[derive(Parser)]
#[command(name = "kasa", about = "Bank transaction import and categorization for Czech accounts.")]
struct Cli {
    /// Path to config.toml (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch transactions from the bank and import the ones not yet stored.
    Import {
        /// Account in ACCOUNT/BANK form, e.g. 123456789/2010
        #[arg(long)]
        account: String,
        /// Start date: YYYY-MM-DD
        #[arg(long)]
        from: String,
        /// End date: YYYY-MM-DD
        #[arg(long)]
        to: String,
    },
    /// Suggest a category for every transaction in an import batch.
    Categorize {
        /// Batch id, e.g. 123456789/2010-3
        #[arg(long)]
        batch: String,
    },
    /// List import batches.
    Batches {
        /// Restrict to one account (ACCOUNT/BANK)
        #[arg(long)]
        account: Option<String>,
    },
    /// Override the category of a single transaction.
    SetCategory {
        /// Transaction id: ACCOUNT/BANK:EXTERNAL_ID
        #[arg(long)]
        tx: String,
        /// Category id to assign
        #[arg(long)]
        category: String,
        /// Optional memo override
        #[arg(long)]
        memo: Option<String>,
        /// Optional payee override
        #[arg(long)]
        payee: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let result = run(cli).await;
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::AppError> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let ctx = AppContext::init(config).await?;

    match cli.command {
        Commands::Import { account, from, to } => {
            commands::import(&ctx, &account, &from, &to).await
        }
        Commands::Categorize { batch } => commands::categorize(&ctx, &batch).await,
        Commands::Batches { account } => commands::batches(&ctx, account.as_deref()).await,
        Commands::SetCategory {
            tx,
            category,
            memo,
            payee,
        } => commands::set_category(&ctx, &tx, &category, memo, payee).await,
    }
}
