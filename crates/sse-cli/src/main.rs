//! sse-cli: the operator surface over the Backfill Controller, the worker
//! queue, the Managed Webhook Reconciler, and the Account Lifecycle's
//! dangerous cascade delete. A thin `clap` dispatcher over one
//! bootstrap-then-act async fn per subcommand, each printing plain
//! `key=value` lines rather than a formatted report.

mod commands;
mod context;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sse")]
#[command(about = "Stripe Sync Engine operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill Controller commands.
    Backfill {
        #[command(subcommand)]
        cmd: BackfillCmd,
    },
    /// Worker queue commands.
    Queue {
        #[command(subcommand)]
        cmd: QueueCmd,
    },
    /// Managed Webhook Reconciler commands.
    Webhook {
        #[command(subcommand)]
        cmd: WebhookCmd,
    },
    /// Account Lifecycle commands.
    Account {
        #[command(subcommand)]
        cmd: AccountCmd,
    },
}

#[derive(Subcommand)]
enum BackfillCmd {
    /// Drains one object (or, with no `--object`, every registry object in
    /// dependency order) to completion.
    Run {
        /// Registry object name (e.g. `customer`). All objects if omitted.
        #[arg(long)]
        object: Option<String>,
        /// Account id to backfill. Resolved from the configured Stripe key if omitted.
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Subcommand)]
enum QueueCmd {
    /// Enqueues every registry object name into `_worker_queue`.
    Seed,
}

#[derive(Subcommand)]
enum WebhookCmd {
    /// Ensures exactly one enabled Stripe webhook endpoint exists for (account, url).
    Reconcile {
        #[arg(long)]
        url: String,
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Subcommand)]
enum AccountCmd {
    /// Cascade-deletes every mirrored row for an account. Prints per-table
    /// counts always; only executes without `--dry-run`.
    Delete {
        #[arg(long)]
        account: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_transaction: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Backfill { cmd: BackfillCmd::Run { object, account } } => {
            commands::backfill::run(object, account).await?;
        }
        Commands::Queue { cmd: QueueCmd::Seed } => {
            commands::queue::seed().await?;
        }
        Commands::Webhook { cmd: WebhookCmd::Reconcile { url, account } } => {
            commands::webhook::reconcile(url, account).await?;
        }
        Commands::Account { cmd: AccountCmd::Delete { account, dry_run, no_transaction } } => {
            commands::account::delete(account, dry_run, no_transaction).await?;
        }
    }

    Ok(())
}
