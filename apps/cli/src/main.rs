use std::{future::Future, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, load_settings_from, ExpenseApi, ExpenseClient, ListCacheStore, ListSnapshot, SelectedFile,
    UploadForm,
};
use futures::StreamExt;
use shared::domain::{Expense, ExpenseId};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Track expenses and attach receipts")]
struct Cli {
    /// Settings file; defaults to ./expenses.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    api_url: Option<String>,
    /// Session cookie issued after signing in, e.g. `session=...`.
    #[arg(long)]
    cookie: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    List,
    Show {
        id: i64,
    },
    Add {
        title: String,
        amount: String,
    },
    Delete {
        id: i64,
    },
    Upload {
        id: i64,
        path: PathBuf,
        /// Overrides the type guessed from the file extension.
        #[arg(long)]
        content_type: Option<String>,
    },
    Health,
    /// Print the list whenever it changes, refreshing on an interval.
    Watch {
        #[arg(long, default_value_t = 5000)]
        interval_ms: u64,
    },
}

fn print_expense(expense: &Expense) {
    let receipt = expense
        .file_url
        .as_deref()
        .unwrap_or("Receipt not uploaded");
    println!(
        "{:>6}  {:<32} #{:<8} {receipt}",
        expense.id.0,
        expense.title,
        expense.amount.get()
    );
}

fn print_snapshot(snapshot: &ListSnapshot) {
    if snapshot.is_empty() {
        println!("No expenses yet");
        return;
    }
    for expense in snapshot.iter() {
        print_expense(expense);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from(path),
        None => load_settings(),
    };
    if let Some(api_url) = cli.api_url {
        settings.api_base_url = api_url;
    }
    if let Some(cookie) = cli.cookie {
        settings.session_cookie = Some(cookie);
    }
    info!(api = %settings.api_base_url, "using expense api");

    let client = ExpenseClient::connect(&settings).context("failed to build expense client")?;

    match cli.command {
        Command::List => {
            let snapshot = client.list.ensure_fresh().await?;
            print_snapshot(&snapshot);
        }
        Command::Show { id } => {
            let expense = client.details.load(ExpenseId(id)).await?;
            print_expense(&expense);
        }
        Command::Add { title, amount } => {
            client.list.ensure_fresh().await?;
            let created = client.mutations.create(&title, &amount).await?;
            println!("created expense {}", created.id);
            client.list.wait_for_refresh().await;
            if let Some(snapshot) = client.list.read() {
                print_snapshot(&snapshot);
            }
        }
        Command::Delete { id } => {
            client.list.ensure_fresh().await?;
            client.mutations.delete(ExpenseId(id)).await?;
            println!("deleted expense {id}");
            client.list.wait_for_refresh().await;
        }
        Command::Upload {
            id,
            path,
            content_type,
        } => {
            let mut file = SelectedFile::from_path(&path)
                .await
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            if let Some(content_type) = content_type {
                file.content_type = content_type;
            }
            let form = UploadForm::new(ExpenseId(id));
            form.choose(file);
            let receipt = form.submit(&client.uploads).await?;
            println!(
                "attached {} to expense {}",
                receipt.storage_key, receipt.expense_id
            );
            client.list.wait_for_refresh().await;
        }
        Command::Health => {
            let health = client.api.health().await?;
            println!("{}", health.status);
        }
        Command::Watch { interval_ms } => {
            let shutdown = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "could not listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            };
            watch_list(&client.list, Duration::from_millis(interval_ms), shutdown).await?;
        }
    }

    Ok(())
}

/// Prints every snapshot update until `shutdown` resolves, refetching
/// whenever the list goes stale.
async fn watch_list(
    list: &Arc<ListCacheStore>,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    list.ensure_fresh().await?;
    let mut updates = list.updates();
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
    let mut reported: Option<String> = None;
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if list.is_stale() {
                    list.invalidate();
                }
            }
            update = updates.next() => match update {
                Some(Some(snapshot)) => {
                    println!("--");
                    print_snapshot(&snapshot);
                }
                Some(None) => {}
                None => break,
            },
        }
        let current = list.last_refresh_error().map(|err| err.message);
        if let Some(message) = current.as_ref().filter(|m| reported.as_ref() != Some(*m)) {
            eprintln!("Could not load expenses: {message}");
        }
        reported = current;
    }
    Ok(())
}
