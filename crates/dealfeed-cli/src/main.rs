use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dealfeed_storage::PgDealStore;
use dealfeed_sync::{connect_store, recent_runs_markdown, DealManager, IngestionPipeline, SyncConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dealfeed-cli")]
#[command(about = "Travel newsletter deal ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion pass and print its result as JSON.
    Sync,
    /// Deactivate deals past the retention window.
    Sweep,
    /// Apply database migrations to DATABASE_URL.
    Migrate,
    /// Serve the HTTP API (and the scheduler when enabled).
    Serve,
    /// Summarise the most recent run reports.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Resolve a sender address, or list the directory when none is given.
    Senders { address: Option<String> },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    init_tracing(config.log_json);

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let store = connect_store(&config).await?;
            let pipeline = IngestionPipeline::from_config(&config, store)?;
            let result = pipeline.run_once().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Sweep => {
            let store = connect_store(&config).await?;
            let changed = DealManager::new(store).sweep(Utc::now()).await?;
            println!("sweep complete: deactivated={changed}");
        }
        Commands::Migrate => {
            let Some(url) = &config.database_url else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            let store = PgDealStore::connect(url)
                .await
                .context("connecting to DATABASE_URL")?;
            store.migrate().await.context("applying migrations")?;
            info!("migrations applied");
        }
        Commands::Serve => {
            dealfeed_web::serve_from_env().await?;
        }
        Commands::Report { runs, dir } => {
            let Some(dir) = dir.or_else(|| config.reports_dir.clone()) else {
                bail!("pass --dir or set DEALFEED_REPORTS_DIR");
            };
            println!("{}", recent_runs_markdown(&dir, runs)?);
        }
        Commands::Senders { address } => {
            let directory = config.sender_directory()?;
            match address {
                Some(address) => match directory.identify(&address) {
                    Some(sender) => println!(
                        "{} -> {} ({}, {})",
                        address,
                        sender.display_name,
                        sender.domain,
                        sender.category.as_str()
                    ),
                    None => println!("{address} -> unknown sender"),
                },
                None => {
                    for sender in directory.entries() {
                        println!(
                            "{:<28} {:<26} {}",
                            sender.domain,
                            sender.display_name,
                            sender.category.as_str()
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
