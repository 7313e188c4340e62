use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use gulp_sync::{build_manager, AppConfig, ScrapeRequest};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "gulp-cli")]
#[command(about = "GULP project watch command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API and the scrape scheduler.
    Serve,
    /// Run one scrape pass and exit.
    Sync {
        /// Pages to scrape, e.g. `--pages 1 --pages 4` scrapes 1 through 4.
        #[arg(long)]
        pages: Vec<u32>,
        /// Email newly found projects to EMAIL_RECIPIENT.
        #[arg(long)]
        notify: bool,
    },
    /// Re-split the stored raw snapshot into recent and archive.
    Repartition,
    /// Remove project IDs from the new-only list.
    MarkSeen { ids: Vec<String> },
    /// Print counts, history and the last scrape time.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,gulp_sync=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => gulp_web::serve_from_env().await?,
        Commands::Sync { pages, notify } => {
            let request = ScrapeRequest {
                pages,
                send_email: notify.then_some(true),
            };
            let summary = gulp_sync::run_sync_once_from_env(request).await?;
            println!(
                "sync complete: run_id={} source={} scraped={} unique={} new={} recent={} archived={} email_sent={}",
                summary.run_id,
                summary.source,
                summary.scraped,
                summary.unique,
                summary.new,
                summary.recent,
                summary.archived,
                summary.email_sent
            );
        }
        Commands::Repartition => {
            let manager = build_manager(&AppConfig::from_env());
            let partitioned = manager.repartition_at(Utc::now()).await?;
            println!(
                "repartition complete: recent={} archived={} already_archived={}",
                partitioned.recent.len(),
                partitioned.archive_delta.len(),
                partitioned.already_archived
            );
        }
        Commands::MarkSeen { ids } => {
            let manager = build_manager(&AppConfig::from_env());
            let outcome = manager.mark_projects_as_seen(&ids).await?;
            println!("marked seen: removed={} remaining={}", outcome.removed, outcome.remaining);
        }
        Commands::Status => {
            let config = AppConfig::from_env();
            let manager = build_manager(&config);
            let history = manager.history().await;
            let status = serde_json::json!({
                "dataDir": config.data_dir.display().to_string(),
                "source": format!("{:?}", config.source),
                "lastScrapeTime": manager.last_scrape().await.map(|ts| ts.to_rfc3339()),
                "counts": manager.counts().await,
                "history": {
                    "lastScan": history.last_scan.map(|ts| ts.to_rfc3339()),
                    "knownProjects": history.known_project_ids.len(),
                    "totalProjectsFound": history.total_projects_found,
                },
                "scheduler": config.scheduler_state(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
