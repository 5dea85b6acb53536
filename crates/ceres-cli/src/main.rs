use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ceres_cli::output::{format_dataset_line, format_harvest_summary, format_stats};
use ceres_cli::{Command, Config, HarvestArgs};
use ceres_client::{BackoffPolicy, CkanClient, RetryingClient};
use ceres_core::config::{load_config, CeresConfig};
use ceres_core::harvest::{HarvestReport, HarvestService};
use ceres_core::models::{DatasetDetail, DatasetQuery, DatasetOrder};
use ceres_core::progress::TracingReporter;
use ceres_core::stats::StatsService;
use ceres_core::traits::DatasetStore;
use ceres_core::AppError;
use ceres_db::DatasetRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Parse command line arguments
    let cli = Config::parse();

    // Setup logging (stderr to keep stdout clean for JSON output)
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set default tracing subscriber")?;

    let mut config = load_config(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .context("Failed to load configuration")?;

    let database_url = cli
        .database_url
        .as_deref()
        .context("No database URL: pass --database-url or set DATABASE_URL")?;

    // Database connection
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    let repo = DatasetRepository::new(pool);
    repo.migrate()
        .await
        .context("Failed to apply database migrations")?;

    // Execute command
    match cli.command {
        Command::Harvest(args) => {
            args.apply(&mut config);
            let report = harvest(&repo, &config, &args, false)
                .await?
                .context("harvest returned no report")?;
            println!("{}", format_harvest_summary(&report));
        }
        Command::Bootstrap(args) => {
            args.apply(&mut config);
            match harvest(&repo, &config, &args, true).await? {
                Some(report) => println!("{}", format_harvest_summary(&report)),
                None => println!("Storage already populated; nothing to do."),
            }
        }
        Command::Stats { json, top } => {
            if let Some(top) = top {
                config.stats.top_organizations = top;
            }
            show_stats(&repo, &config, json).await?;
        }
        Command::List {
            search,
            order,
            limit,
        } => {
            list(&repo, search, order, limit).await?;
        }
        Command::Show { ckan_id } => {
            show(&repo, &ckan_id).await?;
        }
    }

    Ok(())
}

/// Runs a harvest (or a bootstrap harvest) against the configured catalog.
async fn harvest(
    repo: &DatasetRepository,
    config: &CeresConfig,
    args: &HarvestArgs,
    bootstrap_only: bool,
) -> anyhow::Result<Option<HarvestReport>> {
    let http = config.catalog.http();
    info!(
        base_url = %config.catalog.base_url,
        page_size = config.harvest.page_size,
        max_retries = http.max_retries,
        "Preparing harvest"
    );

    let ckan = CkanClient::new(&config.catalog.base_url, &http)
        .map_err(|e| anyhow::anyhow!(e.user_message()))
        .context("Invalid catalog URL")?;
    // With --no-retry the policy has zero retries, so every failure is final.
    let client = RetryingClient::new(ckan, BackoffPolicy::from(&http));

    let service = HarvestService::new(client, repo.clone(), config.harvest.clone());
    let reporter = TracingReporter;

    let result = match (args.lease, bootstrap_only) {
        (true, true) => {
            service
                .with_lease(repo.clone())
                .bootstrap(&reporter)
                .await
        }
        (true, false) => service
            .with_lease(repo.clone())
            .run_with_progress(&reporter)
            .await
            .map(Some),
        (false, true) => service.bootstrap(&reporter).await,
        (false, false) => service.run_with_progress(&reporter).await.map(Some),
    };

    result.map_err(|e| anyhow::anyhow!(e.user_message()))
}

/// Prints the dashboard statistics as text or JSON.
async fn show_stats(repo: &DatasetRepository, config: &CeresConfig, json: bool) -> anyhow::Result<()> {
    let service = StatsService::new(repo.clone(), config.stats.clone());
    let report = service.report().await.context("Failed to compute statistics")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_stats(&report));
    }
    Ok(())
}

/// Lists stored datasets, one per line.
async fn list(
    repo: &DatasetRepository,
    search: Option<String>,
    order: DatasetOrder,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let query = DatasetQuery {
        search,
        order,
        limit,
    };
    let datasets = repo.search_datasets(&query).await?;

    if datasets.is_empty() {
        eprintln!("No datasets found.");
        return Ok(());
    }
    for dataset in &datasets {
        println!("{}", format_dataset_line(dataset));
    }
    info!("{} dataset(s) listed", datasets.len());
    Ok(())
}

/// Prints one dataset, its resources and the resource count as JSON.
async fn show(repo: &DatasetRepository, ckan_id: &str) -> anyhow::Result<()> {
    let dataset = repo
        .get_dataset(ckan_id)
        .await?
        .ok_or_else(|| AppError::DatasetNotFound(ckan_id.to_string()))?;
    let resources = repo.list_resources(ckan_id).await?;

    let detail = DatasetDetail::new(dataset, resources);
    println!("{}", serde_json::to_string_pretty(&detail)?);
    Ok(())
}
