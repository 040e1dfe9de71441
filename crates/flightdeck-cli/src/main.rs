mod import;
mod pipeline;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use flightdeck_client::{LinkChecker, LinkStatus};
use flightdeck_core::ats::AtsType;
use flightdeck_core::posting::{PositionCategory, PostingFilter};
use flightdeck_core::scheduler::TracingSchedulerReporter;
use flightdeck_core::source::{Region, SourceFilter, SourceStatus};
use flightdeck_core::traits::{Fetcher, JobStore, StrategySet};
use flightdeck_core::{
    Engine, NewSource, SchedulerConfig, SmartQueue, SourcePatch, Tier, classify,
};
use flightdeck_db::{Database, DatabaseConfig, PostingRepository, SourceRepository};

use crate::pipeline::PipelineArgs;

#[derive(Parser)]
#[command(name = "flightdeck", version, about = "Pilot job aggregator")]
struct Cli {
    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape one source now, regardless of its schedule
    Scrape {
        /// Source name
        name: String,

        /// Run the full pipeline without writing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Process due sources, once or continuously
    Run {
        /// Run a single batch and exit
        #[arg(long, default_value_t = false)]
        once: bool,

        /// Only process sources of this tier (1-3)
        #[arg(long)]
        tier: Option<Tier>,

        /// Also retry sources in error state
        #[arg(long, default_value_t = false)]
        retry_errors: bool,

        /// Run the full pipeline without writing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Sources in flight at once (1-9)
        #[arg(long, env = "FLIGHTDECK_CONCURRENCY", default_value_t = 3)]
        concurrency: usize,

        /// Maximum sources per batch
        #[arg(long, env = "FLIGHTDECK_BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Seconds between two dispatches
        #[arg(long, env = "FLIGHTDECK_DELAY_SECS", default_value_t = 10)]
        delay_secs: u64,

        /// Per-source time limit in seconds
        #[arg(long, env = "FLIGHTDECK_TIMEOUT_SECS", default_value_t = 180)]
        timeout_secs: u64,

        /// Consecutive failures before a source is flagged as error
        #[arg(long, env = "FLIGHTDECK_FAILURE_THRESHOLD", default_value_t = 5)]
        failure_threshold: u32,

        /// Pause after a batch that processed sources, in seconds
        #[arg(long, env = "FLIGHTDECK_BATCH_PAUSE_SECS", default_value_t = 60)]
        batch_pause_secs: u64,

        /// Pause after a batch with nothing due, in seconds
        #[arg(long, env = "FLIGHTDECK_IDLE_PAUSE_SECS", default_value_t = 300)]
        idle_pause_secs: u64,
    },

    /// Show registry counts by tier and status
    Stats,

    /// Manage the source registry
    Sources {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Show run history of a source
    Runs {
        /// Source name
        name: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// List active postings
    Postings {
        #[arg(long)]
        region: Option<Region>,

        #[arg(long)]
        position: Option<PositionCategory>,

        /// Only entry-level postings
        #[arg(long, default_value_t = false)]
        entry_level: bool,

        #[arg(long)]
        source: Option<String>,

        /// Maximum rows (0 = all)
        #[arg(short, long, default_value_t = 100)]
        limit: usize,

        /// Write CSV instead of JSON
        #[arg(long, default_value_t = false)]
        csv: bool,
    },

    /// Show which ATS a career page runs on
    Classify {
        url: String,

        /// Classify from the URL alone
        #[arg(long, default_value_t = false)]
        no_fetch: bool,
    },

    /// Check active posting URLs and deactivate dead ones
    ValidateUrls {
        /// Maximum postings to check (0 = all)
        #[arg(short, long, default_value_t = 500)]
        limit: usize,

        #[arg(long, default_value_t = 5)]
        concurrency: usize,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 15)]
        timeout_secs: u64,

        /// Report dead links without deactivating them
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// List sources
    List {
        #[arg(long)]
        status: Option<SourceStatus>,

        #[arg(long)]
        tier: Option<Tier>,
    },

    /// Register a source, or refresh it if the name exists
    Add {
        name: String,
        url: String,

        #[arg(long, default_value = "3")]
        tier: Tier,

        #[arg(long)]
        region: Option<Region>,

        #[arg(long)]
        country: Option<String>,

        /// Pin the ATS type; the classifier will not override it
        #[arg(long)]
        ats: Option<AtsType>,

        #[arg(long)]
        iata: Option<String>,

        #[arg(long)]
        icao: Option<String>,
    },

    /// Import sources from a CSV file (upsert by name)
    Import {
        path: PathBuf,

        /// Value stored as `discovered_via` when the row has none
        #[arg(long, default_value = "csv_import")]
        via: String,
    },

    /// Put an errored source back into rotation
    Reset { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("flightdeck=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let pipeline = cli.pipeline;

    match cli.command {
        Commands::Scrape { name, dry_run } => {
            let db = connect_db().await?;
            let engine = pipeline.engine(db.posting_repo()).await?;
            let config = SchedulerConfig::default().with_dry_run(dry_run);
            if dry_run {
                cmd_scrape(&name, db.source_repo(), engine.dry_run(), config).await?;
            } else {
                cmd_scrape(&name, db.source_repo(), engine, config).await?;
            }
        }
        Commands::Run {
            once,
            tier,
            retry_errors,
            dry_run,
            concurrency,
            batch_size,
            delay_secs,
            timeout_secs,
            failure_threshold,
            batch_pause_secs,
            idle_pause_secs,
        } => {
            let config = SchedulerConfig::default()
                .with_concurrency(concurrency)
                .with_batch_size(batch_size)
                .with_dispatch_delay(Duration::from_secs(delay_secs))
                .with_source_timeout(Duration::from_secs(timeout_secs))
                .with_failure_threshold(failure_threshold)
                .with_pauses(
                    Duration::from_secs(batch_pause_secs),
                    Duration::from_secs(idle_pause_secs),
                )
                .with_tier(tier)
                .with_retry_errors(retry_errors)
                .with_dry_run(dry_run);

            let db = connect_db().await?;
            let engine = pipeline.engine(db.posting_repo()).await?;
            if dry_run {
                cmd_run(db.source_repo(), engine.dry_run(), config, once).await?;
            } else {
                cmd_run(db.source_repo(), engine, config, once).await?;
            }
        }
        Commands::Stats => {
            let db = connect_db().await?;
            cmd_stats(&db.source_repo()).await?;
        }
        Commands::Sources { command } => {
            let db = connect_db().await?;
            cmd_sources(command, &db.source_repo()).await?;
        }
        Commands::Runs { name, limit } => {
            let db = connect_db().await?;
            cmd_runs(&name, limit, &db.posting_repo()).await?;
        }
        Commands::Postings {
            region,
            position,
            entry_level,
            source,
            limit,
            csv,
        } => {
            let db = connect_db().await?;
            let filter = PostingFilter {
                region,
                position,
                entry_level: entry_level.then_some(true),
                source_name: source,
                limit,
            };
            cmd_postings(&filter, csv, &db.posting_repo()).await?;
        }
        Commands::Classify { url, no_fetch } => {
            cmd_classify(&url, no_fetch, &pipeline).await?;
        }
        Commands::ValidateUrls {
            limit,
            concurrency,
            timeout_secs,
            dry_run,
        } => {
            let db = connect_db().await?;
            let mut checker = LinkChecker::new(Duration::from_secs(timeout_secs))?;
            if pipeline.allow_private_urls {
                checker = checker.allow_private_urls();
            }
            cmd_validate_urls(limit, concurrency, dry_run, &checker, &db.posting_repo()).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply pending migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

async fn cmd_scrape<F, S, J>(
    name: &str,
    registry: SourceRepository,
    engine: Engine<F, S, J>,
    config: SchedulerConfig,
) -> Result<()>
where
    F: Fetcher,
    S: StrategySet,
    J: JobStore,
{
    let queue = SmartQueue::new(registry, engine, config);
    let report = queue.run_source(name, &TracingSchedulerReporter).await?;

    let outcome = &report.outcome;
    tracing::info!(
        source = %outcome.source_name,
        status = %outcome.status,
        ats = %outcome.ats_type,
        found = outcome.counts.found,
        new = outcome.counts.new,
        updated = outcome.counts.updated,
        rejected = outcome.counts.rejected,
        "Scrape finished"
    );
    if report.became_error {
        tracing::warn!(source = %outcome.source_name, "Source is now in error state");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_run<F, S, J>(
    registry: SourceRepository,
    engine: Engine<F, S, J>,
    config: SchedulerConfig,
    once: bool,
) -> Result<()>
where
    F: Fetcher,
    S: StrategySet,
    J: JobStore,
{
    let queue = SmartQueue::new(registry, engine, config);
    let reporter = TracingSchedulerReporter;

    if once {
        let report = queue.run_batch(&reporter).await?;
        for name in report.newly_errored() {
            tracing::warn!(source = %name, "Source is now in error state");
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing current batch");
            token.cancel();
        }
    });

    queue.run_forever(cancel, &reporter).await?;
    Ok(())
}

async fn cmd_stats(registry: &SourceRepository) -> Result<()> {
    let stats = registry.stats(Utc::now()).await?;

    println!("Sources: {} ({} due now)\n", stats.total, stats.due);
    println!("By tier:");
    for (tier, count) in &stats.by_tier {
        println!("  tier {tier}: {count}");
    }
    println!("\nBy status:");
    for (status, count) in &stats.by_status {
        println!("  {status}: {count}");
    }
    Ok(())
}

async fn cmd_sources(command: SourceCommands, registry: &SourceRepository) -> Result<()> {
    match command {
        SourceCommands::List { status, tier } => {
            let sources = registry.list(SourceFilter { status, tier }).await?;
            if sources.is_empty() {
                println!("No sources found");
                return Ok(());
            }
            for source in &sources {
                let ats = source
                    .ats_type
                    .map_or_else(|| "-".to_string(), |a| a.to_string());
                let checked = source
                    .last_checked_at
                    .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
                println!(
                    "  [tier {}] {:<32} {:<15} {:<16} checked {} failures {}  {}",
                    source.tier,
                    source.name,
                    source.status.as_str(),
                    ats,
                    checked,
                    source.consecutive_failures,
                    source.url,
                );
            }
            println!("\nTotal: {} sources", sources.len());
        }
        SourceCommands::Add {
            name,
            url,
            tier,
            region,
            country,
            ats,
            iata,
            icao,
        } => {
            let mut source = NewSource::new(name, url).with_tier(tier).with_discovered_via("manual");
            if let Some(region) = region {
                source = source.with_region(region);
            }
            if let Some(country) = country {
                source = source.with_country(country);
            }
            if let Some(ats) = ats {
                source = source.with_ats_type(ats);
            }
            if iata.is_some() || icao.is_some() {
                source = source.with_codes(iata, icao);
            }
            let saved = registry.upsert(source).await?;
            tracing::info!(source = %saved.name, id = %saved.id, tier = %saved.tier, "Source saved");
        }
        SourceCommands::Import { path, via } => {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let sources = import::read_sources(file, &via)?;
            let total = sources.len();
            for source in sources {
                registry.upsert(source).await?;
            }
            tracing::info!(count = total, path = %path.display(), "Sources imported");
        }
        SourceCommands::Reset { name } => {
            registry.update(&name, &SourcePatch::reset()).await?;
            tracing::info!(source = %name, "Source reset to active");
        }
    }
    Ok(())
}

async fn cmd_runs(name: &str, limit: usize, store: &PostingRepository) -> Result<()> {
    let runs = store.recent(name, limit).await?;
    if runs.is_empty() {
        println!("No runs recorded for {name}");
        return Ok(());
    }

    println!("Run history for {name}:\n");
    for record in &runs {
        let run = &record.run;
        let error = run
            .error_message
            .as_deref()
            .map(|e| format!("  error: {e}"))
            .unwrap_or_default();
        println!(
            "  [{:<7}] {}  {} via {}  found {} new {} updated {}  {} ms{}",
            run.status.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            run.ats_type,
            run.strategy.as_deref().unwrap_or("-"),
            run.jobs_found,
            run.jobs_new,
            run.jobs_updated,
            run.duration_ms,
            error,
        );
    }
    println!("\nTotal: {} runs", runs.len());
    Ok(())
}

async fn cmd_postings(filter: &PostingFilter, csv: bool, store: &PostingRepository) -> Result<()> {
    let postings = store.list_active(filter).await?;
    if !csv {
        println!("{}", serde_json::to_string_pretty(&postings)?);
        return Ok(());
    }

    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record([
        "title",
        "company",
        "location",
        "region",
        "position",
        "aircraft_type",
        "type_rating_required",
        "type_rating_provided",
        "min_total_hours",
        "min_pic_hours",
        "license_required",
        "contract_type",
        "date_posted",
        "application_url",
    ])?;
    for posting in &postings {
        let job = &posting.job;
        writer.write_record([
            job.title.clone(),
            job.company.clone(),
            job.location.clone().unwrap_or_default(),
            job.region.to_string(),
            job.position.to_string(),
            job.aircraft_type.clone().unwrap_or_default(),
            job.type_rating_required.to_string(),
            job.type_rating_provided.to_string(),
            job.min_total_hours.map(|h| h.to_string()).unwrap_or_default(),
            job.min_pic_hours.map(|h| h.to_string()).unwrap_or_default(),
            job.license_required.clone().unwrap_or_default(),
            job.contract_type.clone().unwrap_or_default(),
            job.date_posted.map(|d| d.to_string()).unwrap_or_default(),
            job.application_url.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

async fn cmd_classify(url: &str, no_fetch: bool, pipeline: &PipelineArgs) -> Result<()> {
    let mut classification = classify(url, None);

    if classification.matched.is_none() && !no_fetch {
        tracing::info!("URL not recognised, fetching {}", url);
        let fetcher = pipeline.http_fetcher()?;
        let body = fetcher.fetch(url).await?;
        classification = classify(url, Some(&body));
    }

    println!("{}", serde_json::to_string_pretty(&classification)?);
    Ok(())
}

async fn cmd_validate_urls(
    limit: usize,
    concurrency: usize,
    dry_run: bool,
    checker: &LinkChecker,
    store: &PostingRepository,
) -> Result<()> {
    let postings = store
        .list_active(&PostingFilter {
            limit,
            ..PostingFilter::default()
        })
        .await?;
    tracing::info!(count = postings.len(), "Validating posting URLs");

    let verdicts: Vec<(String, LinkStatus)> = futures::stream::iter(postings)
        .map(|posting| async move {
            let url = posting.job.application_url;
            let status = checker.check(&url).await;
            (url, status)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let (mut alive, mut dead, mut unknown) = (0u32, 0u32, 0u32);
    for (url, status) in &verdicts {
        match status {
            LinkStatus::Alive => alive += 1,
            LinkStatus::Unknown(reason) => {
                unknown += 1;
                tracing::debug!(url = %url, reason = %reason, "Link status unknown");
            }
            LinkStatus::Dead(code) => {
                dead += 1;
                if dry_run {
                    println!("dead ({code}): {url}");
                } else if store.deactivate(url).await? {
                    println!("deactivated ({code}): {url}");
                }
            }
        }
    }

    tracing::info!(alive, dead, unknown, dry_run, "URL validation finished");
    Ok(())
}
