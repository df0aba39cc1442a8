//! Storefront Analytics — cohort retention, conversion funnels and customer
//! segmentation over an e-commerce event snapshot.
//!
//! Reads a JSON snapshot, runs every analyzer and writes the combined report
//! as JSON.

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use storefront_core::{EventFilter, Period};
use storefront_engine::{AnalyticsConfig, AnalyticsPipeline, SnapshotCache};
use storefront_reporting::GroupingKey;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Parser, Debug)]
#[command(name = "storefront-analytics")]
#[command(about = "Behavioral analytics over e-commerce event snapshots")]
#[command(version)]
struct Cli {
    /// Snapshot JSON with `users`, `products` and `events`
    #[arg(long, env = "STOREFRONT_ANALYTICS__INPUT")]
    input: PathBuf,

    /// TOML configuration file
    #[arg(long, env = "STOREFRONT_ANALYTICS__CONFIG")]
    config: Option<PathBuf>,

    /// Cohort period granularity: daily, weekly or monthly (overrides config)
    #[arg(long)]
    period: Option<Period>,

    /// Funnel grouping key: session or user (overrides config)
    #[arg(long)]
    group_by: Option<GroupingKey>,

    /// Number of behavioral clusters (overrides config)
    #[arg(long)]
    clusters: Option<usize>,

    /// Clustering seed (overrides config)
    #[arg(long)]
    seed: Option<u64>,

    /// Only analyze events on or after this date (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Only analyze events on or before this date (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Only analyze events in this product category
    #[arg(long)]
    category: Option<String>,

    /// Only analyze users carrying this segment label in the snapshot
    #[arg(long)]
    segment: Option<String>,

    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "storefront_analytics=info,storefront_engine=info".into());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    info!("Storefront Analytics starting up");

    let mut config = match &cli.config {
        Some(path) => AnalyticsConfig::load_from(path)?,
        None => AnalyticsConfig::load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AnalyticsConfig::default()
        }),
    };

    // Apply CLI overrides
    if let Some(period) = cli.period {
        config.cohort.period = period;
    }
    if let Some(group_by) = cli.group_by {
        config.funnel.group_by = group_by;
    }
    if let Some(k) = cli.clusters {
        config.segmentation.clustering.k = k;
    }
    if let Some(seed) = cli.seed {
        config.segmentation.clustering.seed = seed;
    }

    info!(
        period = %config.cohort.period,
        group_by = ?config.funnel.group_by,
        clusters = config.segmentation.clustering.k,
        seed = config.segmentation.clustering.seed,
        "Configuration loaded"
    );

    let pipeline = AnalyticsPipeline::new(config)?;

    let cache = SnapshotCache::new();
    let snapshot = cache.load_path(&cli.input).await?;
    let diagnostics = &snapshot.diagnostics;
    if diagnostics.malformed_count() > 0 {
        warn!(
            rejected_events = diagnostics.rejected_events,
            invalid_numeric = diagnostics.invalid_numeric,
            rejected_users = diagnostics.rejected_users,
            rejected_products = diagnostics.rejected_products,
            "Snapshot contains malformed records"
        );
    }

    let event_filter = EventFilter {
        start_date: cli.start_date,
        end_date: cli.end_date,
        event_types: Vec::new(),
        category: cli.category,
        segment: cli.segment,
    };
    let store = if event_filter.is_empty() {
        snapshot.store.clone()
    } else {
        let filtered = snapshot.store.filtered(&event_filter);
        info!(
            events = filtered.events().len(),
            of = snapshot.store.events().len(),
            "Event filter applied"
        );
        Arc::new(filtered)
    };

    let report = pipeline.run(store, (*snapshot.diagnostics).clone()).await;
    for failure in &report.failures {
        warn!(engine = %failure.engine, kind = %failure.kind, "{}", failure.message);
    }

    let json = serde_json::to_string_pretty(&report)?;
    match &cli.output {
        Some(path) => {
            tokio::fs::write(path, json).await?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{json}"),
    }

    Ok(())
}
