//! Campaign Insights: campaign metrics reporting and what-if simulation.
//!
//! Loads records through the source reconciler (JSON export as the remote,
//! TTL cache in front), then drives the aggregator and simulators.

use anyhow::{bail, Context};
use campaign_cache::open_layer;
use campaign_core::config::{AppConfig, CacheBackend};
use campaign_core::event_bus::SyncBus;
use campaign_core::types::{CampaignRecord, Granularity, RowOrder};
use campaign_reporting::filter::{local_day, DateRange, RecordFilter};
use campaign_reporting::{
    Aggregator, BreakEvenAnalysis, Grouping, ProfitProjection, RankMetric, SimulationState,
    UnitEconomics,
};
use campaign_sync::{JsonFileSource, Origin, Reconciler, RefreshReport, Selection, Slices};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_LOG_FILTER: &str = "campaign_insights=info,campaign_sync=info,campaign_cache=info";

#[derive(Parser, Debug)]
#[command(name = "campaign-insights")]
#[command(about = "Campaign metrics reporting, budget and break-even simulation")]
#[command(version)]
struct Cli {
    /// Human-readable logs instead of JSON
    #[arg(long, global = true, default_value_t = false)]
    pretty: bool,

    /// Cache TTL in seconds (overrides config)
    #[arg(long, global = true, env = "CAMPAIGN_INSIGHTS__CACHE__TTL_SECS")]
    cache_ttl_secs: Option<u64>,

    /// Cache backend: memory, file, redis (overrides config)
    #[arg(long, global = true, env = "CAMPAIGN_INSIGHTS__CACHE__BACKEND")]
    cache_backend: Option<CacheBackend>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Aggregate rows plus totals for the filtered records
    Report {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Grouping: date, campaign, date-campaign, account, detail
        #[arg(long, default_value = "detail")]
        group: Grouping,

        /// Row order: date-desc, campaign-asc (default from config)
        #[arg(long)]
        order: Option<RowOrder>,
    },

    /// Portfolio totals for the filtered records
    Summary {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Totals per day, week, or month
    Trend {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Bucket width: day, week, month
        #[arg(long, default_value = "day")]
        granularity: Granularity,
    },

    /// Top campaigns by cost, conversions, value, or roas
    Top {
        #[command(flatten)]
        scope: ScopeArgs,

        #[arg(long, default_value = "cost", value_parser = parse_rank_metric)]
        metric: RankMetric,
    },

    /// Accounts present in the records
    Accounts {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Project conversions and value under per-campaign budget multipliers
    Budget {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Multiplier for one campaign, as NAME=MULTIPLIER (repeatable)
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, f64)>,
    },

    /// Break-even CPA/ROAS and profit at a simulated CPA
    BreakEven {
        /// Selling price per unit
        #[arg(long)]
        price: f64,

        /// Cost of goods per unit
        #[arg(long, default_value_t = 0.0)]
        cogs: f64,

        /// Other expenses per unit
        #[arg(long, default_value_t = 0.0)]
        other: f64,

        /// Current cost per acquisition
        #[arg(long)]
        baseline_cpa: f64,

        /// Expected conversions per month
        #[arg(long)]
        monthly: f64,

        /// CPA to evaluate (defaults to the baseline CPA)
        #[arg(long)]
        cpa: Option<f64>,
    },

    /// Invalidate the cache, refresh every slice, and announce the sync
    Sync {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Trend bucket width for the refreshed trends slice
        #[arg(long, default_value = "day")]
        granularity: Granularity,
    },
}

#[derive(Args, Debug)]
struct ScopeArgs {
    /// JSON record export (array or {"records": [...]})
    #[arg(long)]
    records: PathBuf,

    /// Restrict to one account id
    #[arg(long)]
    account: Option<String>,

    /// Restrict to one campaign name
    #[arg(long)]
    campaign: Option<String>,

    /// First day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last day, inclusive (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Last N days ending today; overrides --from/--to
    #[arg(long)]
    last_days: Option<u32>,

    /// Ignore cached records and refetch
    #[arg(long, default_value_t = false)]
    refresh: bool,
}

impl ScopeArgs {
    fn range(&self) -> DateRange {
        match self.last_days {
            Some(n) => DateRange::last_n_days(n, local_day(Utc::now(), &chrono::Local)),
            None => DateRange::new(self.from, self.to),
        }
    }

    fn selection(&self) -> Selection {
        Selection {
            account_id: self.account.clone(),
            range: self.range(),
            ..Default::default()
        }
    }

    fn filter(&self) -> RecordFilter {
        RecordFilter {
            date_range: self.range(),
            account_id: self.account.clone(),
            campaign: self.campaign.clone(),
        }
    }
}

fn parse_assignment(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected NAME=MULTIPLIER, got '{s}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid multiplier '{value}'"))?;
    Ok((name.trim().to_string(), value))
}

fn parse_rank_metric(s: &str) -> Result<RankMetric, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "cost" | "spend" => Ok(RankMetric::Cost),
        "conversions" => Ok(RankMetric::Conversions),
        "value" => Ok(RankMetric::Value),
        "roas" => Ok(RankMetric::Roas),
        other => Err(format!("unknown metric: {other}")),
    }
}

fn init_tracing(pretty: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if pretty {
        builder.init();
    } else {
        builder.json().init();
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_reconciler(config: &AppConfig, records: &Path) -> anyhow::Result<Reconciler> {
    let cache = open_layer(&config.cache)
        .await
        .context("Failed to open cache")?;
    let source = Arc::new(JsonFileSource::new(records));
    Ok(Reconciler::new(source, Arc::new(cache)))
}

/// Records for `scope`'s account, fetched through the reconciler. Date and
/// campaign filters are left to the caller.
async fn load_records(config: &AppConfig, scope: &ScopeArgs) -> anyhow::Result<Vec<CampaignRecord>> {
    let reconciler = build_reconciler(config, &scope.records).await?;
    if scope.refresh {
        reconciler.cache().invalidate_all().await;
    }
    reconciler.select(scope.selection());
    let outcome = reconciler.refresh_records().await;
    let slice = reconciler.records();

    if let Some(error) = &slice.last_error {
        if slice.origin == Some(Origin::Empty) {
            bail!("Could not load records from {}: {error}", scope.records.display());
        }
        warn!(error = %error, "Record fetch failed, using prior data");
    }
    let records = slice.data.unwrap_or_default();
    info!(
        outcome = ?outcome,
        records = records.len(),
        "Records loaded"
    );
    Ok(records)
}

#[derive(Serialize)]
struct SyncOutput {
    report: RefreshReport,
    slices: Slices,
}

#[derive(Serialize)]
struct BreakEvenOutput {
    analysis: BreakEvenAnalysis,
    projection: ProfitProjection,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.pretty);

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(ttl) = cli.cache_ttl_secs {
        config.cache.ttl_secs = ttl;
    }
    if let Some(backend) = cli.cache_backend {
        config.cache.backend = backend;
    }

    info!(
        cache_backend = ?config.cache.backend,
        cache_ttl_secs = config.cache.ttl_secs,
        max_multiplier = config.simulator.max_multiplier,
        "Configuration loaded"
    );

    let aggregator = Aggregator::from_config(&config.reporting);

    match cli.command {
        Commands::Report {
            scope,
            group,
            order,
        } => {
            let records = load_records(&config, &scope).await?;
            print_json(&aggregator.report(&records, &scope.filter(), group, order))
        }
        Commands::Summary { scope } => {
            let records = load_records(&config, &scope).await?;
            print_json(&aggregator.summary(&records, &scope.filter()))
        }
        Commands::Trend { scope, granularity } => {
            let records = load_records(&config, &scope).await?;
            print_json(&aggregator.trend(&records, &scope.filter(), granularity))
        }
        Commands::Top { scope, metric } => {
            let records = scope.filter().apply(&load_records(&config, &scope).await?);
            print_json(&aggregator.top_campaigns(&records, metric))
        }
        Commands::Accounts { scope } => {
            let records = scope.filter().apply(&load_records(&config, &scope).await?);
            print_json(&aggregator.accounts(&records))
        }
        Commands::Budget { scope, set } => {
            let records = scope.filter().apply(&load_records(&config, &scope).await?);
            let rows = aggregator.campaign_rows(&records);
            let mut state = SimulationState::from_rows(&rows, &config.simulator);
            for (campaign, multiplier) in set {
                let applied = state
                    .set_multiplier(&campaign, multiplier)
                    .with_context(|| format!("Cannot set multiplier for '{campaign}'"))?;
                info!(campaign = %campaign, multiplier = applied, "Multiplier set");
            }
            print_json(&state.project_portfolio())
        }
        Commands::BreakEven {
            price,
            cogs,
            other,
            baseline_cpa,
            monthly,
            cpa,
        } => {
            let analysis = BreakEvenAnalysis::analyze(UnitEconomics {
                price,
                cost_of_goods: cogs,
                other_expenses: other,
                baseline_cpa,
                monthly_conversions: monthly,
            })?;
            let projection = match cpa {
                Some(cpa) => analysis.evaluate(cpa)?,
                None => analysis.baseline(),
            };
            print_json(&BreakEvenOutput {
                analysis,
                projection,
            })
        }
        Commands::Sync { scope, granularity } => {
            let bus = SyncBus::new();
            let reconciler = build_reconciler(&config, &scope.records)
                .await?
                .with_bus(&bus);
            reconciler.select(scope.selection().with_granularity(granularity));
            let report = reconciler.resync().await;
            print_json(&SyncOutput {
                report,
                slices: reconciler.snapshot(),
            })
        }
    }
}
