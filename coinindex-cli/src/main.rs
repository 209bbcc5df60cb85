//! CoinIndex CLI: index, update, snapshot, classification and maintenance.
//!
//! Commands:
//! - `index`: compute the market-cap-weighted index over a date range
//! - `update`: find new top-K entrants, backfill and merge their history
//! - `snapshot`: record today's (or a given date's) top-K listing
//! - `classify`: show native / stablecoin / wrapped verdicts for coin ids
//! - `universe rebuild`: rebuild the coin registry from stored snapshots
//! - `ranks verify|rebuild`: audit or repair snapshot ranks over a range
//! - `quality`: grade cached coin histories and list coins to redownload

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use coinindex_core::classification::{Classifier, Classify, MetadataDir};
use coinindex_core::data::{CoinGeckoProvider, HistoryCache};
use coinindex_core::domain::{CoinUniverse, IndexSeries};
use coinindex_core::store::{DateLocks, FlatFileStore};
use coinindex_core::{IndexCalculator, SnapshotAggregator};
use coinindex_runner::{
    check_history_quality, export_classification_csv, open_store, rebuild_ranks,
    save_index_artifacts, save_update_report, verify_ranks, AppConfig, Backend,
    IncrementalUpdater, OperationLog, UpdateOptions,
};

#[derive(Parser)]
#[command(
    name = "coinindex",
    about = "CoinIndex CLI, a market-cap-weighted crypto index pipeline"
)]
struct Cli {
    /// Path to the TOML config file. Missing file means defaults.
    #[arg(long, global = true, default_value = "coinindex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the index over a date range and save CSV/JSON artifacts.
    Index {
        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        /// Date whose value is pinned to the base value. Defaults to --start.
        #[arg(long)]
        base_date: Option<String>,

        /// Index value on the base date.
        #[arg(long)]
        base_value: Option<f64>,

        /// Basket size.
        #[arg(long)]
        top_n: Option<usize>,

        /// Drop stablecoins from the basket. Overrides `index.exclude_stablecoins`.
        #[arg(long, default_value_t = false, conflicts_with = "include_stablecoins")]
        exclude_stablecoins: bool,

        /// Keep stablecoins in the basket. Overrides `index.exclude_stablecoins`.
        #[arg(long, default_value_t = false)]
        include_stablecoins: bool,

        /// Drop wrapped and derivative tokens. Overrides `index.exclude_wrapped`.
        #[arg(long, default_value_t = false, conflicts_with = "include_wrapped")]
        exclude_wrapped: bool,

        /// Keep wrapped and derivative tokens. Overrides `index.exclude_wrapped`.
        #[arg(long, default_value_t = false)]
        include_wrapped: bool,

        /// Output directory for artifacts.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Add new top-K entrants to the universe and back-merge their history.
    Update {
        /// Run date (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        date: Option<String>,

        /// Compute the plan without writing snapshots, cache, log or universe.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Listing depth. Overrides `updater.top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Worker threads. Overrides `updater.max_workers`.
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Record the current top-K listing as a finalized daily snapshot.
    Snapshot {
        /// Snapshot date (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        date: Option<String>,
    },
    /// Classify coins as native, stablecoin or wrapped.
    Classify {
        /// Coin ids (e.g., bitcoin tether wrapped-bitcoin).
        #[arg(required = true)]
        ids: Vec<String>,

        /// Write the verdicts as CSV to this path.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Coin universe registry commands.
    Universe {
        #[command(subcommand)]
        action: UniverseAction,
    },
    /// Snapshot rank maintenance.
    Ranks {
        #[command(subcommand)]
        action: RanksAction,
    },
    /// Grade cached coin histories: staleness, gaps, row counts.
    Quality {
        /// Date to measure staleness against (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        as_of: Option<String>,
    },
}

#[derive(Subcommand)]
enum UniverseAction {
    /// Register every coin found in stored snapshots. Existing records are kept.
    Rebuild,
}

#[derive(Subcommand)]
enum RanksAction {
    /// Report dates whose ranks are not a market-cap ordered 1..N.
    Verify {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// Re-derive ranks from market cap and rewrite dates that differ.
    Rebuild {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    match cli.command {
        Commands::Index {
            start,
            end,
            base_date,
            base_value,
            top_n,
            exclude_stablecoins,
            include_stablecoins,
            exclude_wrapped,
            include_wrapped,
            output,
        } => {
            let mut index = config.index.clone();
            if let Some(v) = base_value {
                index.base_value = v;
            }
            if let Some(n) = top_n {
                index.top_n = n;
            }
            index.exclude_stablecoins =
                resolve_exclusion(index.exclude_stablecoins, exclude_stablecoins, include_stablecoins);
            index.exclude_wrapped =
                resolve_exclusion(index.exclude_wrapped, exclude_wrapped, include_wrapped);
            if let Some(dir) = output {
                index.output_dir = dir;
            }

            let base = base_date.as_deref().map(parse_date).transpose()?;
            let params = index.params(parse_date(&start)?, parse_date(&end)?, base);
            run_index(&config, &params, &index.output_dir)
        }
        Commands::Update {
            date,
            dry_run,
            top_k,
            workers,
        } => {
            let run_date = date_or_today(date.as_deref())?;
            let mut opts = UpdateOptions::from_config(&config.updater, run_date).with_dry_run(dry_run);
            if let Some(k) = top_k {
                opts.top_k = k;
            }
            if let Some(w) = workers {
                opts.max_workers = w;
            }
            run_update(&config, &opts)
        }
        Commands::Snapshot { date } => run_snapshot(&config, date_or_today(date.as_deref())?),
        Commands::Classify { ids, export } => run_classify(&config, &ids, export),
        Commands::Universe {
            action: UniverseAction::Rebuild,
        } => run_universe_rebuild(&config),
        Commands::Ranks { action } => match action {
            RanksAction::Verify { start, end } => {
                run_ranks_verify(&config, parse_date(&start)?, parse_date(&end)?)
            }
            RanksAction::Rebuild { start, end } => {
                run_ranks_rebuild(&config, parse_date(&start)?, parse_date(&end)?)
            }
        },
        Commands::Quality { as_of } => run_quality(&config, date_or_today(as_of.as_deref())?),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn date_or_today(s: Option<&str>) -> Result<NaiveDate> {
    match s {
        Some(s) => parse_date(s),
        None => Ok(chrono::Utc::now().date_naive()),
    }
}

/// An explicit `--exclude-*` or `--include-*` flag wins over the config.
fn resolve_exclusion(configured: bool, exclude: bool, include: bool) -> bool {
    match (exclude, include) {
        (true, _) => true,
        (_, true) => false,
        _ => configured,
    }
}

fn classifier(config: &AppConfig) -> Classifier<MetadataDir> {
    Classifier::new(MetadataDir::new(&config.storage.metadata_dir))
}

fn run_index(
    config: &AppConfig,
    params: &coinindex_core::IndexParams,
    output_dir: &std::path::Path,
) -> Result<()> {
    let store = open_store(&config.storage)?;
    let aggregator = SnapshotAggregator::new(store);
    let classifier = classifier(config);

    let series = IndexCalculator::new(&aggregator, &classifier)
        .compute(params)
        .with_context(|| format!("computing index {}..={}", params.start_date, params.end_date))?;

    print_index_summary(&series);
    let run_dir = save_index_artifacts(&series, output_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());
    Ok(())
}

fn run_update(config: &AppConfig, opts: &UpdateOptions) -> Result<()> {
    let store = open_store(&config.storage)?;
    let universe_path = &config.storage.universe_path;
    let mut universe = CoinUniverse::load_or_empty(universe_path)?;
    if universe.is_empty() {
        universe = CoinUniverse::from_store(store.as_ref())?;
        if !universe.is_empty() {
            log::info!("bootstrapped universe with {} coins from snapshots", universe.len());
        }
    }

    let provider = Arc::new(CoinGeckoProvider::from_env().context("building HTTP client")?);
    let classifier: Arc<dyn Classify> = Arc::new(classifier(config));
    let updater = IncrementalUpdater::new(store, provider, classifier)
        .with_cache(HistoryCache::new(&config.storage.history_dir))
        .with_oplog(OperationLog::new(&config.storage.oplog_path));

    let outcome = updater.run(universe, opts)?;
    println!("{}", outcome.report);

    if !opts.dry_run {
        outcome
            .universe
            .save(universe_path)
            .with_context(|| format!("saving universe {}", universe_path.display()))?;
    }
    let path = save_update_report(&outcome.report, &config.index.output_dir)?;
    println!("Report saved to: {}", path.display());

    if outcome.report.has_failures() {
        eprintln!(
            "{} backfill and {} merge failures; rerun update to retry",
            outcome.report.backfill_failures.len(),
            outcome.report.merge_failures.len()
        );
        std::process::exit(1);
    }
    Ok(())
}

fn run_snapshot(config: &AppConfig, date: NaiveDate) -> Result<()> {
    let store = open_store(&config.storage)?;
    let provider = Arc::new(CoinGeckoProvider::from_env().context("building HTTP client")?);
    let updater = IncrementalUpdater::new(store, provider, Arc::new(classifier(config)))
        .with_oplog(OperationLog::new(&config.storage.oplog_path));

    let snapshot = updater.snapshot(date, config.updater.top_k)?;
    println!("Recorded {date}: {} coins", snapshot.len());
    Ok(())
}

fn run_classify(config: &AppConfig, ids: &[String], export: Option<PathBuf>) -> Result<()> {
    let classifier = classifier(config);
    let verdicts: Vec<_> = ids.iter().map(|id| classifier.classify(id)).collect();

    println!("{:<28} {:<20} {:<14} Tags", "Coin", "Class", "Confidence");
    println!("{}", "-".repeat(80));
    for v in &verdicts {
        let tags: Vec<&str> = v
            .stablecoin_tags
            .iter()
            .chain(&v.wrapped_tags)
            .chain(&v.narrowed)
            .map(String::as_str)
            .collect();
        println!(
            "{:<28} {:<20} {:<14} {}",
            v.coin_id,
            v.label(),
            format!("{:?}", v.confidence),
            tags.join(", ")
        );
    }

    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let s = classifier.summary(&refs);
    println!();
    println!(
        "{} coins: {} native, {} stablecoin, {} wrapped, {} both, {} unknown",
        s.total, s.native, s.stablecoin, s.wrapped, s.both, s.unknown
    );

    if let Some(path) = export {
        let csv = export_classification_csv(&verdicts)?;
        std::fs::write(&path, csv).with_context(|| format!("writing {}", path.display()))?;
        println!("Verdicts saved to: {}", path.display());
    }
    Ok(())
}

fn run_universe_rebuild(config: &AppConfig) -> Result<()> {
    let store = open_store(&config.storage)?;
    let path = &config.storage.universe_path;
    let mut universe = CoinUniverse::load_or_empty(path)?;
    let before = universe.len();

    let scanned = CoinUniverse::from_store(store.as_ref())?;
    let added = scanned
        .iter()
        .filter(|record| universe.register((*record).clone()))
        .count();

    universe.save(path)?;
    println!(
        "Universe: {} coins ({before} before, {added} added from {} scanned)",
        universe.len(),
        scanned.len()
    );
    Ok(())
}

fn run_ranks_verify(config: &AppConfig, start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start > end {
        bail!("--start {start} is after --end {end}");
    }
    let store = open_store(&config.storage)?;
    let audit = verify_ranks(store.as_ref(), start, end)?;

    println!(
        "Checked {} dates, {} invalid, {} missing",
        audit.checked,
        audit.invalid.len(),
        audit.missing.len()
    );
    for issue in &audit.invalid {
        println!("  {}: {}", issue.date, issue.reason);
    }
    if !audit.invalid.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_ranks_rebuild(config: &AppConfig, start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start > end {
        bail!("--start {start} is after --end {end}");
    }
    let store = open_store(&config.storage)?;
    let result = rebuild_ranks(store.as_ref(), &DateLocks::new(), start, end)?;

    println!(
        "Rewrote {} dates, {} unchanged, {} missing",
        result.rewritten.len(),
        result.unchanged,
        result.missing.len()
    );
    for issue in &result.skipped {
        println!("  skipped {}: {}", issue.date, issue.reason);
    }
    if !result.skipped.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_quality(config: &AppConfig, as_of: NaiveDate) -> Result<()> {
    let cache = HistoryCache::new(&config.storage.history_dir);
    // Only the flat layout has folders a snapshot can be misfiled in.
    let flat = (config.storage.backend == Backend::Flat)
        .then(|| FlatFileStore::new(&config.storage.snapshots_dir));
    let report = check_history_quality(&cache, flat.as_ref(), as_of, &config.quality)?;

    println!("{report}");
    let redownload = report.redownload();
    if !redownload.is_empty() {
        println!("Redownload:");
        for id in redownload {
            println!("  {id}");
        }
    }
    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_index_summary(series: &IndexSeries) {
    let params = &series.params;
    println!();
    println!("=== Index ===");
    println!("Period:       {} to {}", params.start_date, params.end_date);
    println!("Base:         {} = {}", params.base_date, params.base_value);
    println!(
        "Basket:       top {} (stablecoins {}, wrapped {})",
        params.top_n,
        if params.exclude_stablecoins { "excluded" } else { "included" },
        if params.exclude_wrapped { "excluded" } else { "included" }
    );
    println!("Days:         {}", series.len());
    if let (Some(first), Some(last)) = (series.points.first(), series.points.last()) {
        println!("First value:  {:.4} ({})", first.value, first.date);
        println!("Last value:   {:.4} ({})", last.value, last.date);
        println!(
            "Change:       {:.2}%",
            (last.value / first.value - 1.0) * 100.0
        );
        if let Some(top) = last.constituents.first() {
            println!(
                "Top weight:   {} {:.2}%",
                top.coin_id,
                top.weight * 100.0
            );
        }
    }
    println!("Fingerprint:  {}", series.input_fingerprint);
    println!();
}
