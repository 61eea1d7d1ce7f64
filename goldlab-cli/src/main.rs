//! GoldLab CLI: store maintenance, analytics, and the live poller.
//!
//! Commands:
//! - `update`: close gaps between the newest stored date and today
//! - `collect`: full-lookback collection replacing the store
//! - `current`: merge the providers' current quotes once
//! - `trend`, `change`, `volatility`, `extremes`, `moving-average`, `report`: analytics
//! - `compare`: latest quote and spread per company
//! - `dates`, `prices`: stored dates and provider-shaped prices for one date
//! - `status`, `export`, `restore`: store inspection and backup handling
//! - `watch`: poll for new prices until interrupted

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use goldlab_core::analytics::{Analyzer, Period, TrendQuery, TrendSeries};
use goldlab_core::data::{CircuitBreaker, QuoteProvider, SyntheticProvider, VnAppMobProvider};
use goldlab_core::domain::{Company, Timestamp};
use goldlab_core::{CsvRecordStore, HealReport, Healer, MergeOutcome, RecordStore};
use goldlab_runner::{AnalyticsReport, GoldlabConfig, JsonLinesSink, LogSink, Poller};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "goldlab.toml";

#[derive(Parser)]
#[command(
    name = "goldlab",
    about = "GoldLab CLI: gold price history, gap healing and analytics"
)]
struct Cli {
    /// Path to a TOML config file. Defaults to ./goldlab.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the deterministic synthetic provider instead of the HTTP API.
    #[arg(long, global = true, default_value_t = false)]
    synthetic: bool,

    /// Debug logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct QueryArgs {
    /// Company code: sjc, doji or pnj.
    company: String,

    /// Instrument (e.g. "SJC 1L"). All instruments when omitted.
    #[arg(long)]
    instrument: Option<String>,

    /// Location. Resolved from the company's table when omitted.
    #[arg(long)]
    location: Option<String>,

    /// Days of history. Defaults to 30.
    #[arg(long, conflicts_with = "period")]
    days: Option<i64>,

    /// Named window: weekly, monthly, quarterly, yearly.
    #[arg(long)]
    period: Option<Period>,

    /// Reference date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Print JSON instead of a table.
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl QueryArgs {
    fn query(&self) -> TrendQuery {
        let mut query = TrendQuery::new(&self.company);
        if let Some(instrument) = &self.instrument {
            query = query.instrument(instrument);
        }
        if let Some(location) = &self.location {
            query = query.location(location);
        }
        match (self.days, self.period) {
            (Some(days), _) => query.days_back(days),
            (None, Some(period)) => query.period(period),
            (None, None) => query.period(Period::Monthly),
        }
    }

    fn today(&self) -> NaiveDate {
        self.as_of.unwrap_or_else(|| Local::now().date_naive())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Close any gap between the newest stored date and today.
    Update,
    /// Fetch the full lookback window and replace the store.
    Collect,
    /// Fetch current quotes once and merge them.
    Current,
    /// Print the trend series for one selection.
    Trend(QueryArgs),
    /// First-to-last price change.
    Change(QueryArgs),
    /// Standard deviation and coefficient of variation.
    Volatility(QueryArgs),
    /// Lowest and highest prices with their dates.
    Extremes(QueryArgs),
    /// Trailing moving average.
    MovingAverage {
        #[command(flatten)]
        query: QueryArgs,

        /// Window length in data points.
        #[arg(long, default_value_t = 7)]
        window: usize,
    },
    /// Trend plus every metric, as Markdown or JSON.
    Report(QueryArgs),
    /// Latest quote and spread for every company.
    Compare {
        /// Only consider the last N days.
        #[arg(long)]
        days: Option<i64>,

        /// Reference date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Stored calendar dates, newest first.
    Dates {
        /// Show at most this many dates.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Provider-shaped prices for one company and date.
    Prices {
        company: Company,

        /// Date (YYYY-MM-DD).
        date: NaiveDate,
    },
    /// Record count, date range and backup state of the store.
    Status,
    /// Copy the store to another CSV file.
    Export {
        /// Destination path.
        dest: PathBuf,
    },
    /// Replace the store with its backup copy.
    Restore {
        /// Actually restore (without this flag, only previews).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
    /// Poll for new prices, merging and announcing each change.
    Watch {
        /// Stop after this many polling cycles.
        #[arg(long)]
        cycles: Option<usize>,

        /// Override the poll interval in seconds.
        #[arg(long)]
        interval: Option<u64>,

        /// Append each update as a JSON line to this file.
        #[arg(long)]
        jsonl: Option<PathBuf>,

        /// Also write each update as a JSON line to stdout.
        #[arg(long, default_value_t = false)]
        stdout: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let store = config.store.open();

    match cli.command {
        Commands::Update => run_update(&config, &store, cli.synthetic),
        Commands::Collect => run_collect(&config, &store, cli.synthetic),
        Commands::Current => run_current(&config, &store, cli.synthetic),
        Commands::Trend(args) => run_trend(&store, &args),
        Commands::Change(args) => run_change(&store, &args),
        Commands::Volatility(args) => run_volatility(&store, &args),
        Commands::Extremes(args) => run_extremes(&store, &args),
        Commands::MovingAverage { query, window } => run_moving_average(&store, &query, window),
        Commands::Report(args) => run_report(&store, &args),
        Commands::Compare { days, as_of, json } => run_compare(&store, days, as_of, json),
        Commands::Dates { limit } => run_dates(&store, limit),
        Commands::Prices { company, date } => run_prices(&store, company, date),
        Commands::Status => run_status(&store),
        Commands::Export { dest } => run_export(&store, &dest),
        Commands::Restore { confirm } => run_restore(&store, confirm),
        Commands::Watch {
            cycles,
            interval,
            jsonl,
            stdout,
        } => run_watch(config, store, cli.synthetic, cycles, interval, jsonl, stdout),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "goldlab=debug" } else { "goldlab=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<GoldlabConfig> {
    let config = match path {
        Some(path) => GoldlabConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            GoldlabConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))
                .with_context(|| format!("loading {DEFAULT_CONFIG_FILE}"))?
        }
        None => GoldlabConfig::from_env()?,
    };
    tracing::debug!(store = %config.store.path().display(), "config loaded");
    Ok(config)
}

fn build_provider(config: &GoldlabConfig, synthetic: bool) -> Result<Box<dyn QuoteProvider>> {
    if synthetic {
        return Ok(Box::new(SyntheticProvider::new(Local::now().date_naive())));
    }
    let breaker = Arc::new(CircuitBreaker::default_provider());
    let provider = VnAppMobProvider::new(config.provider.settings(), breaker)
        .context("building HTTP client")?;
    Ok(Box::new(provider))
}

fn healer<'a>(config: &GoldlabConfig, provider: &'a dyn QuoteProvider) -> Healer<'a> {
    Healer::new(provider, config.heal.clone())
        .with_normalizer(config.normalizer())
        .with_reconciler(config.reconciler())
        .with_request_delay(config.provider.request_delay())
}

// ── Store maintenance ────────────────────────────────────────────────

fn run_update(config: &GoldlabConfig, store: &CsvRecordStore, synthetic: bool) -> Result<()> {
    let provider = build_provider(config, synthetic)?;
    let report = healer(config, provider.as_ref()).heal(store, Local::now().naive_local())?;
    print_heal_report(&report);
    Ok(())
}

fn run_collect(config: &GoldlabConfig, store: &CsvRecordStore, synthetic: bool) -> Result<()> {
    let provider = build_provider(config, synthetic)?;
    let outcome = healer(config, provider.as_ref()).collect(store, Local::now().naive_local())?;
    if outcome.additions == 0 {
        bail!("collection returned no data; store left untouched");
    }
    println!("Collected {} records into {}", outcome.additions, store.path().display());
    Ok(())
}

fn run_current(config: &GoldlabConfig, store: &CsvRecordStore, synthetic: bool) -> Result<()> {
    let provider = build_provider(config, synthetic)?;
    let outcome =
        healer(config, provider.as_ref()).merge_current(store, Local::now().naive_local())?;
    print_outcome(&outcome);
    Ok(())
}

fn print_heal_report(report: &HealReport) {
    println!();
    println!("=== Heal ===");
    println!("Status:         {}", report.status);
    println!("Message:        {}", report.message);
    if let Some(last) = report.last_date {
        println!("Last date:      {last}");
    }
    if let Some(missing) = report.missing_days {
        println!("Missing days:   {missing}");
    }
    if let Some(window) = report.window {
        println!("Window:         {} to {} ({} days)", window.from, window.to, window.days());
    }
    println!("Fetched:        {}", report.fetched);
    print_outcome(&report.outcome);
}

fn print_outcome(outcome: &MergeOutcome) {
    if outcome.is_unchanged() {
        println!("No changes.");
    } else {
        println!(
            "Added {}, replaced {}, skipped {}.",
            outcome.additions, outcome.replacements, outcome.skipped
        );
    }
}

fn run_status(store: &CsvRecordStore) -> Result<()> {
    if !store.exists() {
        println!("Store does not exist yet: {}", store.path().display());
        return Ok(());
    }
    let records = store.load()?;
    println!("Store:          {}", store.path().display());
    println!("Records:        {}", records.len());
    match store.last_date()? {
        Some(last) => {
            let missing = (Local::now().date_naive() - last).num_days();
            println!("Last date:      {last} ({missing} day(s) ago)");
        }
        None => println!("Last date:      (none)"),
    }
    if let Some(meta) = store.meta() {
        let range = match (meta.first_date, meta.last_date) {
            (Some(first), Some(last)) => format!("{first} to {last}"),
            _ => "(empty)".into(),
        };
        println!("Range:          {range}");
        println!("Written at:     {}", meta.written_at);
        println!("Hash:           {}", meta.data_hash);
        if meta.record_count != records.len() {
            println!(
                "WARNING: meta records {} rows, file has {}",
                meta.record_count,
                records.len()
            );
        }
    }
    let backup = store.backup_path();
    if backup.exists() {
        println!("Backup:         {}", backup.display());
    }
    Ok(())
}

fn run_export(store: &CsvRecordStore, dest: &Path) -> Result<()> {
    let count = store.export(dest)?;
    println!("Exported {count} records to {}", dest.display());
    Ok(())
}

fn run_restore(store: &CsvRecordStore, confirm: bool) -> Result<()> {
    let backup = store.backup_path();
    if !backup.exists() {
        bail!("no backup found at {}", backup.display());
    }
    if !confirm {
        println!("Would restore {} over {}", backup.display(), store.path().display());
        println!("Dry run — pass --confirm to actually restore.");
        return Ok(());
    }
    let count = store.restore_backup()?;
    println!("Restored {count} records from {}", backup.display());
    Ok(())
}

// ── Analytics ────────────────────────────────────────────────────────

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_header(args: &QueryArgs, series: &TrendSeries) {
    println!();
    println!(
        "{} / {} / {} ({} points)",
        args.company.to_uppercase(),
        args.instrument.as_deref().unwrap_or("all instruments"),
        series.location.as_deref().unwrap_or("n/a"),
        series.len()
    );
}

fn run_trend(store: &CsvRecordStore, args: &QueryArgs) -> Result<()> {
    let series = Analyzer::new(store.clone()).trend(&args.query(), args.today())?;
    if args.json {
        return print_json(&series);
    }
    print_header(args, &series);
    println!("{:<12} {:>14} {:>14}", "Date", "Buy", "Sell");
    println!("{}", "-".repeat(42));
    for i in 0..series.len() {
        println!(
            "{:<12} {:>14.0} {:>14.0}",
            series.dates[i].date_part(),
            series.buy_prices[i],
            series.sell_prices[i]
        );
    }
    Ok(())
}

fn run_change(store: &CsvRecordStore, args: &QueryArgs) -> Result<()> {
    let change = Analyzer::new(store.clone()).price_change(&args.query(), args.today())?;
    if args.json {
        return print_json(&change);
    }
    println!("Buy change:     {:+.0} ({:+.2}%)", change.buy_change, change.buy_change_percent);
    println!("Sell change:    {:+.0} ({:+.2}%)", change.sell_change, change.sell_change_percent);
    Ok(())
}

fn run_volatility(store: &CsvRecordStore, args: &QueryArgs) -> Result<()> {
    let vol = Analyzer::new(store.clone()).volatility(&args.query(), args.today())?;
    if args.json {
        return print_json(&vol);
    }
    println!("Buy std dev:    {:.0} ({:.2}%)", vol.buy_std_dev, vol.buy_volatility);
    println!("Sell std dev:   {:.0} ({:.2}%)", vol.sell_std_dev, vol.sell_volatility);
    Ok(())
}

fn day(ts: &Option<Timestamp>) -> &str {
    ts.as_ref().map(Timestamp::date_part).unwrap_or("")
}

fn run_extremes(store: &CsvRecordStore, args: &QueryArgs) -> Result<()> {
    let ext = Analyzer::new(store.clone()).extremes(&args.query(), args.today())?;
    if args.json {
        return print_json(&ext);
    }
    println!("Buy low:        {:.0} ({})", ext.buy.min, day(&ext.buy.min_date));
    println!("Buy high:       {:.0} ({})", ext.buy.max, day(&ext.buy.max_date));
    println!("Sell low:       {:.0} ({})", ext.sell.min, day(&ext.sell.min_date));
    println!("Sell high:      {:.0} ({})", ext.sell.max, day(&ext.sell.max_date));
    Ok(())
}

fn run_moving_average(store: &CsvRecordStore, args: &QueryArgs, window: usize) -> Result<()> {
    if window == 0 {
        bail!("--window must be at least 1");
    }
    let ma = Analyzer::new(store.clone()).moving_average(&args.query(), window, args.today())?;
    if args.json {
        return print_json(&ma);
    }
    println!("{:<12} {:>14} {:>14}", "Date", "Buy MA", "Sell MA");
    println!("{}", "-".repeat(42));
    for i in 0..ma.dates.len() {
        println!(
            "{:<12} {:>14.0} {:>14.0}",
            ma.dates[i].date_part(),
            ma.buy_ma[i],
            ma.sell_ma[i]
        );
    }
    Ok(())
}

fn run_report(store: &CsvRecordStore, args: &QueryArgs) -> Result<()> {
    let report = AnalyticsReport::build(&store.load()?, &args.query(), args.today());
    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.to_markdown());
    }
    Ok(())
}

fn run_compare(
    store: &CsvRecordStore,
    days: Option<i64>,
    as_of: Option<NaiveDate>,
    json: bool,
) -> Result<()> {
    let today = as_of.unwrap_or_else(|| Local::now().date_naive());
    let rows = Analyzer::new(store.clone()).compare_companies(days, today)?;
    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No data to compare.");
        return Ok(());
    }
    println!("{:<6} {:<20} {:>14} {:>14} {:>12}", "Co.", "Timestamp", "Buy", "Sell", "Spread");
    println!("{}", "-".repeat(70));
    for row in &rows {
        println!(
            "{:<6} {:<20} {:>14.0} {:>14.0} {:>12.0}",
            row.company.code(),
            row.timestamp.as_str(),
            row.latest_buy, row.latest_sell, row.spread
        );
    }
    Ok(())
}

fn run_dates(store: &CsvRecordStore, limit: Option<usize>) -> Result<()> {
    let dates = Analyzer::new(store.clone()).available_dates()?;
    if dates.is_empty() {
        println!("No stored dates.");
        return Ok(());
    }
    for date in dates.iter().take(limit.unwrap_or(usize::MAX)) {
        println!("{date}");
    }
    Ok(())
}

fn run_prices(store: &CsvRecordStore, company: Company, date: NaiveDate) -> Result<()> {
    let date = date.format("%Y-%m-%d").to_string();
    let prices = Analyzer::new(store.clone()).prices_on(company, &date)?;
    if prices.is_empty() {
        bail!("no {company} prices stored for {date}");
    }
    print_json(&prices)
}

// ── Watch ────────────────────────────────────────────────────────────

fn run_watch(
    mut config: GoldlabConfig,
    store: CsvRecordStore,
    synthetic: bool,
    cycles: Option<usize>,
    interval: Option<u64>,
    jsonl: Option<PathBuf>,
    stdout: bool,
) -> Result<()> {
    if let Some(secs) = interval {
        if secs == 0 {
            bail!("--interval must be positive");
        }
        config.poll.interval_secs = secs;
    }
    let provider = build_provider(&config, synthetic)?;
    let mut poller = Poller::new(provider, store, &config).with_sink(Box::new(LogSink));
    if let Some(path) = jsonl {
        let file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        poller = poller.with_sink(Box::new(JsonLinesSink::new(
            path.display().to_string(),
            BufWriter::new(file),
        )));
    }
    if stdout {
        poller = poller.with_sink(Box::new(JsonLinesSink::new("stdout", std::io::stdout())));
    }

    tracing::info!(
        interval_secs = config.poll.interval_secs,
        companies = ?config.companies(),
        "watching for new prices"
    );
    let summary = poller.run(None, cycles)?;
    println!(
        "Polled {} time(s), {} change(s), {} failed cycle(s).",
        summary.cycles, summary.changes, summary.failures
    );
    if let Some(heal) = &summary.heal {
        println!("Startup heal: {} ({})", heal.status, heal.message);
    }
    Ok(())
}
