//! Swing Scanner - daily trend-then-consolidation scan.
//!
//! Fetches (incrementally) daily bars for a universe, scores each survivor of
//! the liquidity filters, and writes dated ranked and diagnostic outputs.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use swing_common::config::Config;
use swing_common::logging::init_from_config;
use swing_scanner::data::{
    resolve_instruments, HistoricalProvider, KiteAdapter, OfflineProvider, OhlcvStore, SqliteStore,
};
use swing_scanner::screener::{load_universe, ScanEngine, ScanReport};

/// Persisted instrument map, relative to the cache directory
const INSTRUMENTS_FILE: &str = "instruments.csv";

#[derive(Parser, Debug)]
#[command(name = "swing-scanner")]
#[command(version)]
#[command(about = "Rank stocks coiling in a tight box after an uptrend.", long_about = None)]
struct Cli {
    /// Config file (default: $SWING_CONFIG or ~/.swingscan/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the universe and write ranked and diagnostic outputs (default)
    Scan(ScanArgs),

    /// List dates present in the OHLCV store
    Dates,

    /// List symbols stored for a date
    Symbols {
        /// Date as YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,
    },
}

#[derive(Args, Debug, Default)]
struct ScanArgs {
    /// Universe file, one ticker per line
    #[arg(long)]
    universe: Option<String>,

    /// Scan date as YYYY-MM-DD (default: today)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Serve only cached series; never call the data provider
    #[arg(long)]
    offline: bool,

    /// Symbols fetched concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// Rows in the console table
    #[arg(long)]
    top: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Scan(ScanArgs::default()));

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env_overrides();
    if let Commands::Scan(args) = &command {
        apply_scan_args(&mut config, args);
    }
    config.validate()?;

    init_from_config(&config.observability);
    info!("Swing Scanner v{}", env!("CARGO_PKG_VERSION"));

    match command {
        Commands::Scan(args) => run_scan(&config, &args).await,
        Commands::Dates => {
            let store = SqliteStore::open(config.storage.db_path())?;
            for date in store.distinct_dates().await? {
                println!("{date}");
            }
            Ok(())
        }
        Commands::Symbols { date } => {
            let store = SqliteStore::open(config.storage.db_path())?;
            for symbol in store.symbols_on_date(date).await? {
                println!("{symbol}");
            }
            Ok(())
        }
    }
}

fn apply_scan_args(config: &mut Config, args: &ScanArgs) {
    if let Some(universe) = &args.universe {
        config.scan.universe_path = universe.clone();
    }
    if let Some(workers) = args.workers {
        config.scan.workers = workers;
    }
    if let Some(top) = args.top {
        config.scan.top_n = top;
    }
}

async fn run_scan(config: &Config, args: &ScanArgs) -> Result<()> {
    let startup_start = std::time::Instant::now();
    let scan_date = args.date.unwrap_or_else(|| Local::now().date_naive());
    let cache_dir = config.storage.cache_dir();
    let instruments_path = cache_dir.join(INSTRUMENTS_FILE);

    let universe_path = swing_common::config::expand_path(&config.scan.universe_path);
    let universe = load_universe(&universe_path)?;

    let provider: Arc<dyn HistoricalProvider> = if args.offline {
        Arc::new(OfflineProvider::new(instruments_path.clone()))
    } else {
        Arc::new(KiteAdapter::from_config(&config.kite).context("Kite credentials unavailable")?)
    };

    let instruments = resolve_instruments(provider.as_ref(), &instruments_path).await?;

    let store: Option<Arc<dyn OhlcvStore>> = match SqliteStore::open(config.storage.db_path()) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(error = %e, "OHLCV store unavailable, continuing without it");
            None
        }
    };

    let mut engine = ScanEngine::new(config.scan.clone(), provider, cache_dir);
    if let Some(store) = &store {
        engine = engine.with_store(store.clone());
    }

    info!(
        duration_ms = startup_start.elapsed().as_millis() as u64,
        %scan_date,
        symbols = universe.len(),
        instruments = instruments.len(),
        "Scanner initialized"
    );

    let result = engine.run(&universe, &instruments, scan_date).await;

    let report = ScanReport::new(&result);
    let paths = report.write_all(&config.storage.out_dir())?;
    if let Some(store) = &store {
        report.record_to_store(store.as_ref()).await;
    }

    print!("{}", report.console_table(config.scan.top_n));
    println!("Saved: {}", paths.dir.display());
    Ok(())
}
