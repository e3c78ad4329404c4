use clap::Parser;
use histfeed::data::{ArchiveDataSource, ArchiveFetcher, DataSource, InstrumentLoad, LoadReport};
use histfeed::strategy::{TemplateParams, TradingSystemParams};

#[derive(Parser)]
#[command(name = "histfeed", about = "Historical market data loader for backtesting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Download any missing instrument files into the local cache
    Fetch {
        #[arg(short, long, default_value = "trainingData1")]
        dataset: String,
        /// Comma-separated instrument ids; empty means the dataset's full
        /// discoverable universe
        #[arg(short, long, default_value = "")]
        instruments: String,
        #[arg(short, long, default_value = "historical_data")]
        cache_dir: String,
    },
    /// Load, parse and group the cached data, printing a summary
    Load {
        #[arg(short, long, default_value = "trainingData1")]
        dataset: String,
        #[arg(short, long, default_value = "")]
        instruments: String,
        #[arg(short, long, default_value = "historical_data")]
        cache_dir: String,
    },
    /// Print the sample trading-system wiring
    Params,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            dataset,
            instruments,
            cache_dir,
        } => {
            run_fetch(&dataset, &instruments, &cache_dir).await?;
        }
        Commands::Load {
            dataset,
            instruments,
            cache_dir,
        } => {
            run_load(&dataset, &instruments, &cache_dir).await?;
        }
        Commands::Params => {
            print_params(&TemplateParams);
        }
    }

    Ok(())
}

fn split_instruments(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

async fn run_fetch(
    dataset: &str,
    instruments: &str,
    cache_dir: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = ArchiveFetcher::new();
    let mut source = ArchiveDataSource::new(cache_dir, dataset, split_instruments(instruments));
    let report = source.load(&fetcher).await?;

    print_instrument_outcomes(&report);
    println!(
        "{} of {} instruments cached under {}",
        report.loaded_count(),
        report.instruments.len(),
        source.dataset_dir().display()
    );
    Ok(())
}

async fn run_load(
    dataset: &str,
    instruments: &str,
    cache_dir: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = ArchiveFetcher::new();
    let mut source = ArchiveDataSource::new(cache_dir, dataset, split_instruments(instruments));
    let report = source.load(&fetcher).await?;

    println!("=== {} ===", dataset);
    print_instrument_outcomes(&report);
    println!("{} records in {} batches", report.records, report.batches);

    let grouped = source.grouped_updates();
    if let (Some(first), Some(last)) = (grouped.first(), grouped.last()) {
        println!("time span: {} .. {}", first.0, last.0);
    }
    match source.feature_keys() {
        Some(keys) => println!("feature keys: {}", keys.join(", ")),
        None => println!("feature keys: none (no rows parsed)"),
    }
    if report.malformed_rows > 0 {
        println!("{} malformed rows dropped", report.malformed_rows);
    }
    if !report.schema_drift.is_empty() {
        println!("schema drift in: {}", report.schema_drift.join(", "));
    }
    Ok(())
}

fn print_instrument_outcomes(report: &LoadReport) {
    for (id, outcome) in &report.instruments {
        match outcome {
            InstrumentLoad::Loaded { records } => {
                println!("  {:10} {:>7} records", id, records);
            }
            InstrumentLoad::Skipped { reason } => {
                println!("  {:10} skipped: {}", id, reason);
            }
        }
    }
}

fn print_params(params: &impl TradingSystemParams) {
    let (start, end) = params.date_range();
    let exec = params.execution();

    println!("=== Sample Trading System ===");
    println!("Use this as a template to wire features and a prediction function.");
    println!();
    println!("  Universe:        {}", params.universe().join(", "));
    println!("  Benchmark:       {}", params.benchmark());
    println!("  Date range:      {} .. {}", start, end);
    println!("  Capital:         ${}", params.starting_capital());
    println!("  Price feature:   {}", params.price_feature_key());
    println!("  Lookback:        {}", params.lookback_size());
    println!("  Order placer:    {:?}", params.order_placer());
    println!(
        "  Enter/exit:      {} / {}",
        exec.enter_threshold, exec.exit_threshold
    );
    println!(
        "  Limits:          long {} short {} capital {} lot {}",
        exec.long_limit, exec.short_limit, exec.capital_usage_limit, exec.lot_size
    );
    println!();
    println!("  Market features:");
    for config in params.market_feature_configs() {
        println!("    {} -> {}", config.feature_id, config.key());
    }
    println!("  Instrument features:");
    for (instrument_type, configs) in params.instrument_feature_configs() {
        for config in configs {
            println!(
                "    [{:?}] {} -> {}",
                instrument_type,
                config.feature_id,
                config.key()
            );
        }
    }
}
