use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod generator;
mod input;
mod models;
mod origin;
mod runner;
mod stats;

/// Keyed cache retry-policy simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the CLI
#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay traces against one cache per retry scenario
    Simulate {
        /// Directory containing trace files (`timestamp_ms,key` CSV)
        #[arg(short, long, value_name = "DIR", default_value = "traces")]
        input_dir: PathBuf,

        /// Scenarios to run; all of them if omitted
        #[arg(short, long, value_enum, num_args = 1.., value_delimiter = ',')]
        scenarios: Option<Vec<models::Scenario>>,

        /// Lifetime of a fetched value, in seconds
        #[arg(long, default_value = "300")]
        max_age: f64,

        /// Fail requests instead of serving the previous value when a refetch fails
        #[arg(long)]
        no_stale: bool,

        /// Probability that a single origin call fails
        #[arg(long, default_value = "0.05")]
        failure_rate: f64,

        /// Origin outage windows as START-END seconds, e.g. 600-900
        #[arg(long, value_name = "WINDOW", num_args = 1.., value_delimiter = ',')]
        outage: Vec<models::Outage>,

        /// Retry interval for the constant scenario, in seconds
        #[arg(long, default_value = "10")]
        retry_interval: f64,

        /// Initial interval for the backoff scenario, in seconds
        #[arg(long, default_value = "1")]
        backoff_initial: f64,

        /// Maximum interval for the backoff scenario, in seconds
        #[arg(long, default_value = "60")]
        backoff_max: f64,

        /// Seed for the origin's failure draws
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Number of key-map segments per cache
        #[arg(long)]
        segments: Option<usize>,

        /// Export results to CSV file
        #[arg(long, value_name = "PATH")]
        output_csv: Option<PathBuf>,
    },

    /// Generate a synthetic trace
    Generate {
        /// Mean requests per second
        #[arg(long, default_value = "50")]
        rps: u32,

        /// Duration in seconds
        #[arg(long, default_value = "3600")]
        duration: u64,

        /// Number of unique keys
        #[arg(long, default_value = "1000")]
        keys: u32,

        /// Percentage of traffic going to popular keys
        #[arg(long, default_value = "80")]
        popular_traffic: u8,

        /// Percentage of keys that are popular
        #[arg(long, default_value = "20")]
        popular_keys: u8,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output directory
        #[arg(short, long, default_value = "traces")]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fetch_simulator=info,keyed_cache=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    match args.command {
        Commands::Generate {
            rps,
            duration,
            keys,
            popular_traffic,
            popular_keys,
            seed,
            output,
        } => {
            let config = generator::TraceConfig {
                rps,
                duration_secs: duration,
                unique_keys: keys,
                popular_traffic_percent: popular_traffic,
                popular_keys_percent: popular_keys,
                seed,
                output_dir: output,
            };
            let written = generator::TraceGenerator::new(config).generate()?;
            println!("Generated {written} requests");
            Ok(())
        }

        Commands::Simulate {
            input_dir,
            scenarios,
            max_age,
            no_stale,
            failure_rate,
            outage,
            retry_interval,
            backoff_initial,
            backoff_max,
            seed,
            segments,
            output_csv,
        } => {
            let config = models::SimulationConfig {
                input_dir,
                scenarios: scenarios
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(models::Scenario::all),
                max_age: secs("max-age", max_age)?,
                allow_stale: !no_stale,
                failure_rate,
                outages: outage,
                retry_interval: secs("retry-interval", retry_interval)?,
                backoff_initial: secs("backoff-initial", backoff_initial)?,
                backoff_max: secs("backoff-max", backoff_max)?,
                seed,
                segments,
            };
            run_simulation(config, output_csv)
        }
    }
}

fn secs(name: &str, value: f64) -> Result<Duration, String> {
    if value < 0.0 {
        return Err(format!("--{name} must not be negative"));
    }
    Duration::try_from_secs_f64(value).map_err(|e| format!("--{name}: {e}"))
}

fn run_simulation(
    config: models::SimulationConfig,
    output_csv: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        input = %config.input_dir.display(),
        scenarios = ?config.scenarios,
        failure_rate = config.failure_rate,
        outages = config.outages.len(),
        "starting simulation"
    );

    let result = match runner::SimulationRunner::new(config).run() {
        Ok(result) => result,
        Err(e) => {
            error!("simulation failed: {e}");
            return Err(e.into());
        }
    };

    let stats = stats::SimulationStats::new(&result);
    stats.print_summary();

    if let Some(csv_path) = output_csv {
        match stats.export_csv(&csv_path) {
            Ok(()) => println!("\nResults exported to: {}", csv_path.display()),
            Err(e) => eprintln!("Failed to export CSV: {e}"),
        }
    }

    Ok(())
}
