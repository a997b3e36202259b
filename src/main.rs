//! CLI entry point for lockcycle
//!
//! Runs lock cycle tests against the simulated device and reports the outcome.
//!
//! # Usage
//!
//! Run with the default configuration file:
//! ```bash
//! lockcycle run
//! ```
//!
//! Override parameters and write a JSON report:
//! ```bash
//! lockcycle run --cycles 500 --failure-rate 0.05 --seed 7 --report run.json
//! ```
//!
//! Check the effective configuration:
//! ```bash
//! lockcycle check-config --config config/lockcycle.toml
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lockcycle::config::{AppConfig, DEFAULT_CONFIG_PATH};
use lockcycle::{logging, write_report, LockCycleApp};
use lockcycle_core::TestRun;
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser)]
#[command(name = "lockcycle", version)]
#[command(about = "Lock open/close cycle testing with latency and reliability statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a cycle test against the simulated lock
    Run(RunArgs),

    /// Load and validate configuration, then print it
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Number of cycles
    #[arg(long)]
    cycles: Option<u32>,

    /// Response timeout per command
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Delay between the commands of a cycle
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Simulated failure probability (0.0 - 1.0)
    #[arg(long)]
    failure_rate: Option<f64>,

    /// Seed for reproducible simulated failures
    #[arg(long)]
    seed: Option<u64>,

    /// Write the final run as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the final run as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(cycles) = self.cycles {
            config.test.target_cycles = cycles;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.test.response_timeout_ms = timeout_ms;
        }
        if let Some(delay_ms) = self.delay_ms {
            config.test.inter_command_delay_ms = delay_ms;
        }
        if let Some(rate) = self.failure_rate {
            config.simulator.failure_rate = rate;
        }
        if let Some(seed) = self.seed {
            config.simulator.seed = Some(seed);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = AppConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    args.apply(&mut config);
    logging::init_from_config(&config)?;

    let app = LockCycleApp::new(config)?;

    let runner = app.runner().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current cycle");
            if let Err(err) = runner.stop() {
                warn!(error = %err, "Could not stop test run");
            }
        }
    });

    let run = app.run().await?;
    app.shutdown();

    if let Some(path) = &args.report {
        write_report(path, &run)?;
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_summary(&run);
    }
    Ok(())
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = AppConfig::load_from(&path).with_context(|| format!("loading {}", path.display()))?;
    config.validate()?;
    println!("Configuration OK ({})", path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn print_summary(run: &TestRun) {
    println!();
    println!("Test run {}", run.id);
    println!("  Status:        {}", run.status);
    if let Some(reason) = &run.interruption {
        println!("  Interrupted:   {}", reason);
    }
    println!(
        "  Cycles:        {} / {}",
        run.current_cycle, run.config.target_cycles
    );
    println!("  Successful:    {}", run.success_count);
    println!("  Failed:        {}", run.failure_count);
    if let Some(stats) = &run.statistics {
        println!("  Success rate:  {:.1}%", stats.success_rate);
        println!(
            "  Response time: avg {} ms, min {} ms, max {} ms",
            stats.avg_response_time_ms, stats.min_response_time_ms, stats.max_response_time_ms
        );
        println!("  Duration:      {} ms", stats.total_duration_ms);
    }
}
