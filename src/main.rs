use alphalab::{
    commands::{backtest, export_market_data, robustness},
    context::{resolve_experiment_id, AppContext},
    errors::exit_code_for_error,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "alphalab")]
#[command(about = "Deterministic strategy backtests and robustness diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest and write metrics, daily series and an equity chart
    Backtest {
        /// Path to the JSON config file
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
        /// Experiment identifier (generated when omitted)
        #[arg(long = "experiment-id", value_name = "ID")]
        experiment_id: Option<String>,
    },
    /// Run the robustness suite: walk-forward, parameter grid, cost stress and regimes
    Robustness {
        /// Path to the JSON config file
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
        /// Experiment identifier (generated when omitted)
        #[arg(long = "experiment-id", value_name = "ID")]
        experiment_id: Option<String>,
        /// Skip chart rendering
        #[arg(long = "no-plots")]
        no_plots: bool,
    },
    /// Export the configured market data as a snapshot file
    ExportMarketData {
        /// Path to the JSON config file
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run(Cli::parse()) {
        error!("{:#}", err);
        process::exit(exit_code_for_error(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    let Cli { command } = cli;
    let app_context = AppContext::initialize(config_path(&command))?;
    configure_thread_pool(app_context.config().threads)?;

    match command {
        Commands::Backtest { experiment_id, .. } => {
            let experiment_id = resolve_experiment_id(experiment_id);
            backtest::run(&app_context, &experiment_id)?;
        }
        Commands::Robustness {
            experiment_id,
            no_plots,
            ..
        } => {
            let experiment_id = resolve_experiment_id(experiment_id);
            robustness::run(&app_context, &experiment_id, !no_plots)?;
        }
        Commands::ExportMarketData { output, .. } => {
            export_market_data::run(&app_context, &output)?;
        }
    }
    Ok(())
}

fn config_path(command: &Commands) -> &PathBuf {
    match command {
        Commands::Backtest { config, .. }
        | Commands::Robustness { config, .. }
        | Commands::ExportMarketData { config, .. } => config,
    }
}

fn configure_thread_pool(threads: Option<usize>) -> Result<()> {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to configure the rayon thread pool")?;
        info!("Using {} worker threads", threads);
    }
    Ok(())
}
