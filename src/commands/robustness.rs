use crate::context::AppContext;
use crate::robustness::run_robustness_suite;
use crate::status::SuiteStatus;
use anyhow::{Context, Result};
use log::info;

pub fn run(app: &AppContext, experiment_id: &str, save_plots: bool) -> Result<()> {
    let config = app.config();
    info!(
        "Received robustness command for experiment {} ({})",
        experiment_id, config.strategy.name
    );

    let market_data = app.market_data()?;
    let strategy = app.strategy()?;
    let output_dir = app.experiment_dir(experiment_id);
    let status = SuiteStatus::with_progress_bar();

    let result = run_robustness_suite(
        experiment_id,
        market_data.tables(),
        strategy.as_ref(),
        &config.strategy.params,
        &config.backtest_config(),
        &config.robustness_settings(),
        &output_dir,
        save_plots && config.output.save_plots,
        &status,
    )
    .with_context(|| format!("Robustness suite failed for experiment {}", experiment_id))?;

    let aggregated = &result.aggregated_metrics;
    info!(
        "Baseline sharpe {:.4}; average sharpe walk-forward {:.4}, grid {:.4}, cost {:.4}, regimes {:.4}",
        aggregated.baseline_sharpe_ratio,
        aggregated.walk_forward_average_sharpe_ratio,
        aggregated.parameter_grid_average_sharpe_ratio,
        aggregated.cost_stress_average_sharpe_ratio,
        aggregated.regime_average_sharpe_ratio
    );
    info!("Report: {}", result.report_path.display());
    info!("Summary: {}", result.summary_json_path.display());
    Ok(())
}
