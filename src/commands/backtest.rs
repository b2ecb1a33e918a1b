use crate::context::AppContext;
use crate::engine::run_backtest;
use crate::report::{save_equity_curve_chart, write_backtest_metrics, write_daily_csv};
use anyhow::{Context, Result};
use log::info;
use std::fs;

pub fn run(app: &AppContext, experiment_id: &str) -> Result<()> {
    let config = app.config();
    info!(
        "Received backtest command for experiment {} ({})",
        experiment_id, config.strategy.name
    );

    let market_data = app.market_data()?;
    let strategy = app.strategy()?;
    let result = run_backtest(
        market_data.tables(),
        strategy.as_ref(),
        &config.strategy.params,
        &config.backtest_config(),
    )
    .with_context(|| format!("Backtest failed for experiment {}", experiment_id))?;

    let output_dir = app.experiment_dir(experiment_id);
    fs::create_dir_all(&output_dir).with_context(|| {
        format!("Failed to create artifact directory {}", output_dir.display())
    })?;
    write_backtest_metrics(
        experiment_id,
        strategy.name(),
        &result,
        &output_dir.join("metrics.json"),
    )?;
    write_daily_csv(&result, &output_dir.join("daily.csv"))?;
    if config.output.save_plots {
        save_equity_curve_chart(
            &result.dates,
            &result.equity_curve,
            output_dir.join("equity_curve.svg"),
        )?;
    }

    let metrics = &result.metrics;
    info!(
        "Backtest {} finished over {} dates: annualized return {:.4}, sharpe {:.4}, max drawdown {:.4}, final equity {:.4}",
        experiment_id,
        result.dates.len(),
        metrics.annualized_return,
        metrics.sharpe_ratio,
        metrics.max_drawdown,
        result.final_equity()
    );
    info!("Artifacts written to {}", output_dir.display());
    Ok(())
}
