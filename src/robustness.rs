use crate::engine::{BacktestConfig, BacktestEngine};
use crate::errors::{ResearchError, ResearchResult};
use crate::indicators::{
    calculate_equity_curve, calculate_pct_change, calculate_rolling_mean, calculate_rolling_std,
    intersect_index, median,
};
use crate::models::*;
use crate::param_utils::expand_parameter_grid;
use crate::performance::PerformanceCalculator;
use crate::report::{self, SuiteReport};
use crate::status::SuiteStatus;
use crate::strategy::Strategy;
use chrono::{DateTime, Utc};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct RobustnessSettings {
    pub walk_forward_splits: usize,
    pub parameter_grid: BTreeMap<String, Vec<f64>>,
    pub cost_stress_bps: Vec<f64>,
    pub volatility_window: usize,
    pub trend_window: usize,
}

impl Default for RobustnessSettings {
    fn default() -> Self {
        Self {
            walk_forward_splits: 4,
            parameter_grid: BTreeMap::new(),
            cost_stress_bps: vec![0.0, 5.0, 10.0, 25.0, 50.0],
            volatility_window: 20,
            trend_window: 50,
        }
    }
}

impl RobustnessSettings {
    pub fn validate(&self) -> ResearchResult<()> {
        if self.volatility_window == 0 {
            return Err(ResearchError::robustness("volatility_window must be >= 1"));
        }
        if self.trend_window == 0 {
            return Err(ResearchError::robustness("trend_window must be >= 1"));
        }
        if let Some(cost) = self
            .cost_stress_bps
            .iter()
            .find(|cost| !(cost.is_finite() && **cost >= 0.0))
        {
            return Err(ResearchError::robustness(format!(
                "cost_stress_bps values must be >= 0 (value: {})",
                cost
            )));
        }
        Ok(())
    }
}

/// Sorted dates present in every symbol's table.
pub fn common_index(data: &BTreeMap<String, PriceTable>) -> ResearchResult<Vec<DateTime<Utc>>> {
    let index = intersect_index(data.values().map(|table| table.dates()));
    if index.is_empty() {
        return Err(ResearchError::robustness(
            "No common dates found across symbol datasets",
        ));
    }
    Ok(index)
}

/// Contiguous, nearly equal chunks; earlier chunks take the remainder rows.
pub fn split_index(index: &[DateTime<Utc>], splits: usize) -> Vec<&[DateTime<Utc>]> {
    if index.is_empty() {
        return Vec::new();
    }
    let chunk_count = splits.max(1).min(index.len());
    let base_size = index.len() / chunk_count;
    let remainder = index.len() % chunk_count;

    let mut chunks = Vec::with_capacity(chunk_count);
    let mut cursor = 0;
    for chunk_id in 0..chunk_count {
        let size = base_size + usize::from(chunk_id < remainder);
        chunks.push(&index[cursor..cursor + size]);
        cursor += size;
    }
    chunks
}

/// Restricts every symbol to `index`; any symbol left without rows is an error.
pub fn subset_by_index(
    data: &BTreeMap<String, PriceTable>,
    index: &[DateTime<Utc>],
) -> ResearchResult<BTreeMap<String, PriceTable>> {
    let mut subset = BTreeMap::new();
    for (symbol, table) in data {
        let rows = table.select_dates(index);
        if rows.is_empty() {
            return Err(ResearchError::robustness(format!(
                "Subset data is empty for symbol '{}'",
                symbol
            )));
        }
        subset.insert(symbol.clone(), rows);
    }
    Ok(subset)
}

/// Drops repeated values, keeping first occurrences in their original order.
pub fn unique_preserving_order(values: &[f64]) -> Vec<f64> {
    let mut unique: Vec<f64> = Vec::with_capacity(values.len());
    for value in values {
        if !unique.contains(value) {
            unique.push(*value);
        }
    }
    unique
}

/// Cross-symbol mean of close-to-close returns on `dates`.
///
/// Symbols without a row on a date are left out of that date's mean; dates no
/// symbol covers get zero.
pub fn regime_proxy_returns(
    data: &BTreeMap<String, PriceTable>,
    dates: &[DateTime<Utc>],
) -> Vec<f64> {
    let mut sums: HashMap<DateTime<Utc>, (f64, usize)> = HashMap::new();
    for table in data.values() {
        let table = if table.is_strictly_sorted() {
            table.clone()
        } else {
            table.sorted_by_date()
        };
        let Some(closes) = table.column(CLOSE_COLUMN) else {
            continue;
        };
        for (date, value) in table.dates().iter().zip(calculate_pct_change(closes)) {
            let entry = sums.entry(*date).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    dates
        .iter()
        .map(|date| match sums.get(date) {
            Some((sum, count)) if *count > 0 => sum / *count as f64,
            _ => 0.0,
        })
        .collect()
}

/// Row indices of each regime, split at the median of its rolling signal.
///
/// Dates where the signal is still warming up belong to no regime.
pub fn regime_masks(
    proxy_returns: &[f64],
    volatility_window: usize,
    trend_window: usize,
) -> Vec<(Regime, Vec<usize>)> {
    let volatility = calculate_rolling_std(proxy_returns, volatility_window);
    let trend: Vec<Option<f64>> = calculate_rolling_mean(proxy_returns, trend_window)
        .into_iter()
        .map(|value| value.map(f64::abs))
        .collect();

    let (high_volatility, low_volatility) = median_split(&volatility);
    let (trending, non_trending) = median_split(&trend);
    vec![
        (Regime::HighVolatility, high_volatility),
        (Regime::LowVolatility, low_volatility),
        (Regime::Trend, trending),
        (Regime::NonTrend, non_trending),
    ]
}

fn median_split(signal: &[Option<f64>]) -> (Vec<usize>, Vec<usize>) {
    let defined: Vec<f64> = signal.iter().flatten().copied().collect();
    let Some(threshold) = median(&defined) else {
        return (Vec::new(), Vec::new());
    };
    let mut at_or_above = Vec::new();
    let mut below = Vec::new();
    for (idx, value) in signal.iter().enumerate() {
        match value {
            Some(v) if *v >= threshold => at_or_above.push(idx),
            Some(v) if *v < threshold => below.push(idx),
            _ => {}
        }
    }
    (at_or_above, below)
}

/// Metrics over the baseline rows in `rows`, compounding from 1.0 within the subset.
pub fn metrics_for_rows(
    baseline: &BacktestResult,
    rows: &[usize],
    annualization_factor: u32,
) -> PerformanceMetrics {
    let gross_exposure = baseline.gross_exposure();
    let returns: Vec<f64> = rows.iter().map(|&t| baseline.daily_returns[t]).collect();
    let turnover: Vec<f64> = rows.iter().map(|&t| baseline.turnover[t]).collect();
    let exposure: Vec<f64> = rows.iter().map(|&t| gross_exposure[t]).collect();
    let equity = calculate_equity_curve(&returns);
    PerformanceCalculator::calculate_metrics(
        &returns,
        &equity,
        &turnover,
        &exposure,
        annualization_factor,
    )
}

fn mean_sharpe<'a>(metrics: impl Iterator<Item = &'a PerformanceMetrics>) -> f64 {
    let sharpe: Vec<f64> = metrics.map(|m| m.sharpe_ratio).collect();
    crate::indicators::mean(&sharpe)
}

/// Runs baseline, walk-forward, parameter grid, cost stress and regime analysis
/// for one strategy and writes the report, summary and optional charts to
/// `output_dir`.
#[allow(clippy::too_many_arguments)]
pub fn run_robustness_suite(
    experiment_id: &str,
    data: &BTreeMap<String, PriceTable>,
    strategy: &dyn Strategy,
    base_params: &StrategyParams,
    config: &BacktestConfig,
    settings: &RobustnessSettings,
    output_dir: &Path,
    save_plots: bool,
    status: &SuiteStatus,
) -> ResearchResult<RobustnessResult> {
    settings.validate()?;
    let engine = BacktestEngine::new(*config)?;

    status.set_phase("Baseline");
    info!(
        "Robustness suite {} for {} over {} symbols",
        experiment_id,
        strategy.name(),
        data.len()
    );
    let baseline = engine.backtest(data, strategy, base_params)?;

    let index = common_index(data)?;
    let chunks = split_index(&index, settings.walk_forward_splits);
    let combinations = expand_parameter_grid(base_params, &settings.parameter_grid);
    let costs = unique_preserving_order(&settings.cost_stress_bps);
    status.set_total_runs(1 + chunks.len() + combinations.len() + costs.len());
    status.record_run();

    status.set_phase("Walk-forward");
    info!("Walk-forward over {} chunks of {} common dates", chunks.len(), index.len());
    let walk_forward_results = chunks
        .par_iter()
        .enumerate()
        .map(|(chunk_id, chunk)| -> ResearchResult<WalkForwardRow> {
            let subset = subset_by_index(data, chunk)?;
            let result = engine.backtest(&subset, strategy, base_params)?;
            status.record_run();
            Ok(WalkForwardRow {
                split: chunk_id + 1,
                start: chunk[0].format("%Y-%m-%d").to_string(),
                end: chunk[chunk.len() - 1].format("%Y-%m-%d").to_string(),
                observation_count: chunk.len(),
                metrics: result.metrics,
            })
        })
        .collect::<ResearchResult<Vec<_>>>()?;

    status.set_phase("Parameter grid");
    info!("Parameter grid with {} combinations", combinations.len());
    let parameter_grid_results = combinations
        .par_iter()
        .map(|(label, params)| -> ResearchResult<ParameterGridRow> {
            let result = engine.backtest(data, strategy, params)?;
            status.record_run();
            debug!("Grid {} sharpe {:.4}", label, result.metrics.sharpe_ratio);
            Ok(ParameterGridRow {
                parameter_set: label.clone(),
                metrics: result.metrics,
            })
        })
        .collect::<ResearchResult<Vec<_>>>()?;

    status.set_phase("Cost stress");
    info!("Cost stress over {} cost levels", costs.len());
    let cost_stress_results = costs
        .par_iter()
        .map(|cost_bps| -> ResearchResult<CostStressRow> {
            let result = BacktestEngine::new(config.with_cost(*cost_bps))?
                .backtest(data, strategy, base_params)?;
            status.record_run();
            Ok(CostStressRow {
                cost_bps: *cost_bps,
                metrics: result.metrics,
            })
        })
        .collect::<ResearchResult<Vec<_>>>()?;

    status.set_phase("Regime analysis");
    let proxy = regime_proxy_returns(data, &baseline.dates);
    let regime_results: Vec<RegimeRow> =
        regime_masks(&proxy, settings.volatility_window, settings.trend_window)
            .into_iter()
            .map(|(regime, rows)| RegimeRow {
                regime,
                observation_count: rows.len(),
                metrics: metrics_for_rows(&baseline, &rows, config.annualization_factor),
            })
            .collect();
    for row in &regime_results {
        debug!(
            "Regime {}: {} observations",
            row.regime.as_str(),
            row.observation_count
        );
    }
    let empty_regimes: Vec<&str> = regime_results
        .iter()
        .filter(|row| row.observation_count == 0)
        .map(|row| row.regime.as_str())
        .collect();
    if !empty_regimes.is_empty() {
        status.set_debug_note(format!(
            "Regimes without observations: {}",
            empty_regimes.join(", ")
        ));
    }

    let aggregated_metrics = AggregatedMetrics {
        baseline_sharpe_ratio: baseline.metrics.sharpe_ratio,
        walk_forward_average_sharpe_ratio: mean_sharpe(
            walk_forward_results.iter().map(|row| &row.metrics),
        ),
        parameter_grid_average_sharpe_ratio: mean_sharpe(
            parameter_grid_results.iter().map(|row| &row.metrics),
        ),
        cost_stress_average_sharpe_ratio: mean_sharpe(
            cost_stress_results.iter().map(|row| &row.metrics),
        ),
        regime_average_sharpe_ratio: mean_sharpe(regime_results.iter().map(|row| &row.metrics)),
    };

    status.set_phase("Writing artifacts");
    fs::create_dir_all(output_dir).map_err(|e| ResearchError::artifact(output_dir, e))?;
    let mut artifact_paths: Vec<PathBuf> = Vec::new();
    if save_plots {
        artifact_paths.push(report::save_equity_curve_chart(
            &baseline.dates,
            &baseline.equity_curve,
            output_dir.join("baseline_equity_curve.svg"),
        )?);
        artifact_paths.push(report::save_walk_forward_chart(
            &walk_forward_results,
            output_dir.join("walk_forward.svg"),
        )?);
        artifact_paths.push(report::save_parameter_grid_chart(
            &parameter_grid_results,
            output_dir.join("parameter_grid.svg"),
        )?);
        artifact_paths.push(report::save_cost_stress_chart(
            &cost_stress_results,
            output_dir.join("cost_stress.svg"),
        )?);
        artifact_paths.push(report::save_regime_chart(
            &regime_results,
            output_dir.join("regimes.svg"),
        )?);
    }

    let suite_report = SuiteReport {
        experiment_id,
        baseline_metrics: &baseline.metrics,
        aggregated_metrics: &aggregated_metrics,
        walk_forward_results: &walk_forward_results,
        parameter_grid_results: &parameter_grid_results,
        cost_stress_results: &cost_stress_results,
        regime_results: &regime_results,
        artifact_paths: &artifact_paths,
    };
    let report_path = report::write_markdown_report(&suite_report, output_dir)?;
    let summary_json_path = report::write_summary_json(&suite_report, &report_path, output_dir)?;

    info!(
        "Robustness suite {} finished: baseline sharpe {:.4}, report at {}",
        experiment_id,
        aggregated_metrics.baseline_sharpe_ratio,
        report_path.display()
    );
    status.finish("Robustness suite completed");

    Ok(RobustnessResult {
        experiment_id: experiment_id.to_string(),
        baseline_metrics: baseline.metrics,
        aggregated_metrics,
        walk_forward_results,
        parameter_grid_results,
        cost_stress_results,
        regime_results,
        report_path,
        summary_json_path,
        artifact_paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap() + Duration::days(offset)
    }

    fn table(offsets: &[i64], closes: &[f64]) -> PriceTable {
        let mut columns = BTreeMap::new();
        columns.insert("close".to_string(), closes.to_vec());
        PriceTable::new(offsets.iter().map(|o| day(*o)).collect(), columns).unwrap()
    }

    #[test]
    fn split_sizes_put_remainder_first() {
        let index: Vec<DateTime<Utc>> = (0..10).map(day).collect();
        let sizes: Vec<usize> = split_index(&index, 3).iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(split_index(&index, 0).len(), 1);
        assert_eq!(split_index(&index[..2], 5).len(), 2);
    }

    #[test]
    fn common_index_requires_overlap() {
        let data = BTreeMap::from([
            ("AAA".to_string(), table(&[0, 1], &[1.0, 1.0])),
            ("BBB".to_string(), table(&[5, 6], &[1.0, 1.0])),
        ]);
        let err = common_index(&data).unwrap_err();
        assert!(matches!(err, ResearchError::Robustness(_)));

        let data = BTreeMap::from([
            ("AAA".to_string(), table(&[0, 1, 2], &[1.0, 1.0, 1.0])),
            ("BBB".to_string(), table(&[2, 1, 3], &[1.0, 1.0, 1.0])),
        ]);
        assert_eq!(common_index(&data).unwrap(), vec![day(1), day(2)]);
    }

    #[test]
    fn cost_values_deduplicate_in_order() {
        assert_eq!(
            unique_preserving_order(&[10.0, 0.0, 10.0, 5.0, 0.0]),
            vec![10.0, 0.0, 5.0]
        );
    }

    #[test]
    fn proxy_skips_symbols_missing_on_a_date() {
        let data = BTreeMap::from([
            ("AAA".to_string(), table(&[0, 1, 2], &[100.0, 110.0, 121.0])),
            ("BBB".to_string(), table(&[1, 2], &[50.0, 45.0])),
        ]);
        let proxy = regime_proxy_returns(&data, &[day(0), day(1), day(2), day(3)]);
        assert_eq!(proxy[0], 0.0);
        assert!((proxy[1] - 0.05).abs() < 1e-12);
        assert!((proxy[2] - 0.0).abs() < 1e-12);
        assert_eq!(proxy[3], 0.0);
    }

    #[test]
    fn regimes_split_at_median_and_skip_warmup() {
        let proxy = [0.0, 0.01, -0.01, 0.02, -0.02, 0.03, -0.03];
        let masks = regime_masks(&proxy, 3, 2);
        let (regime, high) = &masks[0];
        let (_, low) = &masks[1];
        assert_eq!(*regime, Regime::HighVolatility);
        assert_eq!(high.len() + low.len(), 5);
        assert!(high.iter().chain(low.iter()).all(|idx| *idx >= 2));

        let (_, trend) = &masks[2];
        let (_, non_trend) = &masks[3];
        assert_eq!(trend.len() + non_trend.len(), 6);
        assert!(!trend.contains(&0) && !non_trend.contains(&0));
    }

    #[test]
    fn trend_uses_magnitude_of_rolling_mean() {
        let proxy = [0.02, -0.02, 0.02, -0.02, 0.01, 0.01, 0.01, 0.01];
        let masks = regime_masks(&proxy, 2, 2);
        let (regime, trend) = &masks[2];
        let (_, non_trend) = &masks[3];
        assert_eq!(*regime, Regime::Trend);
        assert_eq!(trend, &vec![4, 5, 6, 7]);
        assert_eq!(non_trend, &vec![1, 2, 3]);
    }

    #[test]
    fn regime_metrics_compound_from_one() {
        let baseline = BacktestResult {
            dates: (0..3).map(day).collect(),
            daily_returns: vec![0.0, 0.1, -0.5],
            equity_curve: vec![1.0, 1.1, 0.55],
            positions: PositionMatrix {
                dates: (0..3).map(day).collect(),
                symbols: vec!["AAA".to_string()],
                rows: vec![vec![1.0], vec![1.0], vec![1.0]],
            },
            turnover: vec![1.0, 0.0, 0.0],
            metrics: PerformanceMetrics::default(),
            exposure_stats: ExposureStats::default(),
            turnover_stats: TurnoverStats::default(),
        };
        let metrics = metrics_for_rows(&baseline, &[2], 252);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.percentage_positive_days, 0.0);
        assert!((metrics.annualized_return - (0.5_f64.powf(252.0) - 1.0)).abs() < 1e-12);
        assert_eq!(metrics_for_rows(&baseline, &[], 252), PerformanceMetrics::default());
    }
}
