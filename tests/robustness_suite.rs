use alphalab::engine::{run_backtest, BacktestConfig};
use alphalab::errors::ResearchError;
use alphalab::models::{PriceTable, Regime, StrategyParams};
use alphalab::robustness::{run_robustness_suite, RobustnessSettings};
use alphalab::status::SuiteStatus;
use alphalab::strategy::create_strategy;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

fn ensure_test_env() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn create_date(days_offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap() + Duration::days(days_offset)
}

fn price_table(start_offset: i64, closes: Vec<f64>) -> PriceTable {
    let dates = (0..closes.len() as i64)
        .map(|i| create_date(start_offset + i))
        .collect();
    let mut columns = BTreeMap::new();
    columns.insert("close".to_string(), closes);
    PriceTable::new(dates, columns).unwrap()
}

fn wavy_closes(len: usize, phase: f64) -> Vec<f64> {
    (0..len)
        .map(|t| {
            let t = t as f64;
            100.0 * (1.0 + 0.04 * (t * 0.5 + phase).sin() + 0.001 * t)
        })
        .collect()
}

fn universe(len: usize) -> BTreeMap<String, PriceTable> {
    BTreeMap::from([
        ("AAA".to_string(), price_table(0, wavy_closes(len, 0.0))),
        ("BBB".to_string(), price_table(0, wavy_closes(len, 2.0))),
    ])
}

fn small_settings() -> RobustnessSettings {
    RobustnessSettings {
        walk_forward_splits: 3,
        parameter_grid: BTreeMap::from([("lookback".to_string(), vec![2.0, 5.0])]),
        cost_stress_bps: vec![0.0, 10.0, 0.0, 5.0],
        volatility_window: 5,
        trend_window: 4,
    }
}

fn trend_params() -> StrategyParams {
    StrategyParams::from([("lookback".to_string(), 3.0)])
}

#[test]
fn walk_forward_rows_cover_the_common_index() {
    ensure_test_env();
    let tmp = TempDir::new().unwrap();
    let data = universe(12);
    let strategy = create_strategy("trend_following").unwrap();

    let result = run_robustness_suite(
        "exp_walk_forward",
        &data,
        strategy.as_ref(),
        &trend_params(),
        &BacktestConfig::default(),
        &small_settings(),
        tmp.path(),
        false,
        &SuiteStatus::new(),
    )
    .unwrap();

    let rows = &result.walk_forward_results;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows.iter().map(|r| r.observation_count).sum::<usize>(), 12);
    assert_eq!(rows.iter().map(|r| r.split).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(rows[0].start, "2021-06-01");
    assert_eq!(rows[0].end, "2021-06-04");
    assert_eq!(rows[2].end, "2021-06-12");
}

#[test]
fn disjoint_calendars_are_robustness_errors() {
    let tmp = TempDir::new().unwrap();
    let data = BTreeMap::from([
        ("AAA".to_string(), price_table(0, wavy_closes(10, 0.0))),
        ("BBB".to_string(), price_table(100, wavy_closes(10, 1.0))),
    ]);
    let strategy = create_strategy("buy_and_hold").unwrap();

    let err = run_robustness_suite(
        "exp_disjoint",
        &data,
        strategy.as_ref(),
        &StrategyParams::new(),
        &BacktestConfig::default(),
        &small_settings(),
        tmp.path(),
        false,
        &SuiteStatus::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ResearchError::Robustness(_)));
}

#[test]
fn collections_follow_canonical_order() {
    ensure_test_env();
    let tmp = TempDir::new().unwrap();
    let data = universe(60);
    let strategy = create_strategy("trend_following").unwrap();
    let config = BacktestConfig::default();

    let result = run_robustness_suite(
        "exp_order",
        &data,
        strategy.as_ref(),
        &trend_params(),
        &config,
        &small_settings(),
        tmp.path(),
        false,
        &SuiteStatus::new(),
    )
    .unwrap();

    let labels: Vec<&str> = result
        .parameter_grid_results
        .iter()
        .map(|r| r.parameter_set.as_str())
        .collect();
    assert_eq!(labels, vec!["lookback=2", "lookback=5"]);

    let costs: Vec<f64> = result.cost_stress_results.iter().map(|r| r.cost_bps).collect();
    assert_eq!(costs, vec![0.0, 10.0, 5.0]);
    let free = &result.cost_stress_results[0].metrics;
    let expensive = &result.cost_stress_results[1].metrics;
    assert!(expensive.annualized_return <= free.annualized_return);

    let regimes: Vec<Regime> = result.regime_results.iter().map(|r| r.regime).collect();
    assert_eq!(regimes, Regime::ALL.to_vec());
    let volatility_rows = result.regime_results[0].observation_count
        + result.regime_results[1].observation_count;
    assert_eq!(volatility_rows, 60 - 4);
    let trend_rows = result.regime_results[2].observation_count
        + result.regime_results[3].observation_count;
    assert_eq!(trend_rows, 60 - 3);

    let baseline = run_backtest(&data, strategy.as_ref(), &trend_params(), &config).unwrap();
    assert_eq!(result.baseline_metrics, baseline.metrics);
    assert_eq!(result.aggregated_metrics.baseline_sharpe_ratio, baseline.metrics.sharpe_ratio);

    let walk_forward_mean = result
        .walk_forward_results
        .iter()
        .map(|r| r.metrics.sharpe_ratio)
        .sum::<f64>()
        / result.walk_forward_results.len() as f64;
    assert!(
        (result.aggregated_metrics.walk_forward_average_sharpe_ratio - walk_forward_mean).abs()
            < 1e-12
    );
}

#[test]
fn empty_grid_runs_a_single_baseline_row() {
    let tmp = TempDir::new().unwrap();
    let data = universe(30);
    let strategy = create_strategy("trend_following").unwrap();
    let settings = RobustnessSettings {
        parameter_grid: BTreeMap::new(),
        ..small_settings()
    };

    let result = run_robustness_suite(
        "exp_baseline_grid",
        &data,
        strategy.as_ref(),
        &trend_params(),
        &BacktestConfig::default(),
        &settings,
        tmp.path(),
        false,
        &SuiteStatus::new(),
    )
    .unwrap();

    assert_eq!(result.parameter_grid_results.len(), 1);
    assert_eq!(result.parameter_grid_results[0].parameter_set, "baseline");
    assert_eq!(result.parameter_grid_results[0].metrics, result.baseline_metrics);
}

#[test]
fn artifacts_are_written_under_output_dir() {
    ensure_test_env();
    let tmp = TempDir::new().unwrap();
    let output_dir = tmp.path().join("exp_artifacts");
    let data = universe(40);
    let strategy = create_strategy("trend_following").unwrap();
    let status = SuiteStatus::new();

    let result = run_robustness_suite(
        "exp_artifacts",
        &data,
        strategy.as_ref(),
        &trend_params(),
        &BacktestConfig::default(),
        &small_settings(),
        &output_dir,
        true,
        &status,
    )
    .unwrap();

    assert_eq!(result.artifact_paths.len(), 5);
    for path in &result.artifact_paths {
        assert!(path.starts_with(&output_dir));
        let svg = fs::read_to_string(path).unwrap();
        assert!(svg.starts_with("<svg"));
    }
    assert_eq!(result.report_path, output_dir.join("robustness_report.md"));

    let report = fs::read_to_string(&result.report_path).unwrap();
    assert!(report.starts_with("# Robustness Report: exp_artifacts"));
    assert!(report.contains("## Walk-Forward Splits"));
    assert!(report.contains("| lookback=2 |"));

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&result.summary_json_path).unwrap()).unwrap();
    assert_eq!(summary["experiment_id"], "exp_artifacts");
    assert_eq!(summary["walk_forward_results"].as_array().unwrap().len(), 3);
    assert_eq!(summary["cost_stress_results"][1]["cost_bps"], 10.0);
    assert!(summary["parameter_grid_results"][0]["sharpe_ratio"].is_number());
    assert_eq!(summary["artifact_paths"].as_array().unwrap().len(), 5);
    assert_eq!(
        summary["report_path"],
        result.report_path.display().to_string()
    );

    let snapshot = status.snapshot();
    assert_eq!(snapshot.total_runs, 1 + 3 + 2 + 3);
    assert_eq!(snapshot.completed_runs, snapshot.total_runs);
}

#[test]
fn plots_can_be_skipped() {
    let tmp = TempDir::new().unwrap();
    let data = universe(20);
    let strategy = create_strategy("buy_and_hold").unwrap();

    let result = run_robustness_suite(
        "exp_no_plots",
        &data,
        strategy.as_ref(),
        &StrategyParams::new(),
        &BacktestConfig::default(),
        &small_settings(),
        tmp.path(),
        false,
        &SuiteStatus::new(),
    )
    .unwrap();

    assert!(result.artifact_paths.is_empty());
    assert!(result.report_path.exists());
    assert!(result.summary_json_path.exists());
    let svg_count = fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().map_or(false, |ext| ext == "svg"))
        .count();
    assert_eq!(svg_count, 0);
}

#[test]
fn repeated_runs_produce_identical_rows() {
    let data = universe(48);
    let strategy = create_strategy("trend_following").unwrap();
    let run = |dir: &std::path::Path| {
        run_robustness_suite(
            "exp_repeat",
            &data,
            strategy.as_ref(),
            &trend_params(),
            &BacktestConfig::default(),
            &small_settings(),
            dir,
            false,
            &SuiteStatus::new(),
        )
        .unwrap()
    };
    let first_dir = TempDir::new().unwrap();
    let second_dir = TempDir::new().unwrap();
    let first = run(first_dir.path());
    let second = run(second_dir.path());

    assert_eq!(first.walk_forward_results, second.walk_forward_results);
    assert_eq!(first.parameter_grid_results, second.parameter_grid_results);
    assert_eq!(first.cost_stress_results, second.cost_stress_results);
    assert_eq!(first.regime_results, second.regime_results);
}

#[test]
fn windows_longer_than_history_leave_regimes_empty() {
    let tmp = TempDir::new().unwrap();
    let data = universe(15);
    let strategy = create_strategy("buy_and_hold").unwrap();
    let settings = RobustnessSettings {
        volatility_window: 30,
        trend_window: 30,
        ..small_settings()
    };
    let status = SuiteStatus::new();

    let result = run_robustness_suite(
        "exp_short_history",
        &data,
        strategy.as_ref(),
        &StrategyParams::new(),
        &BacktestConfig::default(),
        &settings,
        tmp.path(),
        false,
        &status,
    )
    .unwrap();

    assert_eq!(result.regime_results.len(), 4);
    for row in &result.regime_results {
        assert_eq!(row.observation_count, 0);
        assert_eq!(row.metrics, Default::default());
    }
    assert_eq!(result.aggregated_metrics.regime_average_sharpe_ratio, 0.0);
    let note = status.snapshot().debug_notes.unwrap();
    assert!(note.contains("high_volatility"));
    assert!(note.contains("non_trend"));
}
