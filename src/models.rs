use crate::errors::{ResearchError, ResearchResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

pub type StrategyParams = HashMap<String, f64>;

pub const CLOSE_COLUMN: &str = "close";

/// Column-oriented price history for a single symbol, one row per date.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    dates: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl PriceTable {
    pub fn new(
        dates: Vec<DateTime<Utc>>,
        columns: BTreeMap<String, Vec<f64>>,
    ) -> ResearchResult<Self> {
        for (name, values) in &columns {
            if values.len() != dates.len() {
                return Err(ResearchError::data(format!(
                    "Column '{}' has {} values but the table has {} dates",
                    name,
                    values.len(),
                    dates.len()
                )));
            }
        }
        Ok(Self { dates, columns })
    }

    pub fn dates(&self) -> &[DateTime<Utc>] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|values| values.as_slice())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|name| name.as_str())
    }

    pub fn first_date(&self) -> Option<DateTime<Utc>> {
        self.dates.first().copied()
    }

    /// Returns a copy with rows stably sorted by date.
    pub fn sorted_by_date(&self) -> Self {
        let mut order: Vec<usize> = (0..self.dates.len()).collect();
        order.sort_by_key(|&idx| self.dates[idx]);
        self.take_rows(&order)
    }

    pub fn is_strictly_sorted(&self) -> bool {
        self.dates.windows(2).all(|pair| pair[0] < pair[1])
    }

    /// First date that appears more than once; expects a date-sorted table.
    pub fn first_duplicate_date(&self) -> Option<DateTime<Utc>> {
        self.dates
            .windows(2)
            .find(|pair| pair[0] == pair[1])
            .map(|pair| pair[0])
    }

    /// Keeps the rows whose date is in `index`, in `index` order.
    pub fn select_dates(&self, index: &[DateTime<Utc>]) -> Self {
        let positions: HashMap<DateTime<Utc>, usize> = self
            .dates
            .iter()
            .enumerate()
            .map(|(idx, date)| (*date, idx))
            .collect();
        let rows: Vec<usize> = index
            .iter()
            .filter_map(|date| positions.get(date).copied())
            .collect();
        self.take_rows(&rows)
    }

    /// Keeps rows with `start <= date <= end`.
    pub fn filter_range(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        let rows: Vec<usize> = self
            .dates
            .iter()
            .enumerate()
            .filter(|(_, date)| start.map_or(true, |s| **date >= s))
            .filter(|(_, date)| end.map_or(true, |e| **date <= e))
            .map(|(idx, _)| idx)
            .collect();
        self.take_rows(&rows)
    }

    fn take_rows(&self, rows: &[usize]) -> Self {
        Self {
            dates: rows.iter().map(|&idx| self.dates[idx]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| (name.clone(), rows.iter().map(|&idx| values[idx]).collect()))
                .collect(),
        }
    }
}

/// Real-valued series keyed by date.
#[derive(Debug, Clone, PartialEq)]
pub struct DatedSeries {
    dates: Vec<DateTime<Utc>>,
    values: Vec<f64>,
}

impl DatedSeries {
    pub fn new(dates: Vec<DateTime<Utc>>, values: Vec<f64>) -> ResearchResult<Self> {
        if dates.len() != values.len() {
            return Err(ResearchError::strategy(format!(
                "Signal has {} values for {} dates",
                values.len(),
                dates.len()
            )));
        }
        Ok(Self { dates, values })
    }

    /// Builds a series on a table's own index.
    pub fn aligned_to(table: &PriceTable, values: Vec<f64>) -> ResearchResult<Self> {
        Self::new(table.dates().to_vec(), values)
    }

    pub fn dates(&self) -> &[DateTime<Utc>] {
        &self.dates
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Per-date, per-symbol positions on a shared, strictly increasing index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionMatrix {
    pub dates: Vec<DateTime<Utc>>,
    pub symbols: Vec<String>,
    /// Row-major: `rows[t][s]` is the position in `symbols[s]` on `dates[t]`.
    pub rows: Vec<Vec<f64>>,
}

impl PositionMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn gross_exposure(&self) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|value| value.abs()).sum())
            .collect()
    }

    pub fn net_exposure(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.iter().sum()).collect()
    }

    pub fn column(&self, symbol: &str) -> Option<Vec<f64>> {
        let idx = self.symbols.iter().position(|s| s == symbol)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }
}

pub const METRIC_KEYS: [&str; 8] = [
    "annualized_return",
    "annualized_volatility",
    "sharpe_ratio",
    "max_drawdown",
    "calmar_ratio",
    "average_daily_turnover",
    "average_gross_exposure",
    "percentage_positive_days",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub calmar_ratio: f64,
    pub average_daily_turnover: f64,
    pub average_gross_exposure: f64,
    pub percentage_positive_days: f64,
}

impl PerformanceMetrics {
    /// Values in `METRIC_KEYS` order.
    pub fn entries(&self) -> [(&'static str, f64); 8] {
        [
            (METRIC_KEYS[0], self.annualized_return),
            (METRIC_KEYS[1], self.annualized_volatility),
            (METRIC_KEYS[2], self.sharpe_ratio),
            (METRIC_KEYS[3], self.max_drawdown),
            (METRIC_KEYS[4], self.calmar_ratio),
            (METRIC_KEYS[5], self.average_daily_turnover),
            (METRIC_KEYS[6], self.average_gross_exposure),
            (METRIC_KEYS[7], self.percentage_positive_days),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExposureStats {
    pub average_gross_exposure: f64,
    pub max_gross_exposure: f64,
    pub average_net_exposure: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnoverStats {
    pub average_daily_turnover: f64,
    pub max_daily_turnover: f64,
}

/// Output of a single engine run. Every series shares `dates`.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub dates: Vec<DateTime<Utc>>,
    pub daily_returns: Vec<f64>,
    pub equity_curve: Vec<f64>,
    /// Leverage-capped positions before the execution lag.
    pub positions: PositionMatrix,
    pub turnover: Vec<f64>,
    pub metrics: PerformanceMetrics,
    pub exposure_stats: ExposureStats,
    pub turnover_stats: TurnoverStats,
}

impl BacktestResult {
    pub fn gross_exposure(&self) -> Vec<f64> {
        self.positions.gross_exposure()
    }

    pub fn final_equity(&self) -> f64 {
        self.equity_curve.last().copied().unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardRow {
    pub split: usize,
    pub start: String,
    pub end: String,
    pub observation_count: usize,
    #[serde(flatten)]
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterGridRow {
    pub parameter_set: String,
    #[serde(flatten)]
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostStressRow {
    pub cost_bps: f64,
    #[serde(flatten)]
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    HighVolatility,
    LowVolatility,
    Trend,
    NonTrend,
}

impl Regime {
    pub const ALL: [Regime; 4] = [
        Regime::HighVolatility,
        Regime::LowVolatility,
        Regime::Trend,
        Regime::NonTrend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::HighVolatility => "high_volatility",
            Regime::LowVolatility => "low_volatility",
            Regime::Trend => "trend",
            Regime::NonTrend => "non_trend",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeRow {
    pub regime: Regime,
    pub observation_count: usize,
    #[serde(flatten)]
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub baseline_sharpe_ratio: f64,
    pub walk_forward_average_sharpe_ratio: f64,
    pub parameter_grid_average_sharpe_ratio: f64,
    pub cost_stress_average_sharpe_ratio: f64,
    pub regime_average_sharpe_ratio: f64,
}

impl AggregatedMetrics {
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("baseline_sharpe_ratio", self.baseline_sharpe_ratio),
            (
                "walk_forward_average_sharpe_ratio",
                self.walk_forward_average_sharpe_ratio,
            ),
            (
                "parameter_grid_average_sharpe_ratio",
                self.parameter_grid_average_sharpe_ratio,
            ),
            (
                "cost_stress_average_sharpe_ratio",
                self.cost_stress_average_sharpe_ratio,
            ),
            ("regime_average_sharpe_ratio", self.regime_average_sharpe_ratio),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RobustnessResult {
    pub experiment_id: String,
    pub baseline_metrics: PerformanceMetrics,
    pub aggregated_metrics: AggregatedMetrics,
    pub walk_forward_results: Vec<WalkForwardRow>,
    pub parameter_grid_results: Vec<ParameterGridRow>,
    pub cost_stress_results: Vec<CostStressRow>,
    pub regime_results: Vec<RegimeRow>,
    pub report_path: PathBuf,
    pub summary_json_path: PathBuf,
    pub artifact_paths: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap() + Duration::days(offset)
    }

    fn table(dates: Vec<DateTime<Utc>>, closes: Vec<f64>) -> PriceTable {
        let mut columns = BTreeMap::new();
        columns.insert("close".to_string(), closes);
        PriceTable::new(dates, columns).unwrap()
    }

    #[test]
    fn rejects_columns_with_mismatched_length() {
        let mut columns = BTreeMap::new();
        columns.insert("close".to_string(), vec![1.0, 2.0]);
        let err = PriceTable::new(vec![day(0)], columns).unwrap_err();
        assert!(err.to_string().contains("close"));
    }

    #[test]
    fn sorts_and_detects_duplicate_dates() {
        let t = table(vec![day(2), day(0), day(2)], vec![3.0, 1.0, 4.0]);
        let sorted = t.sorted_by_date();
        assert_eq!(sorted.column("close").unwrap(), &[1.0, 3.0, 4.0]);
        assert!(!sorted.is_strictly_sorted());
        assert_eq!(sorted.first_duplicate_date(), Some(day(2)));
    }

    #[test]
    fn select_dates_keeps_index_order_and_skips_missing() {
        let t = table(vec![day(0), day(1), day(2)], vec![1.0, 2.0, 3.0]);
        let subset = t.select_dates(&[day(1), day(2), day(5)]);
        assert_eq!(subset.dates(), &[day(1), day(2)]);
        assert_eq!(subset.column("close").unwrap(), &[2.0, 3.0]);
    }

    #[test]
    fn signal_length_mismatch_is_strategy_error() {
        let err = DatedSeries::new(vec![day(0), day(1)], vec![1.0]).unwrap_err();
        assert!(matches!(err, ResearchError::Strategy(_)));
    }

    #[test]
    fn metrics_serialize_flat_inside_rows() {
        let row = CostStressRow {
            cost_bps: 5.0,
            metrics: PerformanceMetrics::default(),
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["cost_bps"], 5.0);
        assert_eq!(value["sharpe_ratio"], 0.0);
        assert!(value.get("metrics").is_none());
    }

    #[test]
    fn regime_serializes_snake_case() {
        let value = serde_json::to_value(Regime::NonTrend).unwrap();
        assert_eq!(value, "non_trend");
        assert_eq!(Regime::HighVolatility.as_str(), "high_volatility");
    }
}
