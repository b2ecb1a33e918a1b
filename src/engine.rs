use crate::errors::{ResearchError, ResearchResult};
use crate::indicators::{calculate_equity_curve, calculate_pct_change, max, mean, reindex_zero_fill, union_index};
use crate::models::*;
use crate::performance::{PerformanceCalculator, DEFAULT_ANNUALIZATION_FACTOR};
use crate::strategy::Strategy;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::{BTreeMap, HashSet};

const BPS_PER_UNIT: f64 = 10_000.0;

/// Engine knobs shared by every run of a backtest or robustness slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacktestConfig {
    pub transaction_cost_bps: f64,
    pub leverage_cap: f64,
    pub max_position: f64,
    pub annualization_factor: u32,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            transaction_cost_bps: 5.0,
            leverage_cap: 1.0,
            max_position: 1.0,
            annualization_factor: DEFAULT_ANNUALIZATION_FACTOR,
        }
    }
}

impl BacktestConfig {
    pub fn with_cost(&self, transaction_cost_bps: f64) -> Self {
        Self {
            transaction_cost_bps,
            ..*self
        }
    }

    pub fn validate(&self) -> ResearchResult<()> {
        if !(self.leverage_cap.is_finite() && self.leverage_cap > 0.0) {
            return Err(ResearchError::backtest(format!(
                "leverage_cap must be > 0 (value: {})",
                self.leverage_cap
            )));
        }
        if !(self.max_position.is_finite() && self.max_position > 0.0) {
            return Err(ResearchError::backtest(format!(
                "max_position must be > 0 (value: {})",
                self.max_position
            )));
        }
        if !(self.transaction_cost_bps.is_finite() && self.transaction_cost_bps >= 0.0) {
            return Err(ResearchError::backtest(format!(
                "transaction_cost_bps must be >= 0 (value: {})",
                self.transaction_cost_bps
            )));
        }
        if self.annualization_factor == 0 {
            return Err(ResearchError::backtest(
                "annualization_factor must be > 0 (value: 0)",
            ));
        }
        Ok(())
    }
}

/// Signal and returns for one symbol, both on the symbol's own sorted index.
struct SymbolSeries {
    dates: Vec<DateTime<Utc>>,
    positions: Vec<f64>,
    returns: Vec<f64>,
}

/// Vectorized daily backtester: strategy signals in, net returns and metrics out.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> ResearchResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn backtest(
        &self,
        data: &BTreeMap<String, PriceTable>,
        strategy: &dyn Strategy,
        params: &StrategyParams,
    ) -> ResearchResult<BacktestResult> {
        if data.is_empty() {
            return Err(ResearchError::backtest(
                "price_tables_by_symbol must contain at least one symbol",
            ));
        }

        let mut symbols = Vec::with_capacity(data.len());
        let mut per_symbol = Vec::with_capacity(data.len());
        for (symbol, table) in data {
            per_symbol.push(self.process_symbol(symbol, table, strategy, params)?);
            symbols.push(symbol.clone());
        }

        let dates = union_index(per_symbol.iter().map(|series| series.dates.as_slice()));
        let position_columns: Vec<Vec<f64>> = per_symbol
            .iter()
            .map(|series| reindex_zero_fill(&series.dates, &series.positions, &dates))
            .collect();
        let return_columns: Vec<Vec<f64>> = per_symbol
            .iter()
            .map(|series| reindex_zero_fill(&series.dates, &series.returns, &dates))
            .collect();

        let capped_rows: Vec<Vec<f64>> = (0..dates.len())
            .map(|t| {
                let row: Vec<f64> = position_columns.iter().map(|column| column[t]).collect();
                self.apply_leverage_cap(row)
            })
            .collect();

        let mut gross_returns = vec![0.0; dates.len()];
        let mut turnover = vec![0.0; dates.len()];
        for t in 0..dates.len() {
            // Positions decided at t-1 earn the return of t.
            if t > 0 {
                gross_returns[t] = capped_rows[t - 1]
                    .iter()
                    .zip(return_columns.iter())
                    .map(|(position, returns)| position * returns[t])
                    .sum();
            }
            turnover[t] = match t {
                0 => capped_rows[0].iter().map(|p| p.abs()).sum(),
                _ => capped_rows[t]
                    .iter()
                    .zip(capped_rows[t - 1].iter())
                    .map(|(current, previous)| (current - previous).abs())
                    .sum(),
            };
        }

        let cost_rate = self.config.transaction_cost_bps / BPS_PER_UNIT;
        let daily_returns: Vec<f64> = gross_returns
            .iter()
            .zip(turnover.iter())
            .map(|(gross, traded)| gross - traded * cost_rate)
            .collect();
        let equity_curve = calculate_equity_curve(&daily_returns);

        let positions = PositionMatrix {
            dates: dates.clone(),
            symbols,
            rows: capped_rows,
        };
        let gross_exposure = positions.gross_exposure();
        let net_exposure = positions.net_exposure();
        let exposure_stats = ExposureStats {
            average_gross_exposure: mean(&gross_exposure),
            max_gross_exposure: max(&gross_exposure),
            average_net_exposure: mean(&net_exposure),
        };
        let turnover_stats = TurnoverStats {
            average_daily_turnover: mean(&turnover),
            max_daily_turnover: max(&turnover),
        };
        let metrics = PerformanceCalculator::calculate_metrics(
            &daily_returns,
            &equity_curve,
            &turnover,
            &gross_exposure,
            self.config.annualization_factor,
        );

        debug!(
            "Backtest of {} over {} symbols and {} dates: final equity {:.6}",
            strategy.name(),
            positions.symbols.len(),
            dates.len(),
            equity_curve.last().copied().unwrap_or(1.0)
        );

        Ok(BacktestResult {
            dates,
            daily_returns,
            equity_curve,
            positions,
            turnover,
            metrics,
            exposure_stats,
            turnover_stats,
        })
    }

    fn process_symbol(
        &self,
        symbol: &str,
        table: &PriceTable,
        strategy: &dyn Strategy,
        params: &StrategyParams,
    ) -> ResearchResult<SymbolSeries> {
        if table.is_empty() {
            return Err(ResearchError::backtest(format!(
                "Price table for {} is empty",
                symbol
            )));
        }

        let mut required = strategy.required_columns();
        if !required.iter().any(|column| column == CLOSE_COLUMN) {
            required.push(CLOSE_COLUMN.to_string());
        }
        let missing: Vec<&str> = required
            .iter()
            .map(|column| column.as_str())
            .filter(|column| !table.has_column(column))
            .collect();
        if !missing.is_empty() {
            return Err(ResearchError::backtest(format!(
                "Price table for {} is missing required columns: {}",
                symbol,
                missing.join(", ")
            )));
        }

        let table = if table.is_strictly_sorted() {
            table.clone()
        } else {
            table.sorted_by_date()
        };
        if let Some(duplicate) = table.first_duplicate_date() {
            return Err(ResearchError::backtest(format!(
                "Price table for {} has duplicate date {}",
                symbol,
                duplicate.format("%Y-%m-%d")
            )));
        }

        let signal = strategy.generate_positions(&table, params)?;
        let distinct_dates: HashSet<&DateTime<Utc>> = signal.dates().iter().collect();
        if distinct_dates.len() != signal.len() {
            return Err(ResearchError::strategy(format!(
                "Strategy '{}' returned a signal with duplicate dates for {}",
                strategy.name(),
                symbol
            )));
        }

        let max_position = self.config.max_position;
        let positions = reindex_zero_fill(signal.dates(), signal.values(), table.dates())
            .into_iter()
            .map(|value| {
                if value.is_nan() {
                    0.0
                } else {
                    value.clamp(-max_position, max_position)
                }
            })
            .collect();

        let closes = table.column(CLOSE_COLUMN).unwrap_or_default();
        let returns = calculate_pct_change(closes);

        debug!(
            "Processed {} with {} rows ({} to {})",
            symbol,
            table.len(),
            table.dates()[0].format("%Y-%m-%d"),
            table.dates()[table.len() - 1].format("%Y-%m-%d")
        );

        Ok(SymbolSeries {
            dates: table.dates().to_vec(),
            positions,
            returns,
        })
    }

    /// Scales the whole row down proportionally when gross exposure exceeds the cap.
    fn apply_leverage_cap(&self, row: Vec<f64>) -> Vec<f64> {
        let gross: f64 = row.iter().map(|value| value.abs()).sum();
        if gross > self.config.leverage_cap {
            let scaler = self.config.leverage_cap / gross;
            row.into_iter().map(|value| value * scaler).collect()
        } else {
            row
        }
    }
}

/// One-shot convenience wrapper: validates `config` and runs a single backtest.
pub fn run_backtest(
    data: &BTreeMap<String, PriceTable>,
    strategy: &dyn Strategy,
    params: &StrategyParams,
    config: &BacktestConfig,
) -> ResearchResult<BacktestResult> {
    BacktestEngine::new(*config)?.backtest(data, strategy, params)
}
