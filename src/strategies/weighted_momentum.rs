use crate::errors::ResearchResult;
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_usize_at_least};

/// Blend of two smoothed rate-of-change oscillators, scaled into `[-1, 1]`.
pub struct WeightedMomentumStrategy;

struct WeightedMomentumParams {
    roc_period1: usize,
    sma_period1: usize,
    roc_period2: usize,
    sma_period2: usize,
    weight1: f64,
    weight2: f64,
    min_confidence: f64,
}

impl WeightedMomentumParams {
    fn from_params(parameters: &StrategyParams) -> Self {
        Self {
            roc_period1: get_param_usize_at_least(parameters, "rocPeriod1", 21, 1),
            sma_period1: get_param_usize_at_least(parameters, "smaPeriod1", 21, 1),
            roc_period2: get_param_usize_at_least(parameters, "rocPeriod2", 63, 1),
            sma_period2: get_param_usize_at_least(parameters, "smaPeriod2", 21, 1),
            weight1: get_param_f64(parameters, "weight1", 1.0),
            weight2: get_param_f64(parameters, "weight2", 1.0),
            min_confidence: get_param_f64(parameters, "minConfidence", 0.5),
        }
    }

    fn min_data_points(&self) -> usize {
        let first = self.roc_period1.saturating_add(self.sma_period1);
        let second = self.roc_period2.saturating_add(self.sma_period2);
        50usize.max(first.max(second))
    }
}

impl WeightedMomentumStrategy {
    /// Percent rate of change aligned to `values`; `None` during warmup.
    fn calculate_roc(values: &[f64], period: usize) -> Vec<Option<f64>> {
        (0..values.len())
            .map(|idx| {
                if idx < period {
                    return None;
                }
                let previous = values[idx - period];
                if previous.abs() < f64::EPSILON {
                    Some(0.0)
                } else {
                    Some((values[idx] - previous) / previous * 100.0)
                }
            })
            .collect()
    }

    /// Trailing mean over `period` defined entries.
    fn smooth(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
        (0..values.len())
            .map(|end| {
                if end + 1 < period {
                    return None;
                }
                let window = &values[end + 1 - period..=end];
                let sum = window.iter().copied().sum::<Option<f64>>()?;
                Some(sum / period as f64)
            })
            .collect()
    }
}

impl super::Strategy for WeightedMomentumStrategy {
    fn name(&self) -> &str {
        "weighted_momentum"
    }

    fn required_columns(&self) -> Vec<String> {
        vec![CLOSE_COLUMN.to_string()]
    }

    fn generate_positions(
        &self,
        prices: &PriceTable,
        params: &StrategyParams,
    ) -> ResearchResult<DatedSeries> {
        let settings = WeightedMomentumParams::from_params(params);
        let closes = super::close_prices(self.name(), prices)?;
        let smoothed1 = Self::smooth(
            &Self::calculate_roc(closes, settings.roc_period1),
            settings.sma_period1,
        );
        let smoothed2 = Self::smooth(
            &Self::calculate_roc(closes, settings.roc_period2),
            settings.sma_period2,
        );
        let min_points = settings.min_data_points();

        let positions = (0..closes.len())
            .map(|idx| {
                if idx + 1 < min_points {
                    return 0.0;
                }
                let (Some(first), Some(second)) = (smoothed1[idx], smoothed2[idx]) else {
                    return 0.0;
                };
                let osc = first * settings.weight1 + second * settings.weight2;
                let confidence = (osc.abs() / 10.0).min(1.0);
                if !confidence.is_finite() || confidence < settings.min_confidence {
                    0.0
                } else {
                    confidence * osc.signum()
                }
            })
            .collect();
        DatedSeries::aligned_to(prices, positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::Strategy;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn prices(closes: Vec<f64>) -> PriceTable {
        let base = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let dates = (0..closes.len() as i64).map(|i| base + Duration::days(i)).collect();
        let mut columns = BTreeMap::new();
        columns.insert("close".to_string(), closes);
        PriceTable::new(dates, columns).unwrap()
    }

    #[test]
    fn stays_flat_during_warmup_then_follows_trend() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let table = prices(closes);
        let params = StrategyParams::from([
            ("rocPeriod1".to_string(), 5.0),
            ("smaPeriod1".to_string(), 5.0),
            ("rocPeriod2".to_string(), 10.0),
            ("smaPeriod2".to_string(), 5.0),
        ]);
        let signal = WeightedMomentumStrategy
            .generate_positions(&table, &params)
            .unwrap();
        assert!(signal.values()[..49].iter().all(|v| *v == 0.0));
        assert!(signal.values()[49..].iter().all(|v| *v > 0.0 && *v <= 1.0));
    }

    #[test]
    fn oversized_periods_stay_flat() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let table = prices(closes);
        let params = StrategyParams::from([
            ("rocPeriod1".to_string(), 1e30),
            ("smaPeriod1".to_string(), 5.0),
            ("smaPeriod2".to_string(), f64::MAX),
        ]);
        let signal = WeightedMomentumStrategy
            .generate_positions(&table, &params)
            .unwrap();
        assert_eq!(signal.len(), 60);
        assert!(signal.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn falling_prices_go_short() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 * 0.98_f64.powi(i)).collect();
        let table = prices(closes);
        let params = StrategyParams::from([
            ("rocPeriod1".to_string(), 5.0),
            ("smaPeriod1".to_string(), 3.0),
            ("rocPeriod2".to_string(), 5.0),
            ("smaPeriod2".to_string(), 3.0),
        ]);
        let signal = WeightedMomentumStrategy
            .generate_positions(&table, &params)
            .unwrap();
        assert_eq!(signal.values()[59], -1.0);
    }
}
