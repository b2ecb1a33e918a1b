use crate::errors::{ResearchError, ResearchResult};
use crate::indicators::calculate_period_change;
use crate::models::*;
use crate::param_utils::get_param;

const DEFAULT_LOOKBACK: f64 = 20.0;

/// Long when the `lookback`-period return is positive, short when negative.
pub struct TrendFollowingStrategy;

impl TrendFollowingStrategy {
    fn lookback(params: &StrategyParams) -> ResearchResult<usize> {
        let raw = get_param(params, "lookback", DEFAULT_LOOKBACK);
        if !raw.is_finite() || raw < 1.0 {
            return Err(ResearchError::strategy(format!(
                "lookback must be >= 1 (value: {})",
                raw
            )));
        }
        Ok(raw.trunc() as usize)
    }
}

impl super::Strategy for TrendFollowingStrategy {
    fn name(&self) -> &str {
        "trend_following"
    }

    fn required_columns(&self) -> Vec<String> {
        vec![CLOSE_COLUMN.to_string()]
    }

    fn generate_positions(
        &self,
        prices: &PriceTable,
        params: &StrategyParams,
    ) -> ResearchResult<DatedSeries> {
        let lookback = Self::lookback(params)?;
        let closes = super::close_prices(self.name(), prices)?;
        let positions = calculate_period_change(closes, lookback)
            .into_iter()
            .map(|momentum| match momentum {
                Some(value) if value > 0.0 => 1.0,
                Some(value) if value < 0.0 => -1.0,
                _ => 0.0,
            })
            .collect();
        DatedSeries::aligned_to(prices, positions)
    }
}
