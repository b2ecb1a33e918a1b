use crate::errors::{ResearchError, ResearchResult};
use crate::models::*;
use log::debug;

/// Turns a dated price table and a parameter set into a target-position signal.
///
/// Positions are the desired signed fraction of capital per date. They are not
/// required to be bounded; the engine clips them.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;
    /// Columns the price table must carry. Never empty for a registered strategy.
    fn required_columns(&self) -> Vec<String>;
    fn generate_positions(
        &self,
        prices: &PriceTable,
        params: &StrategyParams,
    ) -> ResearchResult<DatedSeries>;
}

#[path = "strategies/trend_following.rs"]
pub mod trend_following;

pub use trend_following::TrendFollowingStrategy;

#[path = "strategies/buy_and_hold.rs"]
pub mod buy_and_hold;

pub use buy_and_hold::BuyAndHoldStrategy;

#[path = "strategies/weighted_momentum.rs"]
pub mod weighted_momentum;

pub use weighted_momentum::WeightedMomentumStrategy;

pub const AVAILABLE_STRATEGIES: [&str; 3] = ["trend_following", "buy_and_hold", "weighted_momentum"];

/// Looks up a strategy by registry name and validates its contract once.
pub fn create_strategy(name: &str) -> ResearchResult<Box<dyn Strategy>> {
    let strategy: Box<dyn Strategy> = match name.trim() {
        "trend_following" => Box::new(TrendFollowingStrategy),
        "buy_and_hold" => Box::new(BuyAndHoldStrategy),
        "weighted_momentum" => Box::new(WeightedMomentumStrategy),
        other => {
            return Err(ResearchError::strategy(format!(
                "Unknown strategy '{}' (available: {})",
                other,
                AVAILABLE_STRATEGIES.join(", ")
            )))
        }
    };
    validate_strategy(strategy.as_ref())?;
    debug!("Loaded strategy {}", strategy.name());
    Ok(strategy)
}

/// Checks the static part of the contract: a name and a non-empty column list.
pub fn validate_strategy(strategy: &dyn Strategy) -> ResearchResult<()> {
    if strategy.name().trim().is_empty() {
        return Err(ResearchError::strategy("Strategy name must be non-empty"));
    }
    let required = strategy.required_columns();
    if required.is_empty() {
        return Err(ResearchError::strategy(format!(
            "Strategy '{}' returned empty required_columns()",
            strategy.name()
        )));
    }
    if let Some(blank) = required.iter().position(|column| column.trim().is_empty()) {
        return Err(ResearchError::strategy(format!(
            "Strategy '{}' returned a blank column name at position {}",
            strategy.name(),
            blank
        )));
    }
    Ok(())
}

/// Reads the close column or fails with a strategy error naming it.
pub(crate) fn close_prices<'a>(strategy: &str, prices: &'a PriceTable) -> ResearchResult<&'a [f64]> {
    prices.column(CLOSE_COLUMN).ok_or_else(|| {
        ResearchError::strategy(format!(
            "Strategy '{}' requires a '{}' column",
            strategy, CLOSE_COLUMN
        ))
    })
}
