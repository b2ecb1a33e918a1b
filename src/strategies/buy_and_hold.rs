use crate::errors::ResearchResult;
use crate::models::*;
use crate::param_utils::get_param;

pub struct BuyAndHoldStrategy;

impl super::Strategy for BuyAndHoldStrategy {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn required_columns(&self) -> Vec<String> {
        vec![CLOSE_COLUMN.to_string()]
    }

    fn generate_positions(
        &self,
        prices: &PriceTable,
        params: &StrategyParams,
    ) -> ResearchResult<DatedSeries> {
        // Held from the first row regardless of price history.
        let weight = get_param(params, "weight", 1.0);
        DatedSeries::aligned_to(prices, vec![weight; prices.len()])
    }
}
