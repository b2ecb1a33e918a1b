use crate::indicators::mean;
use crate::models::PerformanceMetrics;
use statrs::statistics::Statistics;

pub const DEFAULT_ANNUALIZATION_FACTOR: u32 = 252;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Scalar statistics for a net-return series and its companions.
    ///
    /// An empty return series yields an all-zero record instead of an error,
    /// so slices with no observations aggregate like any other row.
    pub fn calculate_metrics(
        daily_returns: &[f64],
        equity_curve: &[f64],
        turnover: &[f64],
        gross_exposure: &[f64],
        annualization_factor: u32,
    ) -> PerformanceMetrics {
        let sample_size = daily_returns.len();
        if sample_size == 0 {
            return PerformanceMetrics::default();
        }

        let periods_per_year = annualization_factor as f64;
        // Equity at or below zero annualizes to a total loss.
        let final_equity = equity_curve.last().copied().unwrap_or(1.0).max(0.0);
        let annualized_return = final_equity.powf(periods_per_year / sample_size as f64) - 1.0;
        let annualized_volatility = Self::population_std_dev(daily_returns) * periods_per_year.sqrt();
        let sharpe_ratio = if annualized_volatility > 0.0 {
            annualized_return / annualized_volatility
        } else {
            0.0
        };
        let max_drawdown = Self::calculate_max_drawdown(equity_curve);
        let calmar_ratio = if max_drawdown < 0.0 {
            annualized_return / max_drawdown.abs()
        } else {
            0.0
        };
        let positive_days = daily_returns.iter().filter(|r| **r > 0.0).count();

        PerformanceMetrics {
            annualized_return,
            annualized_volatility,
            sharpe_ratio,
            max_drawdown,
            calmar_ratio,
            average_daily_turnover: mean(turnover),
            average_gross_exposure: mean(gross_exposure),
            percentage_positive_days: positive_days as f64 / sample_size as f64,
        }
    }

    /// Deepest peak-to-trough decline as a negative fraction; 0 for an empty curve.
    pub fn calculate_max_drawdown(equity_curve: &[f64]) -> f64 {
        let Some(&first) = equity_curve.first() else {
            return 0.0;
        };

        let mut running_max = first;
        let mut max_drawdown = 0.0_f64;
        for &equity in equity_curve {
            if equity > running_max {
                running_max = equity;
            }
            let drawdown = equity / running_max - 1.0;
            if drawdown < max_drawdown {
                max_drawdown = drawdown;
            }
        }
        max_drawdown
    }

    fn population_std_dev(values: &[f64]) -> f64 {
        if values.len() < 2 {
            return 0.0;
        }
        let std_dev = values.iter().population_std_dev();
        if std_dev.is_finite() {
            std_dev
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::calculate_equity_curve;

    #[test]
    fn max_drawdown_uses_running_peak() {
        let drawdown = PerformanceCalculator::calculate_max_drawdown(&[1.0, 1.1, 1.05, 1.2, 0.9]);
        assert!((drawdown + 0.25).abs() < 1e-12);
        assert_eq!(PerformanceCalculator::calculate_max_drawdown(&[]), 0.0);
        assert_eq!(PerformanceCalculator::calculate_max_drawdown(&[1.0, 1.1, 1.2]), 0.0);
    }

    #[test]
    fn negative_equity_annualizes_to_total_loss() {
        let returns = [0.1, -2.0, 0.1, 0.1, 0.1];
        let equity = calculate_equity_curve(&returns);
        assert!(*equity.last().unwrap() < 0.0);

        let metrics =
            PerformanceCalculator::calculate_metrics(&returns, &equity, &[0.0; 5], &[1.0; 5], 252);
        assert_eq!(metrics.annualized_return, -1.0);
        for (_, value) in metrics.entries() {
            assert!(value.is_finite());
        }
    }

    #[test]
    fn empty_series_yields_all_zero_metrics() {
        let metrics = PerformanceCalculator::calculate_metrics(&[], &[], &[], &[], 252);
        assert_eq!(metrics, PerformanceMetrics::default());
        assert!(metrics.entries().iter().all(|(_, value)| *value == 0.0));
    }

    #[test]
    fn flat_returns_have_zero_sharpe_and_calmar() {
        let returns = vec![0.0; 10];
        let equity = calculate_equity_curve(&returns);
        let metrics = PerformanceCalculator::calculate_metrics(
            &returns,
            &equity,
            &vec![0.0; 10],
            &vec![1.0; 10],
            252,
        );
        assert_eq!(metrics.annualized_return, 0.0);
        assert_eq!(metrics.annualized_volatility, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.calmar_ratio, 0.0);
        assert_eq!(metrics.average_gross_exposure, 1.0);
        assert_eq!(metrics.percentage_positive_days, 0.0);
    }

    #[test]
    fn annualizes_return_and_population_volatility() {
        let returns = vec![0.01, -0.02, 0.03, 0.0];
        let equity = calculate_equity_curve(&returns);
        let turnover = vec![1.0, 0.0, 0.5, 0.5];
        let exposure = vec![1.0, 1.0, 0.5, 0.5];
        let metrics =
            PerformanceCalculator::calculate_metrics(&returns, &equity, &turnover, &exposure, 252);

        let final_equity = 1.01 * 0.98 * 1.03;
        let expected_return = f64::powf(final_equity, 252.0 / 4.0) - 1.0;
        let mean_return = 0.005;
        let variance = returns
            .iter()
            .map(|r| (r - mean_return) * (r - mean_return))
            .sum::<f64>()
            / 4.0;
        let expected_vol = variance.sqrt() * 252.0_f64.sqrt();

        assert!((metrics.annualized_return - expected_return).abs() < 1e-9);
        assert!((metrics.annualized_volatility - expected_vol).abs() < 1e-9);
        assert!((metrics.sharpe_ratio - expected_return / expected_vol).abs() < 1e-9);
        assert!((metrics.max_drawdown + 0.02).abs() < 1e-12);
        assert!((metrics.calmar_ratio - expected_return / 0.02).abs() < 1e-6);
        assert!((metrics.average_daily_turnover - 0.5).abs() < 1e-12);
        assert!((metrics.average_gross_exposure - 0.75).abs() < 1e-12);
        assert!((metrics.percentage_positive_days - 0.5).abs() < 1e-12);
    }
}
