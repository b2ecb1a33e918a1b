use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Close-to-close percentage change. The first value is 0, as is any step
/// whose previous value is zero or either side is non-finite.
pub fn calculate_pct_change(prices: &[f64]) -> Vec<f64> {
    let mut changes = Vec::with_capacity(prices.len());
    if prices.is_empty() {
        return changes;
    }
    changes.push(0.0);
    for pair in prices.windows(2) {
        changes.push(ratio_change(pair[0], pair[1]));
    }
    changes
}

/// Change over `period` rows; `None` until `period` earlier rows exist.
pub fn calculate_period_change(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..prices.len())
        .map(|idx| {
            if period == 0 || idx < period {
                return None;
            }
            let previous = prices[idx - period];
            let current = prices[idx];
            if !previous.is_finite() || !current.is_finite() || previous == 0.0 {
                None
            } else {
                Some(current / previous - 1.0)
            }
        })
        .collect()
}

fn ratio_change(previous: f64, current: f64) -> f64 {
    if !previous.is_finite() || !current.is_finite() || previous == 0.0 {
        return 0.0;
    }
    current / previous - 1.0
}

/// Equity path `cumprod(1 + r)` starting from unit capital.
pub fn calculate_equity_curve(returns: &[f64]) -> Vec<f64> {
    let mut equity = 1.0;
    returns
        .iter()
        .map(|r| {
            equity *= 1.0 + r;
            equity
        })
        .collect()
}

/// Trailing mean, defined only once a full window of data exists.
pub fn calculate_rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |slice| Some(slice.iter().sum::<f64>() / slice.len() as f64))
}

/// Trailing sample standard deviation (n - 1 denominator), defined only once a
/// full window exists. A window of one is never defined.
pub fn calculate_rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |slice| {
        if slice.len() < 2 {
            return None;
        }
        let std_dev = slice.iter().std_dev();
        std_dev.is_finite().then_some(std_dev)
    })
}

fn rolling<F>(values: &[f64], window: usize, reducer: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    if window == 0 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|end| {
            if end + 1 < window {
                None
            } else {
                reducer(&values[end + 1 - window..=end])
            }
        })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn max(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Median of the finite values; averages the middle pair for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut filtered: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = filtered.len() / 2;

    if filtered.len() % 2 == 0 {
        Some((filtered[mid - 1] + filtered[mid]) / 2.0)
    } else {
        Some(filtered[mid])
    }
}

/// Sorted union of several date indices.
pub fn union_index<'a, I>(indices: I) -> Vec<DateTime<Utc>>
where
    I: IntoIterator<Item = &'a [DateTime<Utc>]>,
{
    let mut union = BTreeSet::new();
    for index in indices {
        union.extend(index.iter().copied());
    }
    union.into_iter().collect()
}

/// Sorted intersection of several date indices; empty when no index is given.
pub fn intersect_index<'a, I>(indices: I) -> Vec<DateTime<Utc>>
where
    I: IntoIterator<Item = &'a [DateTime<Utc>]>,
{
    let mut common: Option<BTreeSet<DateTime<Utc>>> = None;
    for index in indices {
        let current: BTreeSet<DateTime<Utc>> = index.iter().copied().collect();
        common = Some(match common {
            None => current,
            Some(existing) => existing.intersection(&current).copied().collect(),
        });
    }
    common.map(|set| set.into_iter().collect()).unwrap_or_default()
}

/// Aligns `values` (keyed by `dates`) onto `target`, filling gaps with zero.
pub fn reindex_zero_fill(
    dates: &[DateTime<Utc>],
    values: &[f64],
    target: &[DateTime<Utc>],
) -> Vec<f64> {
    if dates == target {
        return values.to_vec();
    }
    let lookup: HashMap<DateTime<Utc>, f64> =
        dates.iter().copied().zip(values.iter().copied()).collect();
    target
        .iter()
        .map(|date| lookup.get(date).copied().unwrap_or(0.0))
        .collect()
}
