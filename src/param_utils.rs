use crate::models::StrategyParams;
use std::collections::BTreeMap;

/// Get a parameter value with a default fallback
pub fn get_param(params: &StrategyParams, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Extract a parameter as f64, falling back to the default when not finite
pub fn get_param_f64(params: &StrategyParams, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

/// Extract a parameter as usize with a minimum value
pub fn get_param_usize_at_least(
    params: &StrategyParams,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    params
        .get(key)
        .copied()
        .filter(|value| value.is_finite())
        .unwrap_or(default as f64)
        .max(min as f64) as usize
}

/// Formats a number the way parameter labels show it (`5`, `0.25`).
pub fn format_param_value(value: f64) -> String {
    let formatted = format!("{}", value);
    if formatted == "-0" {
        "0".to_string()
    } else {
        formatted
    }
}

/// `key1=v1,key2=v2` over the given keys, in the given order.
pub fn parameter_label(keys: &[String], params: &StrategyParams) -> String {
    keys.iter()
        .filter_map(|key| {
            params
                .get(key)
                .map(|value| format!("{}={}", key, format_param_value(*value)))
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Cartesian product of a parameter grid layered over `base`.
///
/// Keys are visited in sorted order and the last key varies fastest. Each
/// entry is `(label, params)`. An empty grid yields the single `baseline` set.
pub fn expand_parameter_grid(
    base: &StrategyParams,
    grid: &BTreeMap<String, Vec<f64>>,
) -> Vec<(String, StrategyParams)> {
    if grid.is_empty() {
        return vec![("baseline".to_string(), base.clone())];
    }

    let keys: Vec<String> = grid.keys().cloned().collect();
    let mut combinations: Vec<StrategyParams> = vec![base.clone()];
    for key in &keys {
        let values = &grid[key];
        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for params in &combinations {
            for value in values {
                let mut extended = params.clone();
                extended.insert(key.clone(), *value);
                next.push(extended);
            }
        }
        combinations = next;
    }

    combinations
        .into_iter()
        .map(|params| (parameter_label(&keys, &params), params))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_is_cartesian_in_sorted_key_order() {
        let base = StrategyParams::from([("lookback".to_string(), 5.0), ("fixed".to_string(), 1.0)]);
        let grid = BTreeMap::from([
            ("lookback".to_string(), vec![5.0, 10.0]),
            ("alpha".to_string(), vec![0.5, 1.0]),
        ]);
        let combos = expand_parameter_grid(&base, &grid);
        let labels: Vec<&str> = combos.iter().map(|(label, _)| label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "alpha=0.5,lookback=5",
                "alpha=0.5,lookback=10",
                "alpha=1,lookback=5",
                "alpha=1,lookback=10",
            ]
        );
        assert!(combos.iter().all(|(_, p)| p.get("fixed") == Some(&1.0)));
        assert_eq!(combos[1].1.get("lookback"), Some(&10.0));
    }

    #[test]
    fn empty_grid_reuses_base_parameters() {
        let base = StrategyParams::from([("lookback".to_string(), 7.0)]);
        let combos = expand_parameter_grid(&base, &BTreeMap::new());
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].0, "baseline");
        assert_eq!(combos[0].1, base);
    }

    #[test]
    fn usize_params_respect_minimum() {
        let params = StrategyParams::from([("period".to_string(), 0.0)]);
        assert_eq!(get_param_usize_at_least(&params, "period", 5, 1), 1);
        assert_eq!(get_param_usize_at_least(&params, "missing", 5, 1), 5);
    }
}
