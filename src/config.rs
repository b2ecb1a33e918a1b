use crate::engine::BacktestConfig;
use crate::errors::{ResearchError, ResearchResult};
use crate::models::StrategyParams;
use crate::performance::DEFAULT_ANNUALIZATION_FACTOR;
use crate::robustness::RobustnessSettings;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

pub const SETTINGS_ENV_PREFIX: &str = "ALPHALAB_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub symbols: Vec<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Directory of `<SYMBOL>.csv` files or a `.bin` market data snapshot.
    pub source: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            start: None,
            end: None,
            source: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub name: String,
    pub params: StrategyParams,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            name: "trend_following".to_string(),
            params: StrategyParams::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSection {
    pub transaction_cost_bps: f64,
    pub leverage_cap: f64,
    pub max_position: f64,
    pub annualization_factor: u32,
}

impl Default for BacktestSection {
    fn default() -> Self {
        Self {
            transaction_cost_bps: 5.0,
            leverage_cap: 1.0,
            max_position: 1.0,
            annualization_factor: DEFAULT_ANNUALIZATION_FACTOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub artifacts_dir: PathBuf,
    pub save_plots: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("artifacts"),
            save_plots: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustnessConfig {
    pub walk_forward_splits: usize,
    pub parameter_grid: BTreeMap<String, Vec<f64>>,
    pub cost_stress_bps: Vec<f64>,
    pub volatility_window: usize,
    pub trend_window: usize,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        let defaults = RobustnessSettings::default();
        Self {
            walk_forward_splits: defaults.walk_forward_splits,
            parameter_grid: defaults.parameter_grid,
            cost_stress_bps: defaults.cost_stress_bps,
            volatility_window: defaults.volatility_window,
            trend_window: defaults.trend_window,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub strategy: StrategyConfig,
    pub backtest: BacktestSection,
    pub output: OutputConfig,
    pub robustness: RobustnessConfig,
    /// Size of the rayon pool; the rayon default when absent.
    pub threads: Option<usize>,
}

impl AppConfig {
    /// Reads a JSON config, applies `ALPHALAB_*` overrides from the environment,
    /// resolves relative paths against the file's directory and validates.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_settings(path, &settings_from_env())
    }

    /// Same as [`AppConfig::load`] with an explicit override map.
    pub fn load_with_settings(path: &Path, settings: &HashMap<String, String>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_json(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config
            .apply_settings(settings)
            .context("Invalid ALPHALAB_* setting override")?;
        if let Some(base_dir) = path.parent() {
            config.resolve_paths(base_dir);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> ResearchResult<Self> {
        serde_json::from_str(raw).map_err(|e| ResearchError::config(e.to_string()))
    }

    pub fn resolve_paths(&mut self, base_dir: &Path) {
        if self.data.source.is_relative() {
            self.data.source = base_dir.join(&self.data.source);
        }
        if self.output.artifacts_dir.is_relative() {
            self.output.artifacts_dir = base_dir.join(&self.output.artifacts_dir);
        }
    }

    pub fn validate(&self) -> ResearchResult<()> {
        if self.data.symbols.is_empty() {
            return Err(ResearchError::config("data.symbols must not be empty"));
        }
        if self.data.symbols.iter().any(|symbol| symbol.trim().is_empty()) {
            return Err(ResearchError::config("data.symbols must not contain blank entries"));
        }
        if let (Some(start), Some(end)) = (self.data.start, self.data.end) {
            if start > end {
                return Err(ResearchError::config(format!(
                    "data.start ({}) must be <= data.end ({})",
                    start, end
                )));
            }
        }
        if self.strategy.name.trim().is_empty() {
            return Err(ResearchError::config("strategy.name must not be empty"));
        }

        let backtest = &self.backtest;
        if !(backtest.transaction_cost_bps.is_finite() && backtest.transaction_cost_bps >= 0.0) {
            return Err(ResearchError::config(format!(
                "backtest.transaction_cost_bps must be >= 0 (value: {})",
                backtest.transaction_cost_bps
            )));
        }
        if !(backtest.leverage_cap.is_finite() && backtest.leverage_cap > 0.0) {
            return Err(ResearchError::config(format!(
                "backtest.leverage_cap must be > 0 (value: {})",
                backtest.leverage_cap
            )));
        }
        if !(backtest.max_position.is_finite() && backtest.max_position > 0.0) {
            return Err(ResearchError::config(format!(
                "backtest.max_position must be > 0 (value: {})",
                backtest.max_position
            )));
        }
        if backtest.annualization_factor == 0 {
            return Err(ResearchError::config("backtest.annualization_factor must be > 0"));
        }

        let robustness = &self.robustness;
        if robustness.walk_forward_splits < 2 {
            return Err(ResearchError::config(format!(
                "robustness.walk_forward_splits must be >= 2 (value: {})",
                robustness.walk_forward_splits
            )));
        }
        for (key, values) in &robustness.parameter_grid {
            if key.trim().is_empty() {
                return Err(ResearchError::config(
                    "robustness.parameter_grid keys must not be blank",
                ));
            }
            if values.is_empty() {
                return Err(ResearchError::config(format!(
                    "robustness.parameter_grid.{} must list at least one value",
                    key
                )));
            }
        }
        if robustness.cost_stress_bps.is_empty() {
            return Err(ResearchError::config(
                "robustness.cost_stress_bps must not be empty",
            ));
        }
        if let Some(cost) = robustness
            .cost_stress_bps
            .iter()
            .find(|cost| !(cost.is_finite() && **cost >= 0.0))
        {
            return Err(ResearchError::config(format!(
                "robustness.cost_stress_bps values must be >= 0 (value: {})",
                cost
            )));
        }
        if robustness.volatility_window < 2 {
            return Err(ResearchError::config(format!(
                "robustness.volatility_window must be >= 2 (value: {})",
                robustness.volatility_window
            )));
        }
        if robustness.trend_window < 2 {
            return Err(ResearchError::config(format!(
                "robustness.trend_window must be >= 2 (value: {})",
                robustness.trend_window
            )));
        }
        if self.threads == Some(0) {
            return Err(ResearchError::config("threads must be >= 1"));
        }
        Ok(())
    }

    /// Overrides file values with the settings present in `settings`.
    ///
    /// Keys are the `ALPHALAB_*` names without the prefix, e.g.
    /// `TRANSACTION_COST_BPS` or `COST_STRESS_BPS`.
    pub fn apply_settings(&mut self, settings: &HashMap<String, String>) -> ResearchResult<()> {
        if settings.contains_key("SYMBOLS") {
            self.data.symbols = require_setting(settings, "SYMBOLS")?
                .split(',')
                .map(|symbol| symbol.trim().to_string())
                .filter(|symbol| !symbol.is_empty())
                .collect();
        }
        if settings.contains_key("DATA_START_DATE") {
            self.data.start = Some(require_setting_date(settings, "DATA_START_DATE")?);
        }
        if settings.contains_key("DATA_END_DATE") {
            self.data.end = Some(require_setting_date(settings, "DATA_END_DATE")?);
        }
        if settings.contains_key("DATA_SOURCE") {
            self.data.source = PathBuf::from(require_setting(settings, "DATA_SOURCE")?);
        }
        if settings.contains_key("STRATEGY") {
            self.strategy.name = require_setting(settings, "STRATEGY")?.to_string();
        }
        if settings.contains_key("TRANSACTION_COST_BPS") {
            self.backtest.transaction_cost_bps =
                require_setting_f64(settings, "TRANSACTION_COST_BPS", Some(0.0), None)?;
        }
        if settings.contains_key("LEVERAGE_CAP") {
            self.backtest.leverage_cap =
                require_setting_f64(settings, "LEVERAGE_CAP", Some(f64::MIN_POSITIVE), None)?;
        }
        if settings.contains_key("MAX_POSITION") {
            self.backtest.max_position =
                require_setting_f64(settings, "MAX_POSITION", Some(f64::MIN_POSITIVE), None)?;
        }
        if settings.contains_key("ANNUALIZATION_FACTOR") {
            self.backtest.annualization_factor =
                require_setting_usize(settings, "ANNUALIZATION_FACTOR", 1)? as u32;
        }
        if settings.contains_key("ARTIFACTS_DIR") {
            self.output.artifacts_dir = PathBuf::from(require_setting(settings, "ARTIFACTS_DIR")?);
        }
        if settings.contains_key("SAVE_PLOTS") {
            self.output.save_plots = require_setting_bool(settings, "SAVE_PLOTS")?;
        }
        if settings.contains_key("WALK_FORWARD_SPLITS") {
            self.robustness.walk_forward_splits =
                require_setting_usize(settings, "WALK_FORWARD_SPLITS", 2)?;
        }
        if settings.contains_key("COST_STRESS_BPS") {
            self.robustness.cost_stress_bps = require_setting_f64_list(settings, "COST_STRESS_BPS")?;
        }
        if settings.contains_key("VOLATILITY_WINDOW") {
            self.robustness.volatility_window =
                require_setting_usize(settings, "VOLATILITY_WINDOW", 2)?;
        }
        if settings.contains_key("TREND_WINDOW") {
            self.robustness.trend_window = require_setting_usize(settings, "TREND_WINDOW", 2)?;
        }
        if settings.contains_key("THREADS") {
            self.threads = Some(require_setting_usize(settings, "THREADS", 1)?);
        }
        Ok(())
    }

    pub fn backtest_config(&self) -> BacktestConfig {
        BacktestConfig {
            transaction_cost_bps: self.backtest.transaction_cost_bps,
            leverage_cap: self.backtest.leverage_cap,
            max_position: self.backtest.max_position,
            annualization_factor: self.backtest.annualization_factor,
        }
    }

    pub fn robustness_settings(&self) -> RobustnessSettings {
        RobustnessSettings {
            walk_forward_splits: self.robustness.walk_forward_splits,
            parameter_grid: self.robustness.parameter_grid.clone(),
            cost_stress_bps: self.robustness.cost_stress_bps.clone(),
            volatility_window: self.robustness.volatility_window,
            trend_window: self.robustness.trend_window,
        }
    }
}

/// `ALPHALAB_*` environment variables keyed without the prefix.
pub fn settings_from_env() -> HashMap<String, String> {
    std::env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix(SETTINGS_ENV_PREFIX)
                .map(|stripped| (stripped.to_string(), value))
        })
        .collect()
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> ResearchResult<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ResearchError::config(format!("Missing required setting {}", key)))
}

pub fn require_setting_date(
    settings: &HashMap<String, String>,
    key: &str,
) -> ResearchResult<NaiveDate> {
    let raw = require_setting(settings, key)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        ResearchError::config(format!(
            "Setting {} must be a date in YYYY-MM-DD format (value: {})",
            key, raw
        ))
    })
}

fn require_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> ResearchResult<f64> {
    let raw = require_setting(settings, key)?;
    let value = raw.parse::<f64>().map_err(|_| {
        ResearchError::config(format!("Setting {} must be a number (value: {})", key, raw))
    })?;
    if !value.is_finite() {
        return Err(ResearchError::config(format!(
            "Setting {} must be finite (value: {})",
            key, raw
        )));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(ResearchError::config(format!(
                "Setting {} must be >= {} (value: {})",
                key, min_value, raw
            )));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(ResearchError::config(format!(
                "Setting {} must be <= {} (value: {})",
                key, max_value, raw
            )));
        }
    }
    Ok(value)
}

fn require_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> ResearchResult<usize> {
    let value = require_setting_f64(settings, key, None, None)?;
    if value.fract() != 0.0 {
        return Err(ResearchError::config(format!(
            "Setting {} must be an integer (value: {})",
            key, value
        )));
    }
    if value < min as f64 {
        return Err(ResearchError::config(format!(
            "Setting {} must be >= {} (value: {})",
            key, min, value
        )));
    }
    Ok(value as usize)
}

fn require_setting_bool(settings: &HashMap<String, String>, key: &str) -> ResearchResult<bool> {
    let raw = require_setting(settings, key)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ResearchError::config(format!(
            "Setting {} must be true or false (value: {})",
            key, raw
        ))),
    }
}

fn require_setting_f64_list(
    settings: &HashMap<String, String>,
    key: &str,
) -> ResearchResult<Vec<f64>> {
    let raw = require_setting(settings, key)?;
    let trimmed = raw.trim().trim_matches(|c| c == '[' || c == ']');
    let mut values = Vec::new();

    for part in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
        let entry = part.trim();
        if entry.is_empty() {
            continue;
        }
        let value = entry.parse::<f64>().map_err(|_| {
            ResearchError::config(format!(
                "Setting {} must be a list of numbers (value: {})",
                key, raw
            ))
        })?;
        if !value.is_finite() {
            return Err(ResearchError::config(format!(
                "Setting {} must contain only finite numbers (value: {})",
                key, raw
            )));
        }
        values.push(value);
    }

    if values.is_empty() {
        return Err(ResearchError::config(format!(
            "Setting {} must contain at least one number (value: {})",
            key, raw
        )));
    }

    Ok(values)
}
