use crate::config::{settings_from_env, AppConfig};
use crate::data_context::MarketData;
use crate::strategy::{create_strategy, Strategy};
use anyhow::{Context, Result};
use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Validated configuration shared by every subcommand.
#[derive(Clone, Debug)]
pub struct AppContext {
    config: AppConfig,
    config_path: PathBuf,
}

impl AppContext {
    pub fn initialize(config_path: &Path) -> Result<Self> {
        Self::initialize_with_settings(config_path, &settings_from_env())
    }

    pub fn initialize_with_settings(
        config_path: &Path,
        settings: &HashMap<String, String>,
    ) -> Result<Self> {
        let config = AppConfig::load_with_settings(config_path, settings)?;
        info!(
            "Loaded config {} ({} symbols, strategy {})",
            config_path.display(),
            config.data.symbols.len(),
            config.strategy.name
        );
        Ok(Self {
            config,
            config_path: config_path.to_path_buf(),
        })
    }

    pub fn from_config(config: AppConfig) -> Self {
        Self {
            config,
            config_path: PathBuf::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn market_data(&self) -> Result<MarketData> {
        MarketData::load(&self.config.data).with_context(|| {
            format!(
                "Failed to load market data from {}",
                self.config.data.source.display()
            )
        })
    }

    pub fn strategy(&self) -> Result<Box<dyn Strategy>> {
        Ok(create_strategy(&self.config.strategy.name)?)
    }

    /// `<artifacts_dir>/<experiment_id>`
    pub fn experiment_dir(&self, experiment_id: &str) -> PathBuf {
        self.config.output.artifacts_dir.join(experiment_id)
    }
}

pub fn resolve_experiment_id(cli_value: Option<String>) -> String {
    cli_value
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(new_experiment_id)
}

pub fn new_experiment_id() -> String {
    format!("exp_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let first = new_experiment_id();
        let second = new_experiment_id();
        assert!(first.starts_with("exp_"));
        assert_eq!(first.len(), 4 + 32);
        assert_ne!(first, second);
    }

    #[test]
    fn experiment_dir_nests_under_artifacts() {
        let mut config =
            AppConfig::from_json(r#"{"data": {"symbols": ["SPY"]}, "output": {"artifacts_dir": "/tmp/runs"}}"#)
                .unwrap();
        config.strategy.name = "buy_and_hold".to_string();
        let app = AppContext::from_config(config);
        assert_eq!(app.experiment_dir("exp_1"), PathBuf::from("/tmp/runs/exp_1"));
        assert_eq!(app.strategy().unwrap().name(), "buy_and_hold");
        assert_eq!(app.config_path(), Path::new(""));
    }

    #[test]
    fn explicit_id_wins_unless_blank() {
        assert_eq!(resolve_experiment_id(Some(" run_1 ".to_string())), "run_1");
        assert!(resolve_experiment_id(Some("  ".to_string())).starts_with("exp_"));
    }
}
