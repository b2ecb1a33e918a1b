//! Error taxonomy for the research core.

use std::path::PathBuf;
use thiserror::Error;

pub type ResearchResult<T> = std::result::Result<T, ResearchError>;

#[derive(Error, Debug)]
pub enum ResearchError {
    /// Strategy loading failed or the strategy produced an unusable signal
    #[error("Strategy error: {0}")]
    Strategy(String),

    /// Invalid engine parameters or malformed price data
    #[error("Backtest error: {0}")]
    Backtest(String),

    /// No shared calendar across symbols, or an empty slice
    #[error("Robustness error: {0}")]
    Robustness(String),

    /// Configuration failed validation
    #[error("Config error: {0}")]
    Config(String),

    /// Market data could not be read or normalized
    #[error("Data error: {0}")]
    Data(String),

    /// Writing a report, chart or summary failed
    #[error("Artifact error at {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ResearchError {
    pub fn strategy(message: impl Into<String>) -> Self {
        Self::Strategy(message.into())
    }

    pub fn backtest(message: impl Into<String>) -> Self {
        Self::Backtest(message.into())
    }

    pub fn robustness(message: impl Into<String>) -> Self {
        Self::Robustness(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub fn artifact(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Artifact {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Data(_) => 4,
            Self::Strategy(_) => 6,
            Self::Backtest(_) => 7,
            Self::Robustness(_) => 9,
            Self::Artifact { .. } | Self::Serialization(_) => 10,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Data(_) => "data_validation_error",
            Self::Strategy(_) => "strategy_error",
            Self::Backtest(_) => "backtest_error",
            Self::Robustness(_) => "robustness_error",
            Self::Artifact { .. } | Self::Serialization(_) => "artifact_error",
        }
    }
}

/// Resolve the exit code for an error chain produced by the CLI.
pub fn exit_code_for_error(error: &anyhow::Error) -> i32 {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ResearchError>())
        .map(ResearchError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(ResearchError::strategy("x").exit_code(), 6);
        assert_eq!(ResearchError::backtest("x").exit_code(), 7);
        assert_eq!(ResearchError::robustness("x").exit_code(), 9);
        assert_eq!(ResearchError::config("x").error_code(), "config_error");
    }

    #[test]
    fn exit_code_is_found_through_context() {
        let result: anyhow::Result<()> =
            Err(ResearchError::robustness("no common dates")).context("running suite");
        let error = result.unwrap_err();
        assert_eq!(exit_code_for_error(&error), 9);
        assert_eq!(exit_code_for_error(&anyhow::anyhow!("plain")), 1);
    }
}
