pub mod config;
pub mod context;
pub mod data_context;
pub mod engine;
pub mod errors;
pub mod indicators;
pub mod models;
pub mod param_utils;
pub mod performance;
pub mod report;
pub mod robustness;
pub mod status;
pub mod strategy;

pub mod commands {
    pub mod backtest;
    pub mod export_market_data;
    pub mod robustness;
}
