//! Configuration management for the lexdecode search engine
//!
//! Supports loading configuration from:
//! - TOML files (`config/default.toml`, `config/{env}.toml`)
//! - Environment variables (`LEXDECODE__` prefix, `__` separator)
//! - Programmatic overrides on the deserialized [`Settings`]

pub mod constants;
pub mod search;
pub mod settings;

pub use search::{
    BeamConfig, CrossWordPolicy, HistoryAddressing, LanguageModelConfig, LatticeConfig,
    SearchConfig, TreeSelection,
};
pub use settings::{load_settings, load_settings_from, ObservabilityConfig, Settings};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
