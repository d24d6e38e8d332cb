//! TOML configuration.
//!
//! ```toml
//! [ledger]
//! path = "./data/ledger.sqlite"
//!
//! [warehouse]
//! path = "./data/warehouse.sqlite"
//!
//! [source]
//! provider = "gmail"          # or "fixture"
//! # fixture_dir = "./fixtures/messages"
//!
//! [export]
//! max_pages = 10
//! batch_size = 20
//! pacing_ms = 500
//!
//! [forecast]
//! model = "category_predictor"
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! [server.api_keys]
//! "dev-token" = "entity-1"
//! ```
//!
//! Every section except `[ledger]` and `[warehouse]` may be omitted.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const DEFAULT_LISTING_QUERY: &str = "(bill OR invoice has:attachment OR Your Amazon.in order) OR (from:google-pay-noreply@google.com) OR (from:noreply@zomato.com)";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub ledger: DbConfig,
    pub warehouse: DbConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub fixture_dir: Option<PathBuf>,
    #[serde(default = "default_listing_query")]
    pub listing_query: String,
    #[serde(default = "default_listing_page_size")]
    pub page_size: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_base: default_api_base(),
            token_env: default_token_env(),
            fixture_dir: None,
            listing_query: default_listing_query(),
            page_size: default_listing_page_size(),
        }
    }
}

fn default_provider() -> String {
    "gmail".to_string()
}
fn default_api_base() -> String {
    "https://gmail.googleapis.com/gmail/v1/users/me".to_string()
}
fn default_token_env() -> String {
    "GMAIL_ACCESS_TOKEN".to_string()
}
fn default_listing_query() -> String {
    DEFAULT_LISTING_QUERY.to_string()
}
fn default_listing_page_size() -> u32 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_export_query")]
    pub query: String,
    #[serde(default = "default_export_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            query: default_export_query(),
            page_size: default_export_page_size(),
            max_pages: default_max_pages(),
            batch_size: default_batch_size(),
            pacing_ms: default_pacing_ms(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_export_query() -> String {
    format!(
        "{} OR (from:noreply@phonepe.com) OR (from:noreply@paytm.com)",
        DEFAULT_LISTING_QUERY
    )
}
fn default_export_page_size() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    10
}
fn default_batch_size() -> usize {
    20
}
fn default_pacing_ms() -> u64 {
    500
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForecastConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_months_back")]
    pub months_back: u32,
    #[serde(default = "default_months_ahead")]
    pub months_ahead: u32,
    #[serde(default = "default_expense_type")]
    pub expense_type: String,
    /// A `training` lock older than this is considered abandoned.
    #[serde(default = "default_training_lock_secs")]
    pub training_lock_secs: i64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            months_back: default_months_back(),
            months_ahead: default_months_ahead(),
            expense_type: default_expense_type(),
            training_lock_secs: default_training_lock_secs(),
        }
    }
}

fn default_model() -> String {
    "category_predictor".to_string()
}
fn default_months_back() -> u32 {
    4
}
fn default_months_ahead() -> u32 {
    1
}
fn default_expense_type() -> String {
    "EXPENSE".to_string()
}
fn default_training_lock_secs() -> i64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token → entity id.
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_keys: HashMap::new(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if !(1..=500).contains(&config.source.page_size) {
        anyhow::bail!("source.page_size must be in [1, 500]");
    }
    match config.source.provider.as_str() {
        "gmail" => {}
        "fixture" => {
            if config.source.fixture_dir.is_none() {
                anyhow::bail!("source.fixture_dir must be set when provider is 'fixture'");
            }
        }
        other => anyhow::bail!("Unknown source provider: '{}'. Must be gmail or fixture.", other),
    }

    if !(1..=500).contains(&config.export.page_size) {
        anyhow::bail!("export.page_size must be in [1, 500]");
    }
    if config.export.max_pages == 0 {
        anyhow::bail!("export.max_pages must be >= 1");
    }
    if config.export.batch_size == 0 {
        anyhow::bail!("export.batch_size must be >= 1");
    }

    if config.forecast.model.trim().is_empty() {
        anyhow::bail!("forecast.model must not be empty");
    }
    if config.forecast.training_lock_secs <= 0 {
        anyhow::bail!("forecast.training_lock_secs must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let toml_str = format!(
            "[ledger]\npath = \"l.sqlite\"\n[warehouse]\npath = \"w.sqlite\"\n{}",
            extra
        );
        let config: Config = toml::from_str(&toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.source.provider, "gmail");
        assert_eq!(config.source.page_size, 20);
        assert_eq!(config.export.max_pages, 10);
        assert_eq!(config.export.batch_size, 20);
        assert_eq!(config.export.pacing_ms, 500);
        assert!(config.export.query.contains("phonepe"));
        assert_eq!(config.forecast.months_back, 4);
        assert_eq!(config.forecast.months_ahead, 1);
        assert_eq!(config.server.bind, "127.0.0.1:7341");
    }

    #[test]
    fn test_fixture_requires_dir() {
        let err = parse("[source]\nprovider = \"fixture\"\n").unwrap_err();
        assert!(err.to_string().contains("fixture_dir"));
        assert!(parse("[source]\nprovider = \"fixture\"\nfixture_dir = \"f\"\n").is_ok());
    }

    #[test]
    fn test_rejects_zero_batch() {
        assert!(parse("[export]\nbatch_size = 0\n").is_err());
        assert!(parse("[export]\nmax_pages = 0\n").is_err());
        assert!(parse("[source]\nprovider = \"imap\"\n").is_err());
    }

    #[test]
    fn test_api_keys() {
        let config = parse("[server.api_keys]\n\"tok\" = \"e1\"\n").unwrap();
        assert_eq!(config.server.api_keys.get("tok").map(String::as_str), Some("e1"));
    }
}
