//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/regwatch.sqlite"
//!
//! [storage]
//! root = "./data/raw"
//!
//! [authorities.BCL]
//! name = "Banque centrale du Luxembourg"
//! source_label = "BCL_AnaCredit"
//! base_url = "https://www.bcl.lu"
//! listing_url = "https://www.bcl.lu/en/Regulatory-reporting/Etablissements_credit/AnaCredit/Instructions/index.html"
//! interval_hours = 6
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::RegwatchError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub authorities: BTreeMap<String, AuthorityConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/raw")
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,
    /// Documents fetched in parallel within one authority batch.
    #[serde(default = "default_fetch_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_retries: default_fetch_retries(),
            concurrency: default_fetch_concurrency(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    60
}
fn default_fetch_retries() -> u32 {
    2
}
fn default_fetch_concurrency() -> usize {
    4
}
fn default_user_agent() -> String {
    concat!("regwatch/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_original_language")]
    pub original_language: String,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    /// Minimum number of keyword matches before a notification is sent.
    #[serde(default = "default_min_keywords")]
    pub min_keywords: usize,
    #[serde(default = "default_pipeline_concurrency")]
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            original_language: default_original_language(),
            target_language: default_target_language(),
            min_keywords: default_min_keywords(),
            concurrency: default_pipeline_concurrency(),
        }
    }
}

fn default_original_language() -> String {
    "FR".to_string()
}
fn default_target_language() -> String {
    "EN".to_string()
}
fn default_min_keywords() -> usize {
    1
}
fn default_pipeline_concurrency() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranslationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_translation_model")]
    pub model: String,
    #[serde(default = "default_translation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_translation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_translation_model(),
            timeout_secs: default_translation_timeout(),
            max_retries: default_translation_retries(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl TranslationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_translation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_translation_timeout() -> u64 {
    120
}
fn default_translation_retries() -> u32 {
    3
}
fn default_max_input_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            smtp_host: None,
            smtp_port: default_smtp_port(),
            from: None,
            recipients: Vec::new(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthorityConfig {
    pub name: String,
    pub source_label: String,
    pub base_url: String,
    pub listing_url: String,
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
}

fn default_interval_hours() -> u64 {
    6
}

impl Config {
    /// A config with defaults everywhere and no authorities.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/regwatch.sqlite"),
            },
            storage: StorageConfig::default(),
            fetch: FetchConfig::default(),
            pipeline: PipelineConfig::default(),
            translation: TranslationConfig::default(),
            notify: NotifyConfig::default(),
            authorities: BTreeMap::new(),
        }
    }

    /// Look up an authority by code. Unknown codes are the only error that
    /// is fatal at batch entry.
    pub fn authority(&self, code: &str) -> Result<&AuthorityConfig, RegwatchError> {
        self.authorities
            .get(code)
            .ok_or_else(|| RegwatchError::UnknownAuthority(code.to_string()))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.fetch.concurrency == 0 {
        bail!("fetch.concurrency must be >= 1");
    }
    if config.fetch.timeout_secs == 0 {
        bail!("fetch.timeout_secs must be > 0");
    }
    if config.pipeline.concurrency == 0 {
        bail!("pipeline.concurrency must be >= 1");
    }
    if config.translation.timeout_secs == 0 {
        bail!("translation.timeout_secs must be > 0");
    }

    match config.translation.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown translation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    match config.notify.provider.as_str() {
        "disabled" | "log" => {}
        "smtp" => {
            if config.notify.smtp_host.is_none() {
                bail!("notify.smtp_host must be set when provider is 'smtp'");
            }
            if config.notify.from.is_none() {
                bail!("notify.from must be set when provider is 'smtp'");
            }
        }
        other => bail!(
            "Unknown notify provider: '{}'. Must be disabled, log, or smtp.",
            other
        ),
    }

    for (code, authority) in &config.authorities {
        if authority.interval_hours == 0 {
            bail!("authorities.{}.interval_hours must be > 0", code);
        }
        url::Url::parse(&authority.base_url)
            .with_context(|| format!("authorities.{}.base_url is not a valid URL", code))?;
        url::Url::parse(&authority.listing_url)
            .with_context(|| format!("authorities.{}.listing_url is not a valid URL", code))?;
    }

    Ok(())
}
