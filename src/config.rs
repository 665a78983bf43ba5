use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::ResolutionResult;
use crate::error::KiraError;
use crate::http::BackoffPolicy;
use crate::known::KnownMappings;

pub const DEFAULT_CONFIG_FILE: &str = "kira-resolver.json";

/// On-disk configuration. Every field is optional; durations are seconds.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub delay_between_batches: Option<f64>,
    #[serde(default)]
    pub cache_file: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay: Option<f64>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub request_timeout: Option<f64>,
    #[serde(default)]
    pub request_attempts: Option<u32>,
    #[serde(default)]
    pub max_backoff: Option<f64>,
    #[serde(default)]
    pub refresh_cached_misses: Option<bool>,
    #[serde(default)]
    pub known_mappings: BTreeMap<String, ResolutionResult>,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub schema_version: u32,
    pub batch_size: usize,
    pub max_workers: usize,
    pub delay_between_batches: Duration,
    pub cache_file: Option<Utf8PathBuf>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub refresh_cached_misses: bool,
    pub known_mappings: KnownMappings,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            batch_size: 5,
            max_workers: 2,
            delay_between_batches: Duration::from_secs(2),
            cache_file: None,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            api_key: None,
            request_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
            refresh_cached_misses: false,
            known_mappings: KnownMappings::builtin(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolverConfig, KiraError> {
        Self::resolve_config(Self::load(path)?)
    }

    /// Reads the raw file. Without an explicit path a missing default file
    /// yields an empty config.
    pub fn load(path: Option<&str>) -> Result<Config, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config) -> Result<ResolverConfig, KiraError> {
        let defaults = ResolverConfig::default();

        let batch_size = config.batch_size.unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            return Err(KiraError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        let max_workers = config.max_workers.unwrap_or(defaults.max_workers);
        if max_workers == 0 {
            return Err(KiraError::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }

        let delay_between_batches = seconds(
            "delay_between_batches",
            config.delay_between_batches,
            defaults.delay_between_batches,
        )?;
        let retry_delay = seconds("retry_delay", config.retry_delay, defaults.retry_delay)?;
        let request_timeout = seconds(
            "request_timeout",
            config.request_timeout,
            defaults.request_timeout,
        )?;
        let max_backoff = seconds(
            "max_backoff",
            config.max_backoff,
            defaults.backoff.max_backoff,
        )?;

        let api_key = config
            .api_key
            .or_else(|| std::env::var("NCBI_API_KEY").ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let mut known_mappings = defaults.known_mappings;
        known_mappings.extend(config.known_mappings);

        Ok(ResolverConfig {
            schema_version: config.schema_version.unwrap_or(defaults.schema_version),
            batch_size,
            max_workers,
            delay_between_batches,
            cache_file: config
                .cache_file
                .filter(|path| !path.trim().is_empty())
                .map(Utf8PathBuf::from),
            max_retries: config.max_retries.unwrap_or(defaults.max_retries),
            retry_delay,
            api_key,
            request_timeout,
            backoff: BackoffPolicy {
                attempts: config
                    .request_attempts
                    .unwrap_or(defaults.backoff.attempts)
                    .max(1),
                max_backoff,
            },
            refresh_cached_misses: config
                .refresh_cached_misses
                .unwrap_or(defaults.refresh_cached_misses),
            known_mappings,
        })
    }
}

fn seconds(name: &str, value: Option<f64>, default: Duration) -> Result<Duration, KiraError> {
    let Some(secs) = value else {
        return Ok(default);
    };
    Duration::try_from_secs_f64(secs).map_err(|_| {
        KiraError::InvalidConfig(format!(
            "{name} must be a non-negative number of seconds, got {secs}"
        ))
    })
}
