use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub engine: EngineConfig,
}

/// Knobs the card engine reads. Constructible without any environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Ceiling on ACTIVE + OVERLAP_ACTIVE cards; 0 means unlimited.
    pub max_active_cards: usize,
    pub max_history: usize,
    /// `None` disables auto-discard.
    pub loss_threshold_percent: Option<Decimal>,
    pub discard_window: usize,
    pub value_precision: u32,
    pub key_cache_capacity: usize,
    pub writer_workers: usize,
    pub writer_queue_capacity: usize,
    pub load_concurrency: usize,
    pub flush_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_active_cards: 0,
            max_history: 50,
            loss_threshold_percent: Some(Decimal::from(-10)),
            discard_window: 10,
            value_precision: 2,
            key_cache_capacity: 4096,
            writer_workers: 4,
            writer_queue_capacity: 1024,
            load_concurrency: 8,
            flush_timeout: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let defaults = EngineConfig::default();

        let max_active_cards = parse_or(
            &env_map,
            "MAX_ACTIVE_CARDS",
            defaults.max_active_cards,
            "must be a non-negative integer",
        )?;

        let max_history: usize = parse_or(
            &env_map,
            "MAX_HISTORY_PER_CARD",
            defaults.max_history,
            "must be a positive integer",
        )?;
        if max_history == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_HISTORY_PER_CARD".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let loss_threshold_percent = match env_map
            .get("AUTO_DISCARD_LOSS_THRESHOLD_PERCENT")
            .map(|s| s.trim())
        {
            None => defaults.loss_threshold_percent,
            Some(s) if s.eq_ignore_ascii_case("off") || s.is_empty() => None,
            Some(s) => Some(Decimal::from_str(s).map_err(|_| {
                ConfigError::InvalidValue(
                    "AUTO_DISCARD_LOSS_THRESHOLD_PERCENT".to_string(),
                    format!("must be a decimal or \"off\", got {}", s),
                )
            })?),
        };

        let discard_window = parse_or(
            &env_map,
            "AUTO_DISCARD_WINDOW",
            defaults.discard_window,
            "must be a non-negative integer",
        )?;

        // Out-of-range precision is clamped, not rejected.
        let value_precision = parse_or(
            &env_map,
            "VALUE_DECIMAL_PRECISION",
            defaults.value_precision,
            "must be a non-negative integer",
        )?
        .min(crate::engine::keys::MAX_PRECISION);

        let key_cache_capacity = parse_or(
            &env_map,
            "KEY_CACHE_CAPACITY",
            defaults.key_cache_capacity,
            "must be a non-negative integer",
        )?;
        let writer_workers: usize = parse_or(
            &env_map,
            "WRITER_WORKERS",
            defaults.writer_workers,
            "must be a non-negative integer",
        )?;
        let writer_queue_capacity: usize = parse_or(
            &env_map,
            "WRITER_QUEUE_CAPACITY",
            defaults.writer_queue_capacity,
            "must be a non-negative integer",
        )?;
        let load_concurrency: usize = parse_or(
            &env_map,
            "LOAD_CONCURRENCY",
            defaults.load_concurrency,
            "must be a non-negative integer",
        )?;
        let flush_timeout_ms: u64 = parse_or(
            &env_map,
            "FLUSH_TIMEOUT_MS",
            defaults.flush_timeout.as_millis() as u64,
            "must be a non-negative integer",
        )?;

        Ok(Config {
            port,
            database_path,
            engine: EngineConfig {
                max_active_cards,
                max_history,
                loss_threshold_percent,
                discard_window,
                value_precision,
                key_cache_capacity: key_cache_capacity.max(1),
                writer_workers: writer_workers.max(1),
                writer_queue_capacity: writer_queue_capacity.max(1),
                load_concurrency: load_concurrency.max(1),
                flush_timeout: Duration::from_millis(flush_timeout_ms),
            },
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    name: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match env_map.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), expected.to_string())),
    }
}
