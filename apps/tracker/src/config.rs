use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::store::DEFAULT_RECORD_TTL;

/// Which backing store holds the aggregated drone records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => anyhow::bail!("Unknown store backend '{other}' (expected 'redis' or 'memory')"),
        }
    }
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub birdnest_api: String,
    pub drone_registry_api: String,
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub drone_ttl: Duration,
    pub dedup_retention: Duration,
    pub dedup_sweep_interval: Duration,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub port: u16,
    pub frontend_url: Option<String>,
    pub static_dir: String,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let poll_interval = Duration::from_millis(parse_env("POLL_INTERVAL_MS", 2000)?);
        let fetch_timeout = match std::env::var("FETCH_TIMEOUT_MS") {
            Ok(_) => Duration::from_millis(parse_env("FETCH_TIMEOUT_MS", 0)?),
            Err(_) => poll_interval,
        };
        let dedup_retention =
            Duration::from_secs(parse_env("DB_TIMESTAMPS_REMOVE_INTERVAL_SECONDS", 600)?);
        let dedup_sweep_interval = match std::env::var("DEDUP_SWEEP_INTERVAL_SECONDS") {
            Ok(_) => Duration::from_secs(parse_env("DEDUP_SWEEP_INTERVAL_SECONDS", 0)?),
            Err(_) => dedup_retention,
        };

        Ok(Config {
            birdnest_api: require_env("BIRDNEST_API")?,
            drone_registry_api: require_env("DRONE_REGISTRY_API")?,
            poll_interval,
            fetch_timeout,
            drone_ttl: Duration::from_secs(parse_env(
                "DRONE_TTL_SECONDS",
                DEFAULT_RECORD_TTL.as_secs(),
            )?),
            dedup_retention,
            dedup_sweep_interval,
            store_backend: std::env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "redis".to_string())
                .parse()
                .context("STORE_BACKEND must be 'redis' or 'memory'")?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1/".to_string()),
            port: parse_env("PORT", 8080)?,
            frontend_url: std::env::var("FRONTEND_URL").ok().filter(|s| !s.is_empty()),
            static_dir: std::env::var("STATIC_DIR").unwrap_or_else(|_| "public".to_string()),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
