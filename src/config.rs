use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use log::info;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub bind_addr: String,
    pub db_pool_max: u32,
    pub cache_ttl_seconds: usize,
    pub breaker_failures: u32,
    pub breaker_backoff: Duration,
}

impl Config {
    /// Reads the process environment; call `dotenv::dotenv()` first to pick
    /// up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::Validation("DATABASE_URL must be set".to_string()))?;

        Ok(Self {
            database_url,
            redis_url: lookup("REDIS_URL").filter(|url| !url.trim().is_empty()),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            db_pool_max: positive(parse_or(&lookup, "DB_POOL_MAX", 16)?, "DB_POOL_MAX")?,
            cache_ttl_seconds: positive(
                parse_or(&lookup, "CACHE_TTL_SECONDS", 60)?,
                "CACHE_TTL_SECONDS",
            )?,
            breaker_failures: positive(parse_or(&lookup, "BREAKER_FAILURES", 3)?, "BREAKER_FAILURES")?,
            breaker_backoff: Duration::from_secs(parse_or(&lookup, "BREAKER_BACKOFF_SECONDS", 10)?),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Validation(format!("invalid {key} value {raw:?}: {e}"))),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

/// Pool size, breaker threshold and cache TTL are meaningless at zero.
fn positive<T>(value: T, key: &str) -> Result<T>
where
    T: PartialEq + Default,
{
    if value == T::default() {
        return Err(Error::Validation(format!("{key} must be greater than 0")));
    }
    Ok(value)
}
