//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast on values that do not parse.
//! The Redis URL may embed a password, so it is kept as a `SecretString`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub redis_url: SecretString,
    /// Prefix for every store key this queue uses.
    pub queue_prefix: String,
    /// Concurrent task slots per worker process.
    pub max_workers: usize,
    /// How long a claimed task may stay unconfirmed before the reaper reclaims it.
    pub visibility_timeout: Duration,
    pub reaper_interval: Duration,
    /// How long one claim blocks on an empty queue.
    pub claim_timeout: Duration,
    pub backoff_base: f64,
    pub backoff_cap: Duration,
    /// Directory of executor TOML files.
    pub executors_dir: PathBuf,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let redis_url = match lookup("REDIS_URL") {
            Some(url) => url,
            None => {
                let host = lookup("REDIS_HOST").unwrap_or_else(|| "localhost".to_string());
                let port: u16 = parse_var(&lookup, "REDIS_PORT", 6379)?;
                match lookup("REDIS_PASSWORD") {
                    Some(password) => format!("redis://:{password}@{host}:{port}"),
                    None => format!("redis://{host}:{port}"),
                }
            }
        };

        let max_workers: usize = parse_var(&lookup, "MAX_WORKERS", 4)?;
        if max_workers == 0 {
            return Err(Error::Config("MAX_WORKERS must be at least 1".to_string()));
        }

        let backoff_base: f64 = parse_var(&lookup, "BACKOFF_BASE", 1.5)?;
        if !backoff_base.is_finite() || backoff_base < 1.0 {
            return Err(Error::Config(format!(
                "BACKOFF_BASE must be a finite number >= 1, got {backoff_base}"
            )));
        }

        Ok(Self {
            redis_url: SecretString::from(redis_url),
            queue_prefix: lookup("QUEUE_PREFIX").unwrap_or_else(|| "beseri".to_string()),
            max_workers,
            visibility_timeout: seconds_var(&lookup, "VISIBILITY_TIMEOUT", 30.0)?,
            reaper_interval: seconds_var(&lookup, "REAPER_INTERVAL", 5.0)?,
            claim_timeout: seconds_var(&lookup, "CLAIM_TIMEOUT", 5.0)?,
            backoff_base,
            backoff_cap: seconds_var(&lookup, "BACKOFF_CAP", 10.0)?,
            executors_dir: lookup("EXECUTORS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("executors")),
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {name}: {raw:?}"))),
        None => Ok(default),
    }
}

/// A non-negative duration given in (possibly fractional) seconds.
fn seconds_var(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: f64,
) -> Result<Duration> {
    let secs: f64 = parse_var(lookup, name, default)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::Config(format!("{name} must be a non-negative number of seconds")))
}
