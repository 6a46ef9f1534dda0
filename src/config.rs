//! Process configuration read from the environment at startup.
//!
//! Anything missing or malformed here is a `FatalConfig` error: the process refuses
//! to start instead of looping with a broken setup.

use std::time::Duration;

use crate::errors::EtlError;
use crate::jobs::ConnectorKind;
use crate::models::{MAX_INTERVAL_DAYS, MAX_RETENTION_DAYS};

const DEFAULT_BACKEND_API_URL: &str = "http://backend-api:5050";
const DEFAULT_REDIS_URL: &str = "redis://redis-cache:6379";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5050";

/// Which rows a connector's detail projection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailScope {
    /// Everything in the historical store after the write.
    History,
    /// Only the batch the run just extracted.
    CurrentBatch,
}

/// Row-level cache entry published next to the rollup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailProjection {
    pub key: String,
    pub scope: DetailScope,
}

/// Name, retention and cadence for one connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub name: String,
    pub retention_days: i32,
    pub interval_days: i32,
    pub cache_key: String,
    pub detail: Option<DetailProjection>,
}

impl ConnectorConfig {
    pub fn new(name: impl Into<String>, retention_days: i32, interval_days: i32, cache_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retention_days,
            interval_days,
            cache_key: cache_key.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, scope: DetailScope) -> Self {
        self.detail = Some(DetailProjection {
            key: key.into(),
            scope,
        });
        self
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        if self.name.trim().is_empty() {
            return Err(EtlError::FatalConfig("connector name is empty".into()));
        }
        if let Some(detail) = &self.detail {
            if detail.key.trim().is_empty() || detail.key == self.cache_key {
                return Err(EtlError::FatalConfig(format!(
                    "{}: detail key must be set and differ from {}",
                    self.name, self.cache_key
                )));
            }
        }
        if !(0..=MAX_RETENTION_DAYS).contains(&self.retention_days) {
            return Err(EtlError::FatalConfig(format!(
                "{}: retention_days must be 0..={}, got {}",
                self.name, MAX_RETENTION_DAYS, self.retention_days
            )));
        }
        if !(0..=MAX_INTERVAL_DAYS).contains(&self.interval_days) {
            return Err(EtlError::FatalConfig(format!(
                "{}: interval_days must be 0..={}, got {}",
                self.name, MAX_INTERVAL_DAYS, self.interval_days
            )));
        }
        Ok(())
    }
}

/// Timing knobs shared by every scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub lease_ttl: Duration,
    pub credential_backoff: Duration,
    pub publish_attempts: u32,
    pub publish_backoff: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            lease_ttl: Duration::from_secs(3600),
            credential_backoff: Duration::from_secs(5),
            publish_attempts: 5,
            publish_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub redis_url: String,
    pub backend_api_url: String,
    pub http_timeout: Duration,
    pub scheduler: SchedulerSettings,
    pub connectors: Vec<(ConnectorKind, ConnectorConfig)>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, EtlError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, EtlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = required(&lookup, "DATABASE_URL")?;
        let defaults = SchedulerSettings::default();

        let scheduler = SchedulerSettings {
            tick_interval: secs(&lookup, "ETL_TICK_SECS", defaults.tick_interval)?,
            lease_ttl: secs(&lookup, "ETL_LEASE_TTL_SECS", defaults.lease_ttl)?,
            credential_backoff: secs(&lookup, "ETL_CREDENTIAL_BACKOFF_SECS", defaults.credential_backoff)?,
            publish_attempts: parse_or(&lookup, "ETL_PUBLISH_ATTEMPTS", defaults.publish_attempts)?,
            publish_backoff: defaults.publish_backoff,
        };

        let names = lookup("ETL_CONNECTORS")
            .unwrap_or_else(|| "defenders_deployed,defenders_coverage".to_string());

        let mut connectors = Vec::new();
        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let kind = ConnectorKind::from_name(name)
                .ok_or_else(|| EtlError::FatalConfig(format!("unknown connector: {}", name)))?;
            if connectors.iter().any(|(k, _)| *k == kind) {
                continue;
            }
            let mut connector = kind.default_config();
            let prefix = connector.name.to_uppercase();
            connector.retention_days =
                parse_or(&lookup, &format!("{}_RETENTION_DAYS", prefix), connector.retention_days)?;
            connector.interval_days =
                parse_or(&lookup, &format!("{}_INTERVAL_DAYS", prefix), connector.interval_days)?;
            connector.validate()?;
            connectors.push((kind, connector));
        }

        let config = Self {
            database_url,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            backend_api_url: lookup("BACKEND_API_URL").unwrap_or_else(|| DEFAULT_BACKEND_API_URL.to_string()),
            http_timeout: secs(&lookup, "ETL_HTTP_TIMEOUT_SECS", Duration::from_secs(10))?,
            scheduler,
            connectors,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EtlError> {
        if self.connectors.is_empty() {
            return Err(EtlError::FatalConfig("ETL_CONNECTORS names no connector".into()));
        }
        if self.scheduler.tick_interval.is_zero() {
            return Err(EtlError::FatalConfig("ETL_TICK_SECS must be > 0".into()));
        }
        if self.scheduler.publish_attempts == 0 {
            return Err(EtlError::FatalConfig("ETL_PUBLISH_ATTEMPTS must be > 0".into()));
        }
        url::Url::parse(&self.backend_api_url)
            .map_err(|e| EtlError::FatalConfig(format!("BACKEND_API_URL: {}", e)))?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub database_url: String,
    pub redis_url: String,
    pub bind_addr: String,
    pub http_timeout: Duration,
}

impl BackendConfig {
    pub fn from_env() -> Result<Self, EtlError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, EtlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database_url: required(&lookup, "DATABASE_URL")?,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            http_timeout: secs(&lookup, "ETL_HTTP_TIMEOUT_SECS", Duration::from_secs(10))?,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, EtlError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| EtlError::FatalConfig(format!("{} is not set", key)))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, EtlError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| EtlError::FatalConfig(format!("{}={}: {}", key, raw, e))),
        None => Ok(default),
    }
}

fn secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, EtlError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}
