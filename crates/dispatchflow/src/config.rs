use std::str::FromStr;
use std::time::Duration;

use crate::jobs::model::{DEFAULT_MAX_ATTEMPTS, MAX_ATTEMPTS_LIMIT};
use crate::jobs::retry::RetryConfig;
use crate::jobs::submission::GateConfig;
use crate::jobs::runner::WorkerConfig;
use crate::telemetry::LogFormat;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Postgres,
    Redis,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "postgres" | "pg" => Ok(Self::Postgres),
            "redis" => Ok(Self::Redis),
            other => anyhow::bail!("unknown backend {other:?} (expected memory|postgres|redis)"),
        }
    }
}

/// Runtime configuration, loaded from `DISPATCHFLOW_*` variables with
/// unprefixed fallbacks (and `.env` when present).
#[derive(Clone, Debug)]
pub struct Config {
    pub backend: BackendKind,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub migrate_on_startup: bool,

    pub worker_id: String,
    pub worker_loops: usize,
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,

    pub backoff_base: u32,
    pub backoff_unit_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter_pct: f64,

    pub default_max_attempts: u32,
    pub max_payload_bytes: usize,

    pub api_addr: Option<String>,
    pub log_format: LogFormat,
    pub email_failure_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            database_url: None,
            redis_url: None,
            migrate_on_startup: false,
            worker_id: "worker-1".to_string(),
            worker_loops: 1,
            poll_interval_ms: 1000,
            reconnect_delay_ms: 1000,
            backoff_base: 2,
            backoff_unit_ms: 1000,
            backoff_max_ms: 15 * 60 * 1000,
            backoff_jitter_pct: 0.0,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_payload_bytes: 256 * 1024,
            api_addr: None,
            log_format: LogFormat::Pretty,
            email_failure_rate: 0.3,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let d = Self::default();

        let database_url = env_or_fallback("DISPATCHFLOW_DATABASE_URL", "DATABASE_URL");
        let redis_url = env_or_fallback("DISPATCHFLOW_REDIS_URL", "REDIS_URL");

        let backend = match env_or_fallback("DISPATCHFLOW_BACKEND", "BACKEND") {
            Some(raw) => raw.parse()?,
            None if database_url.is_some() => BackendKind::Postgres,
            None if redis_url.is_some() => BackendKind::Redis,
            None => BackendKind::Memory,
        };

        match backend {
            BackendKind::Postgres if database_url.is_none() => {
                anyhow::bail!("DATABASE_URL is missing")
            }
            BackendKind::Redis if redis_url.is_none() => anyhow::bail!("REDIS_URL is missing"),
            _ => {}
        }

        let worker_id = env_or_fallback("DISPATCHFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or(d.worker_id);

        let default_max_attempts = parse_or(
            "DISPATCHFLOW_DEFAULT_MAX_ATTEMPTS",
            "DEFAULT_MAX_ATTEMPTS",
            d.default_max_attempts,
        );
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&default_max_attempts) {
            anyhow::bail!("DEFAULT_MAX_ATTEMPTS must be between 1 and {MAX_ATTEMPTS_LIMIT}");
        }

        Ok(Self {
            backend,
            database_url,
            redis_url,
            migrate_on_startup: env_bool("DISPATCHFLOW_MIGRATE_ON_STARTUP")
                .unwrap_or(d.migrate_on_startup),
            worker_id,
            worker_loops: parse_or("DISPATCHFLOW_WORKER_LOOPS", "WORKER_LOOPS", d.worker_loops)
                .clamp(1, 64),
            poll_interval_ms: parse_or(
                "DISPATCHFLOW_POLL_INTERVAL_MS",
                "POLL_INTERVAL_MS",
                d.poll_interval_ms,
            )
            .max(1),
            reconnect_delay_ms: parse_or(
                "DISPATCHFLOW_RECONNECT_DELAY_MS",
                "RECONNECT_DELAY_MS",
                d.reconnect_delay_ms,
            )
            .max(1),
            backoff_base: parse_or("DISPATCHFLOW_BACKOFF_BASE", "BACKOFF_BASE", d.backoff_base)
                .max(1),
            backoff_unit_ms: parse_or(
                "DISPATCHFLOW_BACKOFF_UNIT_MS",
                "BACKOFF_UNIT_MS",
                d.backoff_unit_ms,
            ),
            backoff_max_ms: parse_or(
                "DISPATCHFLOW_BACKOFF_MAX_MS",
                "BACKOFF_MAX_MS",
                d.backoff_max_ms,
            ),
            backoff_jitter_pct: fraction(
                "BACKOFF_JITTER_PCT",
                env_or_fallback("DISPATCHFLOW_BACKOFF_JITTER_PCT", "BACKOFF_JITTER_PCT"),
                d.backoff_jitter_pct,
            )?,
            default_max_attempts,
            max_payload_bytes: parse_or(
                "DISPATCHFLOW_MAX_PAYLOAD_BYTES",
                "MAX_PAYLOAD_BYTES",
                d.max_payload_bytes,
            ),
            api_addr: env_or_fallback("DISPATCHFLOW_API_ADDR", "API_ADDR")
                .and_then(|s| normalize_optional_addr(&s)),
            log_format: env_or_fallback("DISPATCHFLOW_LOG_FORMAT", "LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(d.log_format),
            email_failure_rate: fraction(
                "EMAIL_FAILURE_RATE",
                env_or_fallback("DISPATCHFLOW_EMAIL_FAILURE_RATE", "EMAIL_FAILURE_RATE"),
                d.email_failure_rate,
            )?,
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            base: self.backoff_base,
            unit: Duration::from_millis(self.backoff_unit_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            jitter_pct: self.backoff_jitter_pct,
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            max_payload_bytes: self.max_payload_bytes,
            default_max_attempts: self.default_max_attempts,
        }
    }

    /// Worker settings for loop number `n` of this process.
    pub fn worker_config(&self, n: usize) -> WorkerConfig {
        let worker_id = if self.worker_loops > 1 {
            format!("{}-{}", self.worker_id, n)
        } else {
            self.worker_id.clone()
        };
        WorkerConfig {
            worker_id,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry: self.retry_config(),
        }
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn parse_or<T: FromStr>(primary: &str, fallback: &str, default: T) -> T {
    env_or_fallback(primary, fallback)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// A value in [0, 1]. Out-of-range values are clamped; NaN and infinities are rejected.
fn fraction(name: &str, raw: Option<String>, default: f64) -> anyhow::Result<f64> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{name}={raw:?} is not a number: {e}"))?;
    if !value.is_finite() {
        anyhow::bail!("{name} must be a finite number, got {raw:?}");
    }
    Ok(value.clamp(0.0, 1.0))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
