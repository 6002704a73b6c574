//! Server configuration
//!
//! Every parameter comes from the environment with a working default, so the
//! server starts with no configuration at all (in-memory storage).

use std::time::Duration;

use crate::service::deploy::DEFAULT_SUMMARY_LIMIT;
use crate::service::engine::DEFAULT_SHELL;
use crate::service::hub::DEFAULT_SUBSCRIBER_BUFFER;
use crate::service::metrics::DEFAULT_CAPACITY;

/// Server configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP server listens on
    pub bind_addr: String,

    /// Postgres URL; in-memory storage when unset
    pub database_url: Option<String>,

    /// Redis URL for the metrics ring buffer; in-memory when unset
    pub redis_url: Option<String>,

    /// Interpreter deploy scripts are run with
    pub script_shell: String,

    /// How often host metrics are sampled
    pub metrics_interval: Duration,

    /// Samples kept per metrics series
    pub metrics_capacity: usize,

    /// Pending events per live-log subscriber
    pub hub_buffer: usize,

    /// Pipeline records returned by the summary
    pub summary_limit: usize,
}

impl AppConfig {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - BIND_ADDR (default: 0.0.0.0:8081)
    /// - DATABASE_URL
    /// - REDIS_URL
    /// - SCRIPT_SHELL (default: /bin/bash)
    /// - METRICS_INTERVAL (seconds, default: 2)
    /// - METRICS_CAPACITY (default: 100)
    /// - HUB_BUFFER (default: 100)
    /// - SUMMARY_LIMIT (default: 10)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr);

        let database_url = non_empty_var("DATABASE_URL");
        let redis_url = non_empty_var("REDIS_URL");

        let script_shell = std::env::var("SCRIPT_SHELL").unwrap_or(defaults.script_shell);

        let metrics_interval = parse_var::<u64>("METRICS_INTERVAL")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.metrics_interval);

        let metrics_capacity =
            parse_var::<usize>("METRICS_CAPACITY")?.unwrap_or(defaults.metrics_capacity);

        let hub_buffer = parse_var::<usize>("HUB_BUFFER")?.unwrap_or(defaults.hub_buffer);

        let summary_limit = parse_var::<usize>("SUMMARY_LIMIT")?.unwrap_or(defaults.summary_limit);

        Ok(Self {
            bind_addr,
            database_url,
            redis_url,
            script_shell,
            metrics_interval,
            metrics_capacity,
            hub_buffer,
            summary_limit,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.script_shell.is_empty() {
            anyhow::bail!("script_shell cannot be empty");
        }

        if self.metrics_interval.is_zero() {
            anyhow::bail!("metrics_interval must be greater than 0");
        }

        if self.metrics_capacity == 0 {
            anyhow::bail!("metrics_capacity must be greater than 0");
        }

        if self.hub_buffer == 0 {
            anyhow::bail!("hub_buffer must be greater than 0");
        }

        if self.summary_limit == 0 {
            anyhow::bail!("summary_limit must be greater than 0");
        }

        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                anyhow::bail!("DATABASE_URL must start with postgres:// or postgresql://");
            }
        }

        if let Some(url) = &self.redis_url {
            if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                anyhow::bail!("REDIS_URL must start with redis:// or rediss://");
            }
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            database_url: None,
            redis_url: None,
            script_shell: DEFAULT_SHELL.to_string(),
            metrics_interval: Duration::from_secs(2),
            metrics_capacity: DEFAULT_CAPACITY,
            hub_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            summary_limit: DEFAULT_SUMMARY_LIMIT,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        Err(_) => Ok(None),
    }
}
