//! System metric domain types

use serde::{Deserialize, Serialize};

/// Series name for global CPU usage samples
pub const SERIES_CPU: &str = "cpu";

/// Series name for used-memory percentage samples
pub const SERIES_MEMORY: &str = "memory";

/// A single sample of a metric series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemMetric {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub value: f64,
}

impl SystemMetric {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Sample stamped with the current time
    pub fn now(value: f64) -> Self {
        Self::new(chrono::Utc::now().timestamp_millis(), value)
    }
}
