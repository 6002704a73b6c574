//! Metrics Service
//!
//! Bounded recent history of host metrics, one ring buffer per series.
//!
//! Metrics are best-effort telemetry: a failed append is logged and the
//! sample is dropped, it never fails a request.

use opsdeck_core::domain::metric::{SERIES_CPU, SERIES_MEMORY, SystemMetric};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::repository::{MetricsStore, StoreResult};

/// Samples kept per series
pub const DEFAULT_CAPACITY: usize = 100;

/// Ring buffer of samples per series over a `MetricsStore`
pub struct MetricsService {
    store: Arc<dyn MetricsStore>,
    capacity: usize,
}

impl MetricsService {
    pub fn new(store: Arc<dyn MetricsStore>, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
        }
    }

    /// Appends a sample and evicts everything but the last `capacity`
    pub async fn append(&self, series: &str, sample: SystemMetric) {
        let payload = match serde_json::to_string(&sample) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode metric {}: {}", series, e);
                return;
            }
        };

        if let Err(e) = self
            .store
            .push_capped(&store_key(series), payload, self.capacity)
            .await
        {
            warn!("Failed to save metric {}: {}", series, e);
        }
    }

    /// Samples of one series, oldest first. Undecodable entries are skipped.
    pub async fn read(&self, series: &str) -> StoreResult<Vec<SystemMetric>> {
        let entries = self.store.range(&store_key(series)).await?;

        Ok(entries
            .iter()
            .filter_map(|entry| match serde_json::from_str::<SystemMetric>(entry) {
                Ok(metric) => Some(metric),
                Err(e) => {
                    debug!("Skipping malformed {} sample: {}", series, e);
                    None
                }
            })
            .collect())
    }

    /// History of every collected series
    pub async fn get_metrics(&self) -> StoreResult<BTreeMap<String, Vec<SystemMetric>>> {
        let mut metrics = BTreeMap::new();
        for series in [SERIES_CPU, SERIES_MEMORY] {
            metrics.insert(series.to_string(), self.read(series).await?);
        }
        Ok(metrics)
    }
}

fn store_key(series: &str) -> String {
    match series {
        SERIES_MEMORY => "metrics:mem".to_string(),
        other => format!("metrics:{}", other),
    }
}

/// Starts sampling CPU and memory usage every `interval`
///
/// Runs until the returned handle is aborted.
pub fn spawn_collector(metrics: Arc<MetricsService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Metrics collector started (interval: {:?})", interval);

        let mut system = System::new();
        let mut ticker = time::interval(interval);

        loop {
            ticker.tick().await;

            let (cpu, memory) = sample(&mut system);
            metrics.append(SERIES_CPU, cpu).await;
            if let Some(memory) = memory {
                metrics.append(SERIES_MEMORY, memory).await;
            }
        }
    })
}

/// CPU usage and used-memory percentage, stamped with the same instant
fn sample(system: &mut System) -> (SystemMetric, Option<SystemMetric>) {
    system.refresh_cpu_usage();
    system.refresh_memory();

    let now = chrono::Utc::now().timestamp_millis();
    let cpu = SystemMetric::new(now, f64::from(system.global_cpu_usage()));

    let total = system.total_memory();
    let memory = (total > 0)
        .then(|| SystemMetric::new(now, system.used_memory() as f64 / total as f64 * 100.0));

    (cpu, memory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryMetricsStore, StoreError};
    use async_trait::async_trait;

    struct UnreachableStore;

    #[async_trait]
    impl MetricsStore for UnreachableStore {
        async fn push_capped(&self, _: &str, _: String, _: usize) -> StoreResult<()> {
            Err(StoreError::Corrupt("connection refused".to_string()))
        }

        async fn range(&self, _: &str) -> StoreResult<Vec<String>> {
            Err(StoreError::Corrupt("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_read_returns_last_capacity_samples_in_order() {
        let service = MetricsService::new(Arc::new(InMemoryMetricsStore::new()), 100);

        for i in 0..150 {
            service
                .append(SERIES_CPU, SystemMetric::new(i, i as f64))
                .await;
        }

        let samples = service.read(SERIES_CPU).await.unwrap();
        assert_eq!(samples.len(), 100);
        let timestamps: Vec<i64> = samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, (50..150).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let store = Arc::new(InMemoryMetricsStore::new());
        let service = MetricsService::new(store.clone(), 10);

        service.append(SERIES_MEMORY, SystemMetric::new(1, 40.0)).await;
        store
            .push_capped("metrics:mem", "not json".to_string(), 10)
            .await
            .unwrap();
        service.append(SERIES_MEMORY, SystemMetric::new(2, 41.5)).await;

        let samples = service.read(SERIES_MEMORY).await.unwrap();
        assert_eq!(
            samples,
            vec![SystemMetric::new(1, 40.0), SystemMetric::new(2, 41.5)]
        );
    }

    #[tokio::test]
    async fn test_unreachable_store_drops_appends_and_fails_reads() {
        let service = MetricsService::new(Arc::new(UnreachableStore), 10);

        service.append(SERIES_CPU, SystemMetric::now(12.0)).await;

        assert!(service.read(SERIES_CPU).await.is_err());
        assert!(service.get_metrics().await.is_err());
    }

    #[tokio::test]
    async fn test_get_metrics_reports_every_series() {
        let service = MetricsService::new(Arc::new(InMemoryMetricsStore::new()), 10);
        service.append(SERIES_CPU, SystemMetric::new(1, 3.0)).await;

        let metrics = service.get_metrics().await.unwrap();
        assert_eq!(metrics[SERIES_CPU], vec![SystemMetric::new(1, 3.0)]);
        assert!(metrics[SERIES_MEMORY].is_empty());
    }

    #[test]
    fn test_sample_reports_memory_percentage() {
        let mut system = System::new();
        let (cpu, memory) = sample(&mut system);

        assert!(cpu.value >= 0.0);
        if let Some(memory) = memory {
            assert!((0.0..=100.0).contains(&memory.value));
            assert_eq!(memory.timestamp, cpu.timestamp);
        }
    }
}
