//! Anomaly ("temperature") check over a rolling window of metric samples.

use std::collections::BTreeMap;
use std::sync::Arc;

use bastion_routing::BackendResolver;
use bastion_store::{VersionedRecord, VersionedStore};
use bastion_types::{RequestContext, ScopeConfig};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PolicyError;
use crate::facts;
use crate::kinds;
use crate::series::TimeSeries;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricBand {
    #[serde(default)]
    pub floor: Option<f64>,
    #[serde(default)]
    pub ceiling: Option<f64>,
}

impl MetricBand {
    fn breached_by(&self, value: f64) -> bool {
        self.floor.is_some_and(|f| value < f) || self.ceiling.is_some_and(|c| value > c)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemperatureThresholds {
    pub surface: String,
    pub metrics: BTreeMap<String, MetricBand>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSample {
    pub surface: String,
    pub metric: String,
    pub value: f64,
    pub at: DateTime<Utc>,
}

/// Per-metric averages over the window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TemperatureSnapshot {
    pub surface: String,
    pub window_start: DateTime<Utc>,
    pub sample_count: usize,
    pub metrics: BTreeMap<String, f64>,
}

pub struct TemperatureService {
    thresholds: VersionedStore<TemperatureThresholds>,
    samples: TimeSeries<TemperatureSample>,
    window: Duration,
}

impl TemperatureService {
    pub fn new(resolver: Arc<BackendResolver>, window: Duration) -> Self {
        Self {
            thresholds: VersionedStore::new(
                kinds::TEMPERATURE,
                "temperature_thresholds",
                ScopeConfig::PROJECT,
                Arc::clone(&resolver),
            ),
            samples: TimeSeries::new(resolver, kinds::TEMPERATURE),
            window,
        }
    }

    pub async fn set_thresholds(
        &self,
        ctx: &RequestContext,
        thresholds: TemperatureThresholds,
    ) -> Result<VersionedRecord<TemperatureThresholds>, PolicyError> {
        let surface = thresholds.surface.clone();
        Ok(facts::upsert(&self.thresholds, ctx, &surface, thresholds).await?)
    }

    pub async fn record_sample(&self, ctx: &RequestContext, sample: TemperatureSample) -> Result<(), PolicyError> {
        if !sample.value.is_finite() {
            return Err(PolicyError::InvalidInput("sample value must be finite".into()));
        }
        let surface = sample.surface.clone();
        self.samples.append(ctx, &surface, sample.at, &sample).await
    }

    pub async fn snapshot(&self, ctx: &RequestContext, surface: &str) -> Result<TemperatureSnapshot, PolicyError> {
        let window_start = Utc::now() - self.window;
        let samples = self.samples.since(ctx, surface, window_start).await?;

        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for sample in &samples {
            let entry = sums.entry(sample.metric.clone()).or_insert((0.0, 0));
            entry.0 += sample.value;
            entry.1 += 1;
        }
        Ok(TemperatureSnapshot {
            surface: surface.to_string(),
            window_start,
            sample_count: samples.len(),
            metrics: sums
                .into_iter()
                .map(|(metric, (sum, n))| (metric, sum / n as f64))
                .collect(),
        })
    }

    /// Fails with the names of every metric whose windowed average is
    /// outside its band. Surfaces without thresholds pass.
    pub async fn evaluate(&self, ctx: &RequestContext, surface: &str) -> Result<(), PolicyError> {
        let Some(thresholds) = facts::live(&self.thresholds, ctx, surface).await? else {
            return Ok(());
        };
        let snapshot = self.snapshot(ctx, surface).await?;

        let breached: Vec<String> = thresholds
            .metrics
            .iter()
            .filter(|(metric, band)| {
                snapshot
                    .metrics
                    .get(metric.as_str())
                    .is_some_and(|value| band.breached_by(*value))
            })
            .map(|(metric, _)| metric.clone())
            .collect();

        if breached.is_empty() {
            Ok(())
        } else {
            debug!(surface, metrics = ?breached, "Temperature breach");
            Err(PolicyError::TemperatureBreach {
                surface: surface.to_string(),
                metrics: breached,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use bastion_types::ToEnvelope;

    fn sample(metric: &str, value: f64, at: DateTime<Utc>) -> TemperatureSample {
        TemperatureSample {
            surface: "nexus".into(),
            metric: metric.into(),
            value,
            at,
        }
    }

    fn service() -> TemperatureService {
        TemperatureService::new(testing::resolver(), Duration::minutes(15))
    }

    #[tokio::test]
    async fn unconfigured_surface_passes() {
        service().evaluate(&testing::ctx(), "nexus").await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_averages_window_only() {
        let svc = service();
        let ctx = testing::ctx();
        let now = Utc::now();
        svc.record_sample(&ctx, sample("latency_ms", 100.0, now)).await.unwrap();
        svc.record_sample(&ctx, sample("latency_ms", 300.0, now)).await.unwrap();
        svc.record_sample(&ctx, sample("latency_ms", 9000.0, now - Duration::hours(2)))
            .await
            .unwrap();

        let snapshot = svc.snapshot(&ctx, "nexus").await.unwrap();
        assert_eq!(snapshot.sample_count, 2);
        assert_eq!(snapshot.metrics["latency_ms"], 200.0);
    }

    #[tokio::test]
    async fn breached_metrics_are_named() {
        let svc = service();
        let ctx = testing::ctx();
        let mut metrics = BTreeMap::new();
        metrics.insert("latency_ms".to_string(), MetricBand { floor: None, ceiling: Some(250.0) });
        metrics.insert("throughput".to_string(), MetricBand { floor: Some(10.0), ceiling: None });
        svc.set_thresholds(&ctx, TemperatureThresholds { surface: "nexus".into(), metrics })
            .await
            .unwrap();

        let now = Utc::now();
        svc.record_sample(&ctx, sample("latency_ms", 400.0, now)).await.unwrap();
        svc.record_sample(&ctx, sample("throughput", 50.0, now)).await.unwrap();

        let err = svc.evaluate(&ctx, "nexus").await.unwrap_err();
        let envelope = err.to_envelope();
        assert_eq!(envelope.code, "temperature_breach");
        assert_eq!(envelope.gate.as_deref(), Some("temperature"));
        assert_eq!(envelope.details["metrics"], serde_json::json!(["latency_ms"]));
    }
}
