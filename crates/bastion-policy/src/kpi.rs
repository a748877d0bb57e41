use std::sync::Arc;

use bastion_routing::BackendResolver;
use bastion_store::{VersionedRecord, VersionedStore};
use bastion_types::{RequestContext, ScopeConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KpiBreach, PolicyError};
use crate::facts::{self, MissingThresholdPolicy};
use crate::kinds;

/// Floor/ceiling band for one KPI on one surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KpiCorridor {
    pub kpi_name: String,
    pub surface: String,
    #[serde(default)]
    pub floor: Option<f64>,
    #[serde(default)]
    pub ceiling: Option<f64>,
}

impl KpiCorridor {
    pub fn contains(&self, value: f64) -> bool {
        self.floor.map_or(true, |f| value >= f) && self.ceiling.map_or(true, |c| value <= c)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KpiObservation {
    pub kpi_name: String,
    pub surface: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

/// KPI corridors and their latest observations. Observation history is kept
/// as record versions.
pub struct KpiService {
    corridors: VersionedStore<KpiCorridor>,
    observations: VersionedStore<KpiObservation>,
    missing: MissingThresholdPolicy,
}

impl KpiService {
    pub fn new(resolver: Arc<BackendResolver>, missing: MissingThresholdPolicy) -> Self {
        Self {
            corridors: VersionedStore::new(kinds::KPI, "kpi_corridors", ScopeConfig::PROJECT, Arc::clone(&resolver)),
            observations: VersionedStore::new(kinds::KPI, "kpi_observations", ScopeConfig::PROJECT, resolver),
            missing,
        }
    }

    pub async fn set_corridor(
        &self,
        ctx: &RequestContext,
        corridor: KpiCorridor,
    ) -> Result<VersionedRecord<KpiCorridor>, PolicyError> {
        if let (Some(floor), Some(ceiling)) = (corridor.floor, corridor.ceiling) {
            if floor > ceiling {
                return Err(PolicyError::InvalidInput(format!(
                    "corridor for `{}` has floor above ceiling",
                    corridor.kpi_name
                )));
            }
        }
        let id = kpi_id(&corridor.surface, &corridor.kpi_name);
        Ok(facts::upsert(&self.corridors, ctx, &id, corridor).await?)
    }

    pub async fn record_observation(
        &self,
        ctx: &RequestContext,
        surface: &str,
        kpi_name: &str,
        value: f64,
    ) -> Result<VersionedRecord<KpiObservation>, PolicyError> {
        let observation = KpiObservation {
            kpi_name: kpi_name.to_string(),
            surface: surface.to_string(),
            value,
            observed_at: Utc::now(),
        };
        Ok(facts::upsert(&self.observations, ctx, &kpi_id(surface, kpi_name), observation).await?)
    }

    pub async fn corridors(&self, ctx: &RequestContext, surface: &str) -> Result<Vec<KpiCorridor>, PolicyError> {
        Ok(self
            .corridors
            .list_latest(ctx, false)
            .await?
            .into_iter()
            .map(|r| r.payload)
            .filter(|c| c.surface == surface)
            .collect())
    }

    /// At least one corridor must exist; every KPI with an observation must
    /// sit inside its corridor.
    pub async fn evaluate(&self, ctx: &RequestContext, surface: &str) -> Result<(), PolicyError> {
        let corridors = self.corridors(ctx, surface).await?;
        if corridors.is_empty() {
            if self.missing.allows(ctx.tenant_id().as_str()) {
                debug!(surface, "No KPI corridor; tenant allowed to proceed");
                return Ok(());
            }
            return Err(PolicyError::KpiThresholdMissing {
                surface: surface.to_string(),
            });
        }

        let mut breaches = Vec::new();
        for corridor in corridors {
            let latest = facts::live(&self.observations, ctx, &kpi_id(surface, &corridor.kpi_name)).await?;
            if let Some(observation) = latest {
                if !corridor.contains(observation.value) {
                    breaches.push(KpiBreach {
                        kpi_name: corridor.kpi_name,
                        value: observation.value,
                        floor: corridor.floor,
                        ceiling: corridor.ceiling,
                    });
                }
            }
        }

        if breaches.is_empty() {
            Ok(())
        } else {
            debug!(surface, breached = breaches.len(), "KPI corridor breached");
            Err(PolicyError::KpiBreached {
                surface: surface.to_string(),
                kpis: breaches,
            })
        }
    }
}

fn kpi_id(surface: &str, kpi_name: &str) -> String {
    format!("{surface}.{kpi_name}")
}
