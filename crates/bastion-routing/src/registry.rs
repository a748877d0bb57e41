use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bastion_kv::{decode, encode, BackendType, KvBackend};
use bastion_types::{ErrorEnvelope, RequestContext};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RoutingError;
use crate::route::{ResourceRoute, RouteFilter, RouteKey, RouteSpec};

/// Action name under which backend switches are gated and locked.
pub const SWITCH_BACKEND_ACTION: &str = "routing:switch_backend";

const ROUTES_TABLE: &str = "resource_routes";
const CURRENT_PREFIX: &str = "route#";
const HISTORY_PREFIX: &str = "history#";

/// Decides whether a backend switch may proceed.
///
/// Implemented by the gate chain; returning an envelope rejects the switch
/// and the envelope is surfaced to the caller unchanged.
#[async_trait]
pub trait SwitchAuthorizer: Send + Sync {
    async fn authorize_switch(
        &self,
        ctx: &RequestContext,
        route: &ResourceRoute,
        to: BackendType,
    ) -> Result<(), ErrorEnvelope>;
}

type RouteTable = HashMap<RouteKey, ResourceRoute>;

/// The routing registry.
///
/// Readers clone an `Arc` to the current table and work on it without
/// further locking. Writers are serialized, persist first, then publish a
/// complete replacement table.
pub struct RoutingRegistry {
    snapshot: RwLock<Arc<RouteTable>>,
    writer: Mutex<()>,
    persistence: Option<Arc<dyn KvBackend>>,
    required_kinds: HashSet<String>,
}

impl RoutingRegistry {
    /// Registry without persistence (tests, single-process tooling).
    pub fn in_memory() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            writer: Mutex::new(()),
            persistence: None,
            required_kinds: HashSet::new(),
        }
    }

    /// Load every current route from `backend` and persist future writes there.
    pub async fn load(backend: Arc<dyn KvBackend>) -> Result<Self, RoutingError> {
        let mut table = HashMap::new();
        for (_, value) in backend.scan_prefix(ROUTES_TABLE, CURRENT_PREFIX).await? {
            let route: ResourceRoute = decode(value)?;
            table.insert(route.key(), route);
        }
        info!(routes = table.len(), "Routing registry loaded");

        Ok(Self {
            snapshot: RwLock::new(Arc::new(table)),
            writer: Mutex::new(()),
            persistence: Some(backend),
            required_kinds: HashSet::new(),
        })
    }

    /// Resource kinds whose absence is a `missing_route` failure.
    pub fn with_required_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_kinds.extend(kinds.into_iter().map(Into::into));
        self
    }

    pub fn is_required(&self, resource_kind: &str) -> bool {
        self.required_kinds.contains(resource_kind)
    }

    fn current(&self) -> Arc<RouteTable> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn publish(&self, table: RouteTable) {
        let table = Arc::new(table);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = table,
            Err(poisoned) => *poisoned.into_inner() = table,
        }
    }

    /// Most-specific route for the scope: project match, then tenant-wide.
    pub fn get_route(
        &self,
        resource_kind: &str,
        tenant_id: &str,
        env: &str,
        project_id: Option<&str>,
    ) -> Option<ResourceRoute> {
        let table = self.current();
        let key = RouteKey::new(resource_kind, tenant_id, env, project_id);
        if key.project_id.is_some() {
            if let Some(route) = table.get(&key) {
                return Some(route.clone());
            }
        }
        table.get(&key.tenant_wide()).cloned()
    }

    /// Route lookup that reports an absent required kind as `missing_route`.
    ///
    /// `Ok(None)` means the kind is optional and unrouted; callers fall back
    /// to their default backend.
    pub fn resolve(
        &self,
        resource_kind: &str,
        tenant_id: &str,
        env: &str,
        project_id: Option<&str>,
    ) -> Result<Option<ResourceRoute>, RoutingError> {
        match self.get_route(resource_kind, tenant_id, env, project_id) {
            Some(route) => Ok(Some(route)),
            None if self.is_required(resource_kind) => {
                warn!(resource_kind, tenant_id, env, "Required route missing");
                Err(RoutingError::MissingRoute {
                    resource_kind: resource_kind.to_string(),
                })
            }
            None => Ok(None),
        }
    }

    /// Like [`Self::resolve`] but every kind is treated as required.
    pub fn require_route(
        &self,
        resource_kind: &str,
        tenant_id: &str,
        env: &str,
        project_id: Option<&str>,
    ) -> Result<ResourceRoute, RoutingError> {
        self.get_route(resource_kind, tenant_id, env, project_id)
            .ok_or_else(|| RoutingError::MissingRoute {
                resource_kind: resource_kind.to_string(),
            })
    }

    pub fn list_routes(&self, filter: &RouteFilter) -> Vec<ResourceRoute> {
        let table = self.current();
        let mut routes: Vec<ResourceRoute> = table
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        routes.sort_by(|a, b| a.key().cmp(&b.key()));
        routes
    }

    /// Create a route or update the non-backend fields of an existing one.
    ///
    /// Changing the backend type of an existing route is refused here; use
    /// [`Self::switch_backend`].
    pub async fn upsert_route(&self, spec: RouteSpec) -> Result<ResourceRoute, RoutingError> {
        spec.validate()?;
        let _writer = self.writer.lock().await;
        let table = self.current();
        let key = spec.key();
        let now = Utc::now();

        let route = match table.get(&key) {
            Some(existing) if existing.backend_type != spec.backend_type => {
                return Err(RoutingError::SwitchRequiresAuthorization {
                    resource_kind: key.resource_kind,
                });
            }
            Some(existing) => ResourceRoute {
                surface_id: spec.surface_id,
                config: normalize_config(spec.config),
                required: spec.required,
                tier: spec.tier,
                health_status: spec.health_status,
                updated_at: now,
                ..existing.clone()
            },
            None => ResourceRoute {
                id: Uuid::new_v4().to_string(),
                resource_kind: spec.resource_kind,
                tenant_id: spec.tenant_id,
                env: spec.env,
                project_id: spec.project_id,
                surface_id: spec.surface_id,
                backend_type: spec.backend_type,
                config: normalize_config(spec.config),
                required: spec.required,
                tier: spec.tier,
                health_status: spec.health_status,
                previous_backend_type: None,
                switch_rationale: None,
                created_at: now,
                updated_at: now,
            },
        };

        self.commit(&table, route.clone(), table.get(&key)).await?;
        info!(
            resource_kind = %route.resource_kind,
            tenant_id = %route.tenant_id,
            env = %route.env,
            backend = %route.backend_type,
            "Route upserted"
        );
        Ok(route)
    }

    /// Move a route to a different backend type.
    ///
    /// The authorizer runs before anything is written. The previous backend
    /// type and the rationale are kept on the route and in its history.
    pub async fn switch_backend(
        &self,
        ctx: &RequestContext,
        key: &RouteKey,
        to: BackendType,
        config: Option<Value>,
        rationale: &str,
        authorizer: &dyn SwitchAuthorizer,
    ) -> Result<ResourceRoute, RoutingError> {
        if rationale.trim().is_empty() {
            return Err(RoutingError::InvalidRoute(
                "a backend switch requires a rationale".into(),
            ));
        }

        let _writer = self.writer.lock().await;
        let table = self.current();
        let existing = table
            .get(key)
            .cloned()
            .ok_or_else(|| RoutingError::RouteNotFound {
                resource_kind: key.resource_kind.clone(),
            })?;

        authorizer
            .authorize_switch(ctx, &existing, to)
            .await
            .map_err(|rejection| RoutingError::SwitchDenied {
                resource_kind: key.resource_kind.clone(),
                rejection,
            })?;

        let config = match config {
            Some(config) if !(config.is_null() || config.is_object()) => {
                return Err(RoutingError::InvalidRoute("config must be an object".into()));
            }
            Some(config) => normalize_config(config),
            None => existing.config.clone(),
        };

        let route = ResourceRoute {
            previous_backend_type: Some(existing.backend_type),
            switch_rationale: Some(rationale.to_string()),
            backend_type: to,
            config,
            updated_at: Utc::now(),
            ..existing.clone()
        };

        self.commit(&table, route.clone(), Some(&existing)).await?;
        info!(
            resource_kind = %route.resource_kind,
            tenant_id = %route.tenant_id,
            from = %existing.backend_type,
            to = %route.backend_type,
            trace_id = ctx.trace_id(),
            "Route backend switched"
        );
        Ok(route)
    }

    /// Persist `route` (archiving `superseded`) and publish a new snapshot.
    /// Caller holds the writer lock.
    async fn commit(
        &self,
        table: &RouteTable,
        route: ResourceRoute,
        superseded: Option<&ResourceRoute>,
    ) -> Result<(), RoutingError> {
        let key = route.key();
        if let Some(backend) = &self.persistence {
            if let Some(old) = superseded {
                let history_key = format!(
                    "{HISTORY_PREFIX}{}#{}",
                    key.storage_key(),
                    old.updated_at.timestamp_nanos_opt().unwrap_or_default()
                );
                backend
                    .put_if_absent(ROUTES_TABLE, &history_key, encode(old)?)
                    .await?;
            }
            backend
                .put(
                    ROUTES_TABLE,
                    &format!("{CURRENT_PREFIX}{}", key.storage_key()),
                    encode(&route)?,
                )
                .await?;
        }

        let mut next = table.clone();
        next.insert(key, route);
        self.publish(next);
        debug!("Routing snapshot published");
        Ok(())
    }

    /// Superseded versions of a route, oldest first. Empty without persistence.
    pub async fn route_history(&self, key: &RouteKey) -> Result<Vec<ResourceRoute>, RoutingError> {
        let Some(backend) = &self.persistence else {
            return Ok(Vec::new());
        };
        let prefix = format!("{HISTORY_PREFIX}{}#", key.storage_key());
        let mut history = backend
            .scan_prefix(ROUTES_TABLE, &prefix)
            .await?
            .into_iter()
            .map(|(_, value)| decode::<ResourceRoute>(value))
            .collect::<Result<Vec<_>, _>>()?;
        history.sort_by_key(|r| r.updated_at);
        Ok(history)
    }
}

fn normalize_config(config: Value) -> Value {
    if config.is_null() {
        Value::Object(Default::default())
    } else {
        config
    }
}
