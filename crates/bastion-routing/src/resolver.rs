use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bastion_kv::{open_backend, BackendType, KvBackend, KvResult, TimeoutBackend};
use bastion_types::RequestContext;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::RoutingError;
use crate::registry::RoutingRegistry;

/// Opens a backend instance for a route's type and config.
#[async_trait]
pub trait BackendOpener: Send + Sync {
    async fn open(&self, backend_type: BackendType, config: &Value) -> KvResult<Arc<dyn KvBackend>>;
}

/// Opens backends with [`bastion_kv::open_backend`].
pub struct DefaultOpener;

#[async_trait]
impl BackendOpener for DefaultOpener {
    async fn open(&self, backend_type: BackendType, config: &Value) -> KvResult<Arc<dyn KvBackend>> {
        open_backend(backend_type, config).await
    }
}

type Slot = Arc<OnceCell<Arc<dyn KvBackend>>>;

/// Turns a resource kind and request scope into a live backend handle.
///
/// Each distinct `(backend type, config)` pair is opened once and shared.
/// Concurrent first callers for the same pair wait on the same open.
pub struct BackendResolver {
    registry: Arc<RoutingRegistry>,
    default_backend: Arc<dyn KvBackend>,
    call_timeout: Option<Duration>,
    opener: Arc<dyn BackendOpener>,
    instances: DashMap<String, Slot>,
}

impl BackendResolver {
    pub fn new(registry: Arc<RoutingRegistry>, default_backend: Arc<dyn KvBackend>) -> Self {
        Self {
            registry,
            default_backend,
            call_timeout: None,
            opener: Arc::new(DefaultOpener),
            instances: DashMap::new(),
        }
    }

    /// Bound every call on routed backends by `timeout`.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_opener(mut self, opener: Arc<dyn BackendOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn registry(&self) -> &Arc<RoutingRegistry> {
        &self.registry
    }

    /// Pre-seed the instance for `(backend_type, config)` instead of opening it.
    pub fn register_backend(&self, backend_type: BackendType, config: &Value, backend: Arc<dyn KvBackend>) {
        let cell = OnceCell::new_with(Some(self.wrap(backend)));
        self.instances
            .insert(instance_key(backend_type, config), Arc::new(cell));
    }

    /// Backend for `resource_kind` under the request's tenant, env and project.
    ///
    /// Unrouted optional kinds use the default backend. Unrouted required
    /// kinds fail with `{kind}.missing_route`.
    pub async fn resolve(
        &self,
        resource_kind: &str,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn KvBackend>, RoutingError> {
        let route = self.registry.resolve(
            resource_kind,
            ctx.tenant_id().as_str(),
            ctx.env(),
            Some(ctx.project_id()),
        )?;

        let Some(route) = route else {
            debug!(resource_kind, "No route, using default backend");
            return Ok(Arc::clone(&self.default_backend));
        };

        let slot = self
            .instances
            .entry(instance_key(route.backend_type, &route.config))
            .or_default()
            .clone();

        let backend = slot
            .get_or_try_init(|| async {
                let opened = self.opener.open(route.backend_type, &route.config).await?;
                info!(
                    resource_kind,
                    backend = %route.backend_type,
                    "Opened routed backend"
                );
                Ok::<_, RoutingError>(self.wrap(opened))
            })
            .await?;
        Ok(Arc::clone(backend))
    }

    fn wrap(&self, backend: Arc<dyn KvBackend>) -> Arc<dyn KvBackend> {
        match self.call_timeout {
            Some(deadline) => Arc::new(TimeoutBackend::new(backend, deadline)),
            None => backend,
        }
    }
}

fn instance_key(backend_type: BackendType, config: &Value) -> String {
    format!("{backend_type}|{config}")
}
