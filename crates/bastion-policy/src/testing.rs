use std::sync::Arc;

use bastion_kv::MemoryKv;
use bastion_routing::{BackendResolver, RoutingRegistry};
use bastion_types::RequestContext;

pub(crate) fn resolver() -> Arc<BackendResolver> {
    Arc::new(BackendResolver::new(
        Arc::new(RoutingRegistry::in_memory()),
        Arc::new(MemoryKv::new()),
    ))
}

pub(crate) fn ctx() -> RequestContext {
    RequestContext::builder("t_demo", "saas", "dev", "p1")
        .surface("nexus")
        .user("u1")
        .build()
        .unwrap()
}
