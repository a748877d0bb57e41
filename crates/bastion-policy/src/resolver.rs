//! Ordered fallback resolution.
//!
//! Policy values that can come from several places (surface record, tenant
//! record, process default) are looked up through a [`ResolverChain`]. The
//! chain evaluates its resolvers in insertion order; the order is the
//! precedence.

use async_trait::async_trait;
use bastion_types::RequestContext;

use crate::error::PolicyError;

/// One source of a policy value.
#[async_trait]
pub trait Resolver<T>: Send + Sync {
    /// Stable name, reported as the value's source.
    fn name(&self) -> &'static str;

    async fn resolve(&self, ctx: &RequestContext, surface: &str) -> Result<Option<T>, PolicyError>;
}

/// A fixed value, typically the process-wide default from configuration.
pub struct StaticResolver<T> {
    name: &'static str,
    value: Option<T>,
}

impl<T> StaticResolver<T> {
    pub fn new(name: &'static str, value: Option<T>) -> Self {
        Self { name, value }
    }
}

#[async_trait]
impl<T> Resolver<T> for StaticResolver<T>
where
    T: Clone + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    async fn resolve(&self, _ctx: &RequestContext, _surface: &str) -> Result<Option<T>, PolicyError> {
        Ok(self.value.clone())
    }
}

/// Resolvers in precedence order.
pub struct ResolverChain<T> {
    resolvers: Vec<Box<dyn Resolver<T>>>,
}

impl<T> Default for ResolverChain<T> {
    fn default() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }
}

impl<T: Send> ResolverChain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver with lower precedence than every existing one.
    pub fn then(mut self, resolver: impl Resolver<T> + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// First value found, with the name of the resolver that produced it.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        surface: &str,
    ) -> Result<Option<(T, &'static str)>, PolicyError> {
        for resolver in &self.resolvers {
            if let Some(value) = resolver.resolve(ctx, surface).await? {
                return Ok(Some((value, resolver.name())));
            }
        }
        Ok(None)
    }

    /// Every value found, in precedence order.
    pub async fn resolve_all(
        &self,
        ctx: &RequestContext,
        surface: &str,
    ) -> Result<Vec<(T, &'static str)>, PolicyError> {
        let mut found = Vec::new();
        for resolver in &self.resolvers {
            if let Some(value) = resolver.resolve(ctx, surface).await? {
                found.push((value, resolver.name()));
            }
        }
        Ok(found)
    }
}
