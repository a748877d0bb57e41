use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::backend::{BackendType, KvBackend};
use crate::error::{KvError, KvResult};

/// Bounds every call on the wrapped backend by a deadline.
///
/// An elapsed deadline is reported as [`KvError::Timeout`], which renders as
/// `backend_unavailable`. For writes the outcome is unknown: the caller must
/// re-read before retrying.
pub struct TimeoutBackend {
    inner: Arc<dyn KvBackend>,
    deadline: Duration,
}

impl TimeoutBackend {
    pub fn new(inner: Arc<dyn KvBackend>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(&self, op: &'static str, fut: impl Future<Output = KvResult<T>> + Send) -> KvResult<T> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    op,
                    backend = %self.inner.backend_type(),
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Backend call timed out"
                );
                Err(KvError::Timeout(self.deadline))
            }
        }
    }
}

#[async_trait]
impl KvBackend for TimeoutBackend {
    fn backend_type(&self) -> BackendType {
        self.inner.backend_type()
    }

    async fn get(&self, table: &str, key: &str) -> KvResult<Option<Value>> {
        self.bounded("get", self.inner.get(table, key)).await
    }

    async fn put(&self, table: &str, key: &str, value: Value) -> KvResult<()> {
        self.bounded("put", self.inner.put(table, key, value)).await
    }

    async fn put_if_absent(&self, table: &str, key: &str, value: Value) -> KvResult<bool> {
        self.bounded("put_if_absent", self.inner.put_if_absent(table, key, value))
            .await
    }

    async fn scan_prefix(&self, table: &str, prefix: &str) -> KvResult<Vec<(String, Value)>> {
        self.bounded("scan_prefix", self.inner.scan_prefix(table, prefix))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKv;
    use bastion_types::{ErrorKind, ToEnvelope};

    /// Backend whose reads never complete.
    struct Stalled;

    #[async_trait]
    impl KvBackend for Stalled {
        fn backend_type(&self) -> BackendType {
            BackendType::Memory
        }

        async fn get(&self, _table: &str, _key: &str) -> KvResult<Option<Value>> {
            std::future::pending().await
        }

        async fn put(&self, _table: &str, _key: &str, _value: Value) -> KvResult<()> {
            Ok(())
        }

        async fn put_if_absent(&self, _table: &str, _key: &str, _value: Value) -> KvResult<bool> {
            Ok(true)
        }

        async fn scan_prefix(&self, _table: &str, _prefix: &str) -> KvResult<Vec<(String, Value)>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn stalled_call_surfaces_as_backend_unavailable() {
        let backend = TimeoutBackend::new(Arc::new(Stalled), Duration::from_millis(20));
        let err = backend.get("t", "k").await.unwrap_err();
        assert!(matches!(err, KvError::Timeout(_)));
        let envelope = err.to_envelope();
        assert_eq!(envelope.kind, ErrorKind::BackendUnavailable);
        assert_eq!(envelope.code, "backend_unavailable");
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let backend = TimeoutBackend::new(Arc::new(MemoryKv::new()), Duration::from_secs(1));
        backend.put("t", "k", Value::from(3)).await.unwrap();
        assert_eq!(backend.get("t", "k").await.unwrap(), Some(Value::from(3)));
        assert_eq!(backend.backend_type(), BackendType::Memory);
    }
}
