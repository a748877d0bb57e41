use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KvError, KvResult};
use crate::filesystem::FilesystemKv;
use crate::memory::MemoryKv;

/// Concrete backend kinds a route can point at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Memory,
    Filesystem,
    Postgres,
}

impl BackendType {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendType::Memory => "memory",
            BackendType::Filesystem => "filesystem",
            BackendType::Postgres => "postgres",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(BackendType::Memory),
            "filesystem" => Ok(BackendType::Filesystem),
            "postgres" => Ok(BackendType::Postgres),
            other => Err(KvError::InvalidConfig(format!(
                "unknown backend type `{other}`"
            ))),
        }
    }
}

/// Storage contract consumed by the routing registry and every store.
#[async_trait]
pub trait KvBackend: Send + Sync {
    fn backend_type(&self) -> BackendType;

    async fn get(&self, table: &str, key: &str) -> KvResult<Option<Value>>;

    /// Unconditional write (create or replace).
    async fn put(&self, table: &str, key: &str, value: Value) -> KvResult<()>;

    /// Atomic create. Returns `false` without writing when the key exists.
    async fn put_if_absent(&self, table: &str, key: &str, value: Value) -> KvResult<bool>;

    /// All entries whose key starts with `prefix`, ordered by key ascending.
    async fn scan_prefix(&self, table: &str, prefix: &str) -> KvResult<Vec<(String, Value)>>;
}

pub fn encode<T: Serialize>(value: &T) -> KvResult<Value> {
    Ok(serde_json::to_value(value)?)
}

pub fn decode<T: DeserializeOwned>(value: Value) -> KvResult<T> {
    Ok(serde_json::from_value(value)?)
}

/// Open a backend of the given type from its route configuration.
///
/// - `memory`: no configuration
/// - `filesystem`: `{"root": "<dir>"}`
/// - `postgres`: `{"url": "...", "max_connections": 10}` (requires the
///   `postgres` feature)
pub async fn open_backend(backend_type: BackendType, config: &Value) -> KvResult<Arc<dyn KvBackend>> {
    match backend_type {
        BackendType::Memory => Ok(Arc::new(MemoryKv::new())),
        BackendType::Filesystem => {
            let root = config
                .get("root")
                .and_then(Value::as_str)
                .ok_or_else(|| KvError::InvalidConfig("filesystem route has no `root`".into()))?;
            Ok(Arc::new(FilesystemKv::open(root).await?))
        }
        BackendType::Postgres => open_postgres(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(config: &Value) -> KvResult<Arc<dyn KvBackend>> {
    let url = config
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| KvError::InvalidConfig("postgres route has no `url`".into()))?;
    let max_connections = config
        .get("max_connections")
        .and_then(Value::as_u64)
        .unwrap_or(10) as u32;
    let backend = crate::postgres::PostgresKv::connect_with_options(url, max_connections, 5).await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_config: &Value) -> KvResult<Arc<dyn KvBackend>> {
    Err(KvError::InvalidConfig(
        "postgres backend requires the `postgres` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_type_round_trips_tags() {
        for ty in [BackendType::Memory, BackendType::Filesystem, BackendType::Postgres] {
            assert_eq!(ty.as_str().parse::<BackendType>().unwrap(), ty);
        }
        assert!("firestore".parse::<BackendType>().is_err());
    }

    #[tokio::test]
    async fn filesystem_requires_root() {
        let err = open_backend(BackendType::Filesystem, &serde_json::json!({}))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, KvError::InvalidConfig(_)));
    }
}
