//! In-memory reference backend.
//!
//! Deterministic and test-friendly. State lives for the lifetime of the
//! value; production deployments route durable kinds to the filesystem or
//! PostgreSQL backends.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::{BackendType, KvBackend};
use crate::error::{KvError, KvResult};

#[derive(Default)]
pub struct MemoryKv {
    tables: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .map(|guard| guard.get(table).map(BTreeMap::len).unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

fn poisoned() -> KvError {
    KvError::Unavailable("memory backend lock poisoned".to_string())
}

#[async_trait]
impl KvBackend for MemoryKv {
    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    async fn get(&self, table: &str, key: &str) -> KvResult<Option<Value>> {
        let guard = self.tables.read().map_err(|_| poisoned())?;
        Ok(guard.get(table).and_then(|t| t.get(key)).cloned())
    }

    async fn put(&self, table: &str, key: &str, value: Value) -> KvResult<()> {
        let mut guard = self.tables.write().map_err(|_| poisoned())?;
        guard
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn put_if_absent(&self, table: &str, key: &str, value: Value) -> KvResult<bool> {
        let mut guard = self.tables.write().map_err(|_| poisoned())?;
        let table = guard.entry(table.to_string()).or_default();
        if table.contains_key(key) {
            return Ok(false);
        }
        table.insert(key.to_string(), value);
        Ok(true)
    }

    async fn scan_prefix(&self, table: &str, prefix: &str) -> KvResult<Vec<(String, Value)>> {
        let guard = self.tables.read().map_err(|_| poisoned())?;
        let Some(entries) = guard.get(table) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
