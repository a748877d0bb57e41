//! Test doubles for assembling chains without policy data.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bastion_kv::{BackendType, KvBackend, KvError, KvResult};
use bastion_policy::PolicyError;
use bastion_types::RequestContext;
use serde_json::Value;

use crate::context::{GateReport, GateRequest};
use crate::traits::{Gate, GateKind};

/// Gate that counts its evaluations and either passes or rejects.
pub struct MockGate {
    kind: GateKind,
    calls: Arc<AtomicUsize>,
    reject: Option<fn(&GateRequest) -> PolicyError>,
}

impl MockGate {
    pub fn passing(kind: GateKind) -> Self {
        Self {
            kind,
            calls: Arc::new(AtomicUsize::new(0)),
            reject: None,
        }
    }

    pub fn rejecting(kind: GateKind, reject: fn(&GateRequest) -> PolicyError) -> Self {
        Self {
            kind,
            calls: Arc::new(AtomicUsize::new(0)),
            reject: Some(reject),
        }
    }

    /// Shared handle on the evaluation counter.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// One passing gate per required kind, with their counters.
    pub fn full_chain() -> (Vec<Arc<dyn Gate>>, Vec<Arc<AtomicUsize>>) {
        GateKind::REQUIRED
            .into_iter()
            .map(|kind| {
                let gate = MockGate::passing(kind);
                let counter = gate.counter();
                (Arc::new(gate) as Arc<dyn Gate>, counter)
            })
            .unzip()
    }
}

#[async_trait]
impl Gate for MockGate {
    fn kind(&self) -> GateKind {
        self.kind
    }

    async fn evaluate(
        &self,
        _ctx: &RequestContext,
        request: &GateRequest,
        _report: &mut GateReport,
    ) -> Result<(), PolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.reject {
            Some(reject) => Err(reject(request)),
            None => Ok(()),
        }
    }
}

/// Backend whose every call fails as unavailable.
pub struct UnavailableKv;

#[async_trait]
impl KvBackend for UnavailableKv {
    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }

    async fn get(&self, _table: &str, _key: &str) -> KvResult<Option<Value>> {
        Err(KvError::Unavailable("mock backend is down".into()))
    }

    async fn put(&self, _table: &str, _key: &str, _value: Value) -> KvResult<()> {
        Err(KvError::Unavailable("mock backend is down".into()))
    }

    async fn put_if_absent(&self, _table: &str, _key: &str, _value: Value) -> KvResult<bool> {
        Err(KvError::Unavailable("mock backend is down".into()))
    }

    async fn scan_prefix(&self, _table: &str, _prefix: &str) -> KvResult<Vec<(String, Value)>> {
        Err(KvError::Unavailable("mock backend is down".into()))
    }
}
