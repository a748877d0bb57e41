use std::sync::Arc;

use bastion_kv::{decode, encode, KeyedLocks, KvBackend};
use bastion_routing::BackendResolver;
use bastion_types::scope::{check_segment, KEY_SEPARATOR};
use bastion_types::RequestContext;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CanvasError;
use crate::model::{AppendCommand, CanvasCommand, CanvasHead, IdempotencyRecord};

/// Resource kind the command log is routed under.
pub const CANVAS_RESOURCE_KIND: &str = "canvas_commands";

const TABLE: &str = "canvas_commands";

/// Compare-and-swap command log, one revision chain per canvas.
///
/// The command entry written with `put_if_absent` is the commit point. The
/// head pointer is advanced afterwards; a reader that finds entries past the
/// pointer (an append cancelled between the two writes) counts them.
pub struct CanvasCommandStore {
    resolver: Arc<BackendResolver>,
    locks: KeyedLocks,
}

struct CanvasKeys {
    head: String,
    commands: String,
    idem: String,
}

impl CanvasKeys {
    fn new(ctx: &RequestContext, canvas_id: &str) -> Self {
        let prefix = ctx.tenant_prefix();
        Self {
            head: format!("{prefix}#head#{canvas_id}"),
            commands: format!("{prefix}#command#{canvas_id}#rev#"),
            idem: format!("{prefix}#idem#{canvas_id}#"),
        }
    }

    fn command(&self, revision: u64) -> String {
        format!("{}{revision:010}", self.commands)
    }

    fn idempotency(&self, key: &str) -> String {
        format!("{}{key}", self.idem)
    }
}

impl CanvasCommandStore {
    pub fn new(resolver: Arc<BackendResolver>) -> Self {
        Self {
            resolver,
            locks: KeyedLocks::new(),
        }
    }

    /// Newest accepted revision, 0 for an empty canvas.
    pub async fn get_head_revision(&self, ctx: &RequestContext, canvas_id: &str) -> Result<u64, CanvasError> {
        validate_id("canvas_id", canvas_id)?;
        let backend = self.backend(ctx).await?;
        let keys = CanvasKeys::new(ctx, canvas_id);
        current_head(&*backend, &keys).await
    }

    /// What `idempotency_key` produced on this canvas, if it was used before.
    pub async fn check_idempotency(
        &self,
        ctx: &RequestContext,
        canvas_id: &str,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>, CanvasError> {
        validate_id("canvas_id", canvas_id)?;
        validate_id("idempotency_key", idempotency_key)?;
        let backend = self.backend(ctx).await?;
        let keys = CanvasKeys::new(ctx, canvas_id);
        match backend.get(TABLE, &keys.idempotency(idempotency_key)).await? {
            Some(value) => Ok(Some(decode(value)?)),
            None => Ok(None),
        }
    }

    /// Accept `cmd` at `base_rev + 1` if `base_rev` is the current head.
    pub async fn append_command(
        &self,
        ctx: &RequestContext,
        cmd: AppendCommand,
    ) -> Result<CanvasCommand, CanvasError> {
        validate_id("canvas_id", &cmd.canvas_id)?;
        if cmd.command_id.trim().is_empty() {
            return Err(CanvasError::InvalidInput("command_id is required".into()));
        }
        if cmd.command_type.trim().is_empty() {
            return Err(CanvasError::InvalidInput("command_type is required".into()));
        }
        if let Some(key) = cmd.idempotency_key.as_deref() {
            validate_id("idempotency_key", key)?;
        }

        let backend = self.backend(ctx).await?;
        let keys = CanvasKeys::new(ctx, &cmd.canvas_id);
        let _guard = self.locks.lock(&keys.head).await;

        let head = current_head(&*backend, &keys).await?;
        if cmd.base_rev != head {
            debug!(
                canvas_id = %cmd.canvas_id,
                base_rev = cmd.base_rev,
                head_rev = head,
                "Rejecting stale canvas command"
            );
            return Err(CanvasError::BaseRevMismatch {
                canvas_id: cmd.canvas_id,
                expected: cmd.base_rev,
                actual: head,
            });
        }

        let now = Utc::now();
        let command = CanvasCommand {
            canvas_id: cmd.canvas_id.clone(),
            command_id: cmd.command_id,
            revision: head + 1,
            command_type: cmd.command_type,
            command_args: cmd.command_args,
            event_id: Uuid::new_v4().to_string(),
            timestamp: now,
            user_id: cmd.user_id,
            base_rev: cmd.base_rev,
        };

        let committed = backend
            .put_if_absent(TABLE, &keys.command(command.revision), encode(&command)?)
            .await?;
        if !committed {
            // Another process took this revision after our head read.
            warn!(
                canvas_id = %command.canvas_id,
                revision = command.revision,
                "Revision already taken by a concurrent writer"
            );
            return Err(CanvasError::BaseRevMismatch {
                canvas_id: command.canvas_id,
                expected: cmd.base_rev,
                actual: command.revision,
            });
        }

        if let Some(key) = cmd.idempotency_key {
            let record = IdempotencyRecord {
                canvas_id: command.canvas_id.clone(),
                idempotency_key: key.clone(),
                command_id: command.command_id.clone(),
                revision: command.revision,
                event_id: command.event_id.clone(),
                recorded_at: now,
            };
            let fresh = backend
                .put_if_absent(TABLE, &keys.idempotency(&key), encode(&record)?)
                .await?;
            if !fresh {
                warn!(
                    canvas_id = %command.canvas_id,
                    idempotency_key = %key,
                    revision = command.revision,
                    "Idempotency key reused; keeping the first mapping"
                );
            }
        }

        let head = CanvasHead {
            canvas_id: command.canvas_id.clone(),
            head_rev: command.revision,
            updated_at: now,
        };
        backend.put(TABLE, &keys.head, encode(&head)?).await?;

        info!(
            canvas_id = %command.canvas_id,
            revision = command.revision,
            command_type = %command.command_type,
            event_id = %command.event_id,
            trace_id = ctx.trace_id(),
            "Canvas command appended"
        );
        Ok(command)
    }

    /// Commands with `revision > since_rev`, ascending.
    pub async fn list_commands_since(
        &self,
        ctx: &RequestContext,
        canvas_id: &str,
        since_rev: u64,
    ) -> Result<Vec<CanvasCommand>, CanvasError> {
        validate_id("canvas_id", canvas_id)?;
        let backend = self.backend(ctx).await?;
        let keys = CanvasKeys::new(ctx, canvas_id);

        let mut commands = Vec::new();
        for (_, value) in backend.scan_prefix(TABLE, &keys.commands).await? {
            let command: CanvasCommand = decode(value)?;
            if command.revision > since_rev {
                commands.push(command);
            }
        }
        commands.sort_by_key(|c| c.revision);
        Ok(commands)
    }

    async fn backend(&self, ctx: &RequestContext) -> Result<Arc<dyn KvBackend>, CanvasError> {
        Ok(self.resolver.resolve(CANVAS_RESOURCE_KIND, ctx).await?)
    }
}

/// Head pointer, advanced past any committed entries it has not caught up with.
async fn current_head(backend: &dyn KvBackend, keys: &CanvasKeys) -> Result<u64, CanvasError> {
    let mut head = match backend.get(TABLE, &keys.head).await? {
        Some(value) => decode::<CanvasHead>(value)?.head_rev,
        None => 0,
    };
    while backend.get(TABLE, &keys.command(head + 1)).await?.is_some() {
        head += 1;
    }
    Ok(head)
}

fn validate_id(field: &'static str, value: &str) -> Result<(), CanvasError> {
    if value.trim().is_empty() {
        return Err(CanvasError::InvalidInput(format!("{field} is required")));
    }
    check_segment(field, value)
        .map_err(|_| CanvasError::InvalidInput(format!("{field} must not contain '{KEY_SEPARATOR}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_kv::MemoryKv;
    use bastion_routing::RoutingRegistry;
    use bastion_types::ToEnvelope;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::builder("t_demo", "saas", "dev", "p1")
            .user("u1")
            .build()
            .unwrap()
    }

    fn store_on(backend: Arc<MemoryKv>) -> CanvasCommandStore {
        let resolver = BackendResolver::new(Arc::new(RoutingRegistry::in_memory()), backend);
        CanvasCommandStore::new(Arc::new(resolver))
    }

    fn cmd(id: &str, base_rev: u64) -> AppendCommand {
        AppendCommand::new("c1", id, base_rev, "move_node", json!({"node": "n1", "x": 4}), "u1")
    }

    #[tokio::test]
    async fn empty_canvas_has_revision_zero() {
        let store = store_on(Arc::new(MemoryKv::new()));
        assert_eq!(store.get_head_revision(&ctx(), "c1").await.unwrap(), 0);
        assert!(store.list_commands_since(&ctx(), "c1", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_follow_layout() {
        let backend = Arc::new(MemoryKv::new());
        let store = store_on(Arc::clone(&backend));
        store
            .append_command(&ctx(), cmd("cmd1", 0).with_idempotency_key("k1"))
            .await
            .unwrap();

        let keys: Vec<String> = backend
            .scan_prefix(TABLE, "")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec![
                "t_demo#saas#dev#command#c1#rev#0000000001".to_string(),
                "t_demo#saas#dev#head#c1".to_string(),
                "t_demo#saas#dev#idem#c1#k1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn stale_base_rev_is_rejected_with_details() {
        let store = store_on(Arc::new(MemoryKv::new()));
        store.append_command(&ctx(), cmd("cmd1", 0)).await.unwrap();
        let err = store.append_command(&ctx(), cmd("cmd2", 0)).await.unwrap_err();

        let envelope = err.to_envelope();
        assert_eq!(envelope.code, "base_rev_mismatch");
        assert_eq!(envelope.http_status, 409);
        assert_eq!(envelope.details["expected"], 0);
        assert_eq!(envelope.details["actual"], 1);
        assert_eq!(store.get_head_revision(&ctx(), "c1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_since_is_exclusive_and_ordered() {
        let store = store_on(Arc::new(MemoryKv::new()));
        for rev in 0..5 {
            store
                .append_command(&ctx(), cmd(&format!("cmd{rev}"), rev))
                .await
                .unwrap();
        }
        let revisions: Vec<u64> = store
            .list_commands_since(&ctx(), "c1", 2)
            .await
            .unwrap()
            .iter()
            .map(|c| c.revision)
            .collect();
        assert_eq!(revisions, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn idempotency_key_maps_to_first_result() {
        let store = store_on(Arc::new(MemoryKv::new()));
        let first = store
            .append_command(&ctx(), cmd("cmd1", 0).with_idempotency_key("retry-1"))
            .await
            .unwrap();

        let seen = store
            .check_idempotency(&ctx(), "c1", "retry-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.command_id, "cmd1");
        assert_eq!(seen.revision, first.revision);
        assert_eq!(seen.event_id, first.event_id);
        assert!(store
            .check_idempotency(&ctx(), "c1", "other")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn entry_past_head_pointer_counts_as_committed() {
        let backend = Arc::new(MemoryKv::new());
        let store = store_on(Arc::clone(&backend));
        store.append_command(&ctx(), cmd("cmd1", 0)).await.unwrap();

        // Simulate an append interrupted after its commit point.
        let orphan = CanvasCommand {
            revision: 2,
            base_rev: 1,
            ..store.list_commands_since(&ctx(), "c1", 0).await.unwrap()[0].clone()
        };
        backend
            .put(
                TABLE,
                "t_demo#saas#dev#command#c1#rev#0000000002",
                encode(&orphan).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(store.get_head_revision(&ctx(), "c1").await.unwrap(), 2);
        let err = store.append_command(&ctx(), cmd("cmd3", 1)).await.unwrap_err();
        assert!(matches!(err, CanvasError::BaseRevMismatch { actual: 2, .. }));
        store.append_command(&ctx(), cmd("cmd3", 2)).await.unwrap();
    }

    #[tokio::test]
    async fn canvases_are_tenant_isolated() {
        let backend = Arc::new(MemoryKv::new());
        let store = store_on(backend);
        store.append_command(&ctx(), cmd("cmd1", 0)).await.unwrap();

        let other = RequestContext::builder("t_other", "saas", "dev", "p1")
            .build()
            .unwrap();
        assert_eq!(store.get_head_revision(&other, "c1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_ids_are_rejected() {
        let store = store_on(Arc::new(MemoryKv::new()));
        let err = store
            .append_command(&ctx(), AppendCommand::new("c#1", "x", 0, "move_node", json!({}), "u1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_envelope().code, "canvas.invalid_input");
    }

    #[tokio::test]
    async fn concurrent_same_base_rev_has_one_winner() {
        let store = Arc::new(store_on(Arc::new(MemoryKv::new())));
        let appends = (0..8).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.append_command(&ctx(), cmd(&format!("cmd{i}"), 0)).await })
        });
        let results: Vec<_> = futures::future::join_all(appends)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(CanvasError::BaseRevMismatch { .. })))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store.get_head_revision(&ctx(), "c1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn different_canvases_append_independently() {
        let store = Arc::new(store_on(Arc::new(MemoryKv::new())));
        let appends = (0..6).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let append = AppendCommand::new(format!("canvas{i}"), "cmd1", 0, "add_node", json!({}), "u1");
                store.append_command(&ctx(), append).await
            })
        });
        for result in futures::future::join_all(appends).await {
            assert_eq!(result.unwrap().unwrap().revision, 1);
        }
    }
}
