//! Canvas collaboration: gate first, then the revisioned append.

use std::sync::Arc;

use bastion_canvas::{AppendCommand, CanvasCommand, CanvasCommandStore};
use bastion_gate::GateChain;
use bastion_types::RequestContext;
use tracing::{debug, info};

use crate::error::RuntimeError;

const CANVAS_SUBJECT: &str = "canvas";

#[derive(Clone, Debug, PartialEq)]
pub enum AppendOutcome {
    /// The command was accepted at a new revision.
    Applied(CanvasCommand),
    /// The idempotency key was already used; this is the command it produced.
    Replayed(CanvasCommand),
}

impl AppendOutcome {
    pub fn command(&self) -> &CanvasCommand {
        match self {
            AppendOutcome::Applied(cmd) | AppendOutcome::Replayed(cmd) => cmd,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, AppendOutcome::Replayed(_))
    }
}

pub struct CanvasCollaboration {
    gate: Arc<GateChain>,
    store: Arc<CanvasCommandStore>,
    skip_metrics: bool,
}

impl CanvasCollaboration {
    pub fn new(gate: Arc<GateChain>, store: Arc<CanvasCommandStore>, skip_metrics: bool) -> Self {
        Self {
            gate,
            store,
            skip_metrics,
        }
    }

    /// Append `cmd` once the gate chain admits `canvas:{command_type}`.
    ///
    /// A retried request whose idempotency key already produced a command
    /// gets that command back without re-running the gate or appending.
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        surface: &str,
        cmd: AppendCommand,
    ) -> Result<AppendOutcome, RuntimeError> {
        if let Some(key) = cmd.idempotency_key.as_deref() {
            if let Some(record) = self.store.check_idempotency(ctx, &cmd.canvas_id, key).await? {
                if let Some(prior) = self.command_at(ctx, &cmd.canvas_id, record.revision).await? {
                    debug!(
                        canvas_id = %cmd.canvas_id,
                        idempotency_key = key,
                        revision = record.revision,
                        "Replaying idempotent canvas command"
                    );
                    return Ok(AppendOutcome::Replayed(prior));
                }
            }
        }

        let action = format!("canvas:{}", cmd.command_type);
        let report = self
            .gate
            .run(ctx, &action, surface, CANVAS_SUBJECT, Some(&cmd.canvas_id), self.skip_metrics)
            .await?;

        let command = self.store.append_command(ctx, cmd).await?;
        self.gate.commit(ctx, &report).await;
        info!(
            canvas_id = %command.canvas_id,
            revision = command.revision,
            command_type = %command.command_type,
            "Canvas command applied"
        );
        Ok(AppendOutcome::Applied(command))
    }

    pub async fn head(&self, ctx: &RequestContext, canvas_id: &str) -> Result<u64, RuntimeError> {
        Ok(self.store.get_head_revision(ctx, canvas_id).await?)
    }

    /// Commands after `since_rev`, ascending.
    pub async fn history(
        &self,
        ctx: &RequestContext,
        canvas_id: &str,
        since_rev: u64,
    ) -> Result<Vec<CanvasCommand>, RuntimeError> {
        Ok(self.store.list_commands_since(ctx, canvas_id, since_rev).await?)
    }

    async fn command_at(
        &self,
        ctx: &RequestContext,
        canvas_id: &str,
        revision: u64,
    ) -> Result<Option<CanvasCommand>, RuntimeError> {
        Ok(self
            .store
            .list_commands_since(ctx, canvas_id, revision.saturating_sub(1))
            .await?
            .into_iter()
            .find(|c| c.revision == revision))
    }
}
