//! `wu spawn` — create a delegated child WU under a parent.
//!
//! The child spec is created exactly like `wu create`; the same
//! transaction additionally appends a `delegation` event linking it to the
//! parent. Prompt/skill expansion for the sub-agent happens outside the
//! engine; the engine only records the relationship.

use rand::Rng;
use tracing::info;

use lumen_git::GitClient;

use crate::error::LumenError;
use crate::event::{EventPayload, WuEvent};
use crate::model::WuId;
use crate::projection;
use crate::transact::TxWrite;

use super::{CreateRequest, Engine};

impl<G: GitClient> Engine<G> {
    /// Spawn a child of `parent` from `req`. Returns the child ID and the
    /// spawn identifier recorded in the delegation event.
    ///
    /// # Errors
    /// The parent must exist; otherwise as `create`.
    pub fn spawn(&self, parent: WuId, req: &CreateRequest) -> Result<(WuId, String), LumenError> {
        if !self.specs().exists(parent) {
            return Err(LumenError::WuNotFound { wu_id: parent });
        }
        let child = self.create_with(req, |engine, child_id, worktree, files| {
            let spawn_id = format!("spawn-{}", spawn_nonce());
            let event = WuEvent::now(
                child_id,
                EventPayload::Delegation {
                    parent_wu_id: parent,
                    spawn_id: spawn_id.clone(),
                },
            );
            files.push(engine.events().stage_append(worktree, &event)?);
            Ok(spawn_id)
        })?;
        info!(parent = %parent, child = %child.0, spawn = %child.1, "spawned delegated work unit");
        Ok(child)
    }

    /// `create` with an extra staging hook in the same transaction.
    fn create_with<T>(
        &self,
        req: &CreateRequest,
        extra: impl FnOnce(&Self, WuId, &std::path::Path, &mut Vec<std::path::PathBuf>) -> Result<T, LumenError>,
    ) -> Result<(WuId, T), LumenError> {
        // Build the child exactly as `create` would, then run one combined
        // transaction.
        let id = self.reserve_id(req)?;
        let spec = self.build_spec(req, id)?;
        let projected = self.projected_specs(Some(&spec), None)?;
        let mut extra_out = None;
        self.transactor()
            .with_micro_worktree("spawn", &id.lowercase(), |worktree| {
                let mut files = vec![self.specs().stage_write(worktree, &spec)?];
                extra_out = Some(extra(self, id, worktree, &mut files)?);
                files.extend(projection::stage_projections(worktree, &projected)?);
                Ok(TxWrite {
                    commit_message: format!("docs: spawn {} for {}", id.lowercase(), spec.title),
                    files,
                })
            })?;
        let out = extra_out.ok_or_else(|| LumenError::Internal {
            detail: "spawn transaction closure did not run".to_owned(),
        })?;
        Ok((id, out))
    }
}

fn spawn_nonce() -> String {
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(8)
        .map(|b| char::from(b.to_ascii_lowercase()))
        .collect()
}
