//! `wu block` / `wu unblock` — park a claim without giving up the lane.
//!
//! A blocked WU keeps its lane lock, worktree, and branch: it occupies the
//! WIP slot until unblocked or released.

use tracing::info;

use lumen_git::GitClient;

use crate::error::LumenError;
use crate::event::{EventPayload, WuEvent};
use crate::model::{WuId, WuStatus};
use crate::projection;
use crate::spec_store::WriteMode;
use crate::transact::TxWrite;

use super::Engine;

/// Inputs for `wu block`.
#[derive(Clone, Debug)]
pub struct BlockRequest {
    /// The WU to block.
    pub id: WuId,
    /// What it is waiting on.
    pub reason: String,
}

/// Inputs for `wu unblock`.
#[derive(Clone, Debug)]
pub struct UnblockRequest {
    /// The WU to unblock.
    pub id: WuId,
}

impl<G: GitClient> Engine<G> {
    /// Block an `in_progress` WU.
    ///
    /// # Errors
    /// Fails from any other status; transaction failures propagate.
    pub fn block(&self, req: &BlockRequest) -> Result<(), LumenError> {
        let spec = self.specs().read(req.id)?;
        if spec.status != WuStatus::InProgress {
            return Err(LumenError::WrongStatus {
                wu_id: req.id,
                verb: "block",
                expected: "in_progress",
                actual: spec.status,
            });
        }
        self.shift_status(
            spec,
            WuStatus::Blocked,
            WuEvent::now(
                req.id,
                EventPayload::Block {
                    reason: req.reason.clone(),
                },
            ),
            "block",
        )?;
        info!(wu = %req.id, reason = %req.reason, "blocked work unit");
        Ok(())
    }

    /// Unblock a `blocked` WU back to `in_progress`.
    ///
    /// # Errors
    /// Fails from any other status; transaction failures propagate.
    pub fn unblock(&self, req: &UnblockRequest) -> Result<(), LumenError> {
        let spec = self.specs().read(req.id)?;
        if spec.status != WuStatus::Blocked {
            return Err(LumenError::WrongStatus {
                wu_id: req.id,
                verb: "unblock",
                expected: "blocked",
                actual: spec.status,
            });
        }
        self.shift_status(
            spec,
            WuStatus::InProgress,
            WuEvent::now(req.id, EventPayload::Unblock),
            "unblock",
        )?;
        info!(wu = %req.id, "unblocked work unit");
        Ok(())
    }

    /// Shared body: flip the status field, append the event, regenerate
    /// projections. No worktree, branch, or lock changes.
    fn shift_status(
        &self,
        mut spec: crate::wu::WuSpec,
        to: WuStatus,
        event: WuEvent,
        verb: &str,
    ) -> Result<(), LumenError> {
        let id = spec.id;
        spec.status = to;
        let prepared = self.specs().prepare(&spec, WriteMode::Strict)?;
        let projected = self.projected_specs(Some(&prepared), None)?;

        self.transactor()
            .with_micro_worktree(verb, &id.lowercase(), |wt| {
                let mut files = vec![
                    self.specs().stage_write(wt, &prepared)?,
                    self.events().stage_append(wt, &event)?,
                ];
                files.extend(projection::stage_projections(wt, &projected)?);
                Ok(TxWrite {
                    commit_message: format!("chore: {verb} {}", id.lowercase()),
                    files,
                })
            })
    }
}
