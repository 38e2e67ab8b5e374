//! `wu release` — give a claim back without completing.
//!
//! Recovery tools use this to free a lane: the WU returns to `ready`, the
//! claim worktree and lane branch are torn down, and the lane lock is
//! dropped.

use tracing::{info, warn};

use lumen_git::GitClient;

use crate::error::LumenError;
use crate::event::{EventPayload, WuEvent};
use crate::model::{lane_branch, WuId, WuStatus};
use crate::projection;
use crate::spec_store::WriteMode;
use crate::transact::TxWrite;

use super::Engine;

impl<G: GitClient> Engine<G> {
    /// Release `id` back to `ready`, recording `reason`.
    ///
    /// # Errors
    /// Fails unless the WU is `in_progress`; transaction failures propagate.
    pub fn release(&self, id: WuId, reason: &str) -> Result<(), LumenError> {
        let mut spec = self.specs().read(id)?;
        if spec.status != WuStatus::InProgress {
            return Err(LumenError::WrongStatus {
                wu_id: id,
                verb: "release",
                expected: "in_progress",
                actual: spec.status,
            });
        }
        let lane = spec.lane.clone();
        let branch = spec
            .claimed_branch
            .clone()
            .unwrap_or_else(|| lane_branch(&lane, id));
        let worktree = self.worktree_abs(&spec);

        spec.status = WuStatus::Ready;
        spec.clear_claim();
        let prepared = self.specs().prepare(&spec, WriteMode::Strict)?;
        let projected = self.projected_specs(Some(&prepared), None)?;
        let event = WuEvent::now(
            id,
            EventPayload::Release {
                reason: reason.to_owned(),
            },
        );

        self.transactor()
            .with_micro_worktree("release", &id.lowercase(), |wt| {
                let mut files = vec![
                    self.specs().stage_write(wt, &prepared)?,
                    self.events().stage_append(wt, &event)?,
                ];
                files.extend(projection::stage_projections(wt, &projected)?);
                Ok(TxWrite {
                    commit_message: format!("chore: release {}", id.lowercase()),
                    files,
                })
            })?;

        self.teardown_claim(id, &branch, worktree.as_deref());
        let _ = self.locks().release(&lane, id)?;
        info!(wu = %id, lane = %lane, reason, "released work unit");
        Ok(())
    }

    /// Remove a claim's worktree and lane branch, best-effort. Failures are
    /// logged, not fatal: the consistency checker picks up leftovers.
    pub(crate) fn teardown_claim(
        &self,
        id: WuId,
        branch: &str,
        worktree: Option<&std::path::Path>,
    ) {
        let root = self.layout().root();
        if let Some(wt) = worktree
            && wt.exists()
            && let Err(e) = self.git().worktree_remove(root, wt, true)
        {
            warn!(wu = %id, worktree = %wt.display(), error = %e, "claim worktree removal failed");
        }
        match self.git().branch_exists(root, branch) {
            Ok(true) => {
                if let Err(e) = self.git().branch_delete(root, branch, true) {
                    warn!(wu = %id, branch, error = %e, "lane branch removal failed");
                }
                if let Err(e) =
                    self.git()
                        .push_delete(root, &self.config().repo.remote, branch)
                {
                    warn!(wu = %id, branch, error = %e, "remote lane branch removal failed");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(wu = %id, branch, error = %e, "lane branch lookup failed"),
        }
    }
}
