//! `wu complete` — land a claim on the shared branch and close the WU.
//!
//! The lane branch is merged fast-forward-only (with the transactor's
//! rebase-retry), then one transaction writes the done spec, the stamp, the
//! `complete` event, and the regenerated projections. Lane resources are
//! torn down afterwards; the owning initiative's phase/status is recomputed
//! in the same transaction.

use chrono::{SecondsFormat, Utc};
use tracing::info;

use lumen_git::GitClient;

use crate::error::LumenError;
use crate::event::{EventPayload, WuEvent};
use crate::model::{lane_branch, WuId, WuStatus};
use crate::projection;
use crate::spec_store::WriteMode;
use crate::transact::TxWrite;

use super::Engine;

impl<G: GitClient> Engine<G> {
    /// Complete an `in_progress` WU. External gates (tests, review) are the
    /// caller's responsibility.
    ///
    /// # Errors
    /// Fails from `blocked` (unblock first) or any other non-claimed
    /// status; merge conflicts and retry exhaustion propagate.
    pub fn complete(&self, id: WuId) -> Result<(), LumenError> {
        let claimed = self.specs().read(id)?;
        if claimed.status != WuStatus::InProgress {
            return Err(LumenError::WrongStatus {
                wu_id: id,
                verb: "complete",
                expected: "in_progress",
                actual: claimed.status,
            });
        }
        let lane = claimed.lane.clone();
        let branch = claimed
            .claimed_branch
            .clone()
            .unwrap_or_else(|| lane_branch(&lane, id));
        let worktree = self.worktree_abs(&claimed);
        let root = self.layout().root();

        // Land the claim's work first. Re-running after a failure below is
        // safe: an already-merged branch fast-forwards as a no-op.
        if self.git().branch_exists(root, &branch)? {
            self.transactor()
                .integrate(&branch, worktree.as_deref())?;
        }

        // Re-read: the merge may have brought claim-time spec edits along.
        let mut spec = self.specs().read(id)?;
        spec.status = WuStatus::Done;
        spec.locked = true;
        spec.completed_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        spec.clear_claim();
        let prepared = self.specs().prepare(&spec, WriteMode::Strict)?;
        let projected = self.projected_specs(Some(&prepared), None)?;

        let initiative = match &prepared.initiative {
            Some(name) => match self.initiatives().load(name)? {
                Some(mut init) => {
                    init.add_member(id);
                    init.recompute(&projected);
                    Some(init)
                }
                None => None,
            },
            None => None,
        };

        let event = WuEvent::now(id, EventPayload::Complete);
        self.transactor()
            .with_micro_worktree("complete", &id.lowercase(), |wt| {
                let mut files = vec![
                    self.specs().stage_write(wt, &prepared)?,
                    self.stamps().stage_write(wt, id)?,
                    self.events().stage_append(wt, &event)?,
                ];
                if let Some(init) = &initiative {
                    files.push(self.initiatives().stage_write(wt, init)?);
                }
                files.extend(projection::stage_projections(wt, &projected)?);
                Ok(TxWrite {
                    commit_message: format!("docs: complete {}", id.lowercase()),
                    files,
                })
            })?;

        self.teardown_claim(id, &branch, worktree.as_deref());
        let _ = self.locks().release(&lane, id)?;

        // Completion signal for listeners on the memory bus.
        info!(wu = %id, lane = %lane, "work unit completed");
        Ok(())
    }
}
