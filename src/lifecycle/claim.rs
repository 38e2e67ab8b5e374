//! `wu claim` — take a ready WU into `in_progress` on a free lane.

use std::path::PathBuf;

use tracing::info;

use lumen_git::GitClient;

use crate::doctor::Doctor;
use crate::error::LumenError;
use crate::event::{EventPayload, WuEvent};
use crate::model::{lane_branch, ClaimMode, WuId, WuStatus};
use crate::projection;
use crate::spec_store::WriteMode;
use crate::transact::TxWrite;

use super::Engine;

/// What a successful claim set up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// The lane branch.
    pub branch: String,
    /// The claim worktree (worktree mode only), repo-relative.
    pub worktree: Option<PathBuf>,
}

impl<G: GitClient> Engine<G> {
    /// Claim `id` in `mode`.
    ///
    /// Preconditions: the WU exists and is `ready`, and its lane's WIP slot
    /// is free. The lane is pre-flighted through the consistency checker so
    /// a lane polluted by orphan done-WU worktrees refuses new claims.
    ///
    /// # Errors
    /// Precondition, lock, and transaction failures. The lane lock is
    /// released again if anything after acquisition fails.
    pub fn claim(&self, id: WuId, mode: ClaimMode) -> Result<ClaimOutcome, LumenError> {
        let mut spec = self.specs().read(id)?;
        if spec.status != WuStatus::Ready {
            return Err(LumenError::WrongStatus {
                wu_id: id,
                verb: "claim",
                expected: "ready",
                actual: spec.status,
            });
        }
        let lane = spec.lane.clone();

        // The lock guards the race; the YAML guards the invariant. A stale
        // lock takeover must not stack a second claim onto a lane whose
        // previous claim is still recorded in_progress.
        let all = self.specs().read_all()?;
        if let Some(holder) = all.iter().find(|s| s.lane == lane && s.status.occupies_lane()) {
            return Err(LumenError::LaneOccupied {
                lane,
                holder: holder.id,
            });
        }

        Doctor::new(self).check_lane(&lane)?;

        let locks = self.locks();
        locks.acquire(&lane, id)?;
        let result = self.claim_locked(&mut spec, mode);
        if result.is_err() {
            let _ = locks.release(&lane, id);
        }
        result
    }

    fn claim_locked(
        &self,
        spec: &mut crate::wu::WuSpec,
        mode: ClaimMode,
    ) -> Result<ClaimOutcome, LumenError> {
        let id = spec.id;
        let lane = spec.lane.clone();
        let branch = lane_branch(&lane, id);

        spec.status = WuStatus::InProgress;
        spec.claimed_mode = Some(mode);
        match mode {
            ClaimMode::Worktree => {
                let rel = PathBuf::from("worktrees")
                    .join(format!("{}-{}", lane.kebab(), id.lowercase()));
                spec.worktree_path = Some(rel);
                spec.claimed_branch = None;
            }
            ClaimMode::BranchPr => {
                spec.worktree_path = None;
                spec.claimed_branch = Some(branch.clone());
            }
        }
        let prepared = self.specs().prepare(spec, WriteMode::Strict)?;
        let projected = self.projected_specs(Some(&prepared), None)?;
        let event = WuEvent::now(
            id,
            EventPayload::Claim {
                lane: lane.clone(),
                title: prepared.title.clone(),
            },
        );

        self.transactor()
            .with_micro_worktree("claim", &id.lowercase(), |worktree| {
                let mut files = vec![
                    self.specs().stage_write(worktree, &prepared)?,
                    self.events().stage_append(worktree, &event)?,
                ];
                files.extend(projection::stage_projections(worktree, &projected)?);
                Ok(TxWrite {
                    commit_message: format!("chore: claim {} ({lane})", id.lowercase()),
                    files,
                })
            })?;

        // The lane branch starts at the shared tip just pushed, so the
        // claim record itself is visible inside the claim checkout.
        let root = self.layout().root();
        if !self.git().branch_exists(root, &branch)? {
            self.git()
                .branch_create(root, &branch, self.transactor().shared_branch())?;
        }
        let worktree = match mode {
            ClaimMode::Worktree => {
                let abs = self
                    .worktree_abs(&prepared)
                    .unwrap_or_else(|| self.layout().claim_worktree(&lane, id));
                self.git().worktree_add(root, &abs, &branch)?;
                prepared.worktree_path.clone()
            }
            ClaimMode::BranchPr => None,
        };

        info!(wu = %id, lane = %lane, branch = %branch, ?mode, "claimed work unit");
        Ok(ClaimOutcome { branch, worktree })
    }
}
