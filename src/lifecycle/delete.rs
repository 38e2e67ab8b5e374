//! `wu delete` — the WU ceases to exist.
//!
//! Removes the YAML, stamp, lane branch, and worktree, and rebuilds the
//! projections without the WU. Intentionally writes no event; deletion is
//! not part of a WU's lifecycle history.

use tracing::info;

use lumen_git::GitClient;

use crate::error::LumenError;
use crate::layout::Layout;
use crate::model::{lane_branch, WuId};
use crate::projection;
use crate::transact::TxWrite;

use super::Engine;

impl<G: GitClient> Engine<G> {
    /// Delete `id`. Deleting a claimed (`in_progress`/`blocked`) WU
    /// requires `force`; deleting a `done` WU is permitted.
    ///
    /// # Errors
    /// Precondition and transaction failures.
    pub fn delete(&self, id: WuId, force: bool) -> Result<(), LumenError> {
        let spec = self.specs().read(id)?;
        if spec.status.occupies_lane() && !force {
            return Err(LumenError::WrongStatus {
                wu_id: id,
                verb: "delete",
                expected: "ready or done (pass --force to delete a claimed WU)",
                actual: spec.status,
            });
        }
        let lane = spec.lane.clone();
        let branch = spec
            .claimed_branch
            .clone()
            .unwrap_or_else(|| lane_branch(&lane, id));
        let worktree = self.worktree_abs(&spec);
        let had_stamp = self.stamps().exists(id);
        let projected = self.projected_specs(None, Some(id))?;

        let initiative = match &spec.initiative {
            Some(name) => match self.initiatives().load(name)? {
                Some(mut init) => {
                    init.remove_member(id);
                    init.recompute(&projected);
                    Some(init)
                }
                None => None,
            },
            None => None,
        };

        self.transactor()
            .with_micro_worktree("delete", &id.lowercase(), |wt| {
                let spec_rel = Layout::wu_rel(id);
                let staged_spec = wt.join(&spec_rel);
                if staged_spec.exists() {
                    std::fs::remove_file(&staged_spec)?;
                }
                let mut files = vec![spec_rel];
                if had_stamp {
                    files.push(self.stamps().stage_remove(wt, id)?);
                }
                if let Some(init) = &initiative {
                    files.push(self.initiatives().stage_write(wt, init)?);
                }
                files.extend(projection::stage_projections(wt, &projected)?);
                Ok(TxWrite {
                    commit_message: format!("docs: delete {}", id.lowercase()),
                    files,
                })
            })?;

        self.teardown_claim(id, &branch, worktree.as_deref());
        let _ = self.locks().release(&lane, id)?;
        info!(wu = %id, "deleted work unit");
        Ok(())
    }
}
