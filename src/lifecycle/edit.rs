//! `wu edit` — change a spec without changing its identity or status.
//!
//! Where the write lands depends on the WU's status:
//!
//! - `ready`: through a micro-worktree transaction.
//! - `in_progress` in worktree mode: committed inside the claim worktree;
//!   the lane branch isolates the write, no transactor needed.
//! - `in_progress` in branch-pr mode: the current branch must be the
//!   claimed branch; committed there and pushed.
//! - `done`: only `{initiative, phase, exposure}` may change.
//!
//! An initiative change updates both the old and new initiative documents.

use tracing::info;

use lumen_git::GitClient;

use crate::error::LumenError;
use crate::initiative::Initiative;
use crate::model::{ClaimMode, Exposure, Priority, WuId, WuStatus};
use crate::projection;
use crate::retry::{run_with_retry, RetryPolicy};
use crate::spec_store::WriteMode;
use crate::transact::TxWrite;
use crate::wu::WuSpec;

use super::Engine;

/// Inputs for `wu edit`. `None` fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct EditRequest {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New priority.
    pub priority: Option<Priority>,
    /// New exposure.
    pub exposure: Option<Exposure>,
    /// New notes.
    pub notes: Option<String>,
    /// New initiative membership (`Some(None)` clears it).
    pub initiative: Option<Option<String>>,
    /// New phase.
    pub phase: Option<u32>,
    /// Acceptance criteria to append.
    pub add_acceptance: Vec<String>,
    /// Code paths to append.
    pub add_code_paths: Vec<String>,
    /// Spec references to append.
    pub add_spec_refs: Vec<String>,
}

impl EditRequest {
    /// `true` if the request touches fields outside the done-WU whitelist
    /// (`initiative`, `phase`, `exposure`).
    #[must_use]
    pub fn touches_immutable(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.priority.is_some()
            || self.notes.is_some()
            || !self.add_acceptance.is_empty()
            || !self.add_code_paths.is_empty()
            || !self.add_spec_refs.is_empty()
    }

    fn apply(&self, spec: &mut WuSpec) {
        if let Some(v) = &self.title {
            spec.title = v.clone();
        }
        if let Some(v) = &self.description {
            spec.description = v.clone();
        }
        if let Some(v) = self.priority {
            spec.priority = v;
        }
        if let Some(v) = self.exposure {
            spec.exposure = v;
        }
        if let Some(v) = &self.notes {
            spec.notes = Some(v.clone());
        }
        if let Some(v) = &self.initiative {
            spec.initiative = v.clone();
        }
        if let Some(v) = self.phase {
            spec.phase = Some(v);
        }
        spec.acceptance.extend(self.add_acceptance.iter().cloned());
        spec.code_paths.extend(self.add_code_paths.iter().cloned());
        spec.spec_refs.extend(self.add_spec_refs.iter().cloned());
    }
}

impl<G: GitClient> Engine<G> {
    /// Edit `id` per `req`. The id and status fields are never touched.
    ///
    /// # Errors
    /// Done-WU whitelist violations, branch preconditions in branch-pr
    /// mode, validation, and transaction failures.
    pub fn edit(&self, id: WuId, req: &EditRequest) -> Result<(), LumenError> {
        let before = self.specs().read(id)?;
        if before.status == WuStatus::Done && req.touches_immutable() {
            return Err(LumenError::SpecValidation {
                wu_id: Some(id),
                problems: vec![
                    "a done WU is immutable apart from initiative, phase, and exposure"
                        .to_owned(),
                ],
            });
        }

        let mut spec = before.clone();
        req.apply(&mut spec);
        let prepared = self.specs().prepare(&spec, WriteMode::Strict)?;
        let initiatives = self.initiative_updates(&before, &prepared)?;

        match before.status {
            WuStatus::Ready | WuStatus::Done => {
                self.edit_via_transaction(&prepared, &initiatives)?;
            }
            WuStatus::InProgress | WuStatus::Blocked => match before.claimed_mode {
                Some(ClaimMode::Worktree) | None => self.edit_in_claim_worktree(&prepared)?,
                Some(ClaimMode::BranchPr) => self.edit_on_claimed_branch(&before, &prepared)?,
            },
        }
        info!(wu = %id, "edited work unit");
        Ok(())
    }

    /// Bidirectional initiative membership updates for an edit.
    fn initiative_updates(
        &self,
        before: &WuSpec,
        after: &WuSpec,
    ) -> Result<Vec<Initiative>, LumenError> {
        if before.initiative == after.initiative {
            return Ok(Vec::new());
        }
        let projected = self.projected_specs(Some(after), None)?;
        let mut updates = Vec::new();
        if let Some(old_name) = &before.initiative
            && let Some(mut old) = self.initiatives().load(old_name)?
        {
            old.remove_member(after.id);
            old.recompute(&projected);
            updates.push(old);
        }
        if let Some(new_name) = &after.initiative {
            let mut new = self.initiatives().load_or_new(new_name)?;
            new.add_member(after.id);
            new.recompute(&projected);
            updates.push(new);
        }
        Ok(updates)
    }

    fn edit_via_transaction(
        &self,
        prepared: &WuSpec,
        initiatives: &[Initiative],
    ) -> Result<(), LumenError> {
        let projected = self.projected_specs(Some(prepared), None)?;
        self.transactor()
            .with_micro_worktree("edit", &prepared.id.lowercase(), |wt| {
                let mut files = vec![self.specs().stage_write(wt, prepared)?];
                for init in initiatives {
                    files.push(self.initiatives().stage_write(wt, init)?);
                }
                files.extend(projection::stage_projections(wt, &projected)?);
                Ok(TxWrite {
                    commit_message: format!("docs: edit {}", prepared.id.lowercase()),
                    files,
                })
            })
    }

    /// Worktree-mode claims: the claim worktree's branch isolates the
    /// write; commit there directly.
    fn edit_in_claim_worktree(&self, prepared: &WuSpec) -> Result<(), LumenError> {
        let Some(worktree) = self.worktree_abs(prepared) else {
            return Err(LumenError::Drift {
                findings: vec![format!(
                    "{} is claimed in worktree mode but records no worktree_path",
                    prepared.id
                )],
            });
        };
        if !worktree.exists() {
            return Err(LumenError::Drift {
                findings: vec![format!(
                    "{}'s claim worktree {} is missing on disk",
                    prepared.id,
                    worktree.display()
                )],
            });
        }
        let rel = self.specs().stage_write(&worktree, prepared)?;
        self.git().stage(&worktree, &[rel])?;
        self.git()
            .commit(&worktree, &format!("docs: edit {}", prepared.id.lowercase()))?;
        Ok(())
    }

    /// Branch-pr claims: require the current branch to be the claimed
    /// branch, commit on it, push.
    fn edit_on_claimed_branch(
        &self,
        before: &WuSpec,
        prepared: &WuSpec,
    ) -> Result<(), LumenError> {
        let root = self.layout().root();
        let claimed = before.claimed_branch.as_deref().unwrap_or_default();
        let current = self.git().current_branch(root)?;
        if current != claimed {
            return Err(LumenError::DirtyCheckout {
                detail: format!(
                    "branch-pr edits to {} must run on '{claimed}', not '{current}'",
                    prepared.id
                ),
            });
        }
        let rel = self.specs().stage_write(root, prepared)?;
        self.git().stage(root, &[rel])?;
        self.git()
            .commit(root, &format!("docs: edit {}", prepared.id.lowercase()))?;
        run_with_retry(
            &RetryPolicy::from_config(&self.config().retry),
            "push claimed branch",
            |_| self.git().push(root, &self.config().repo.remote, claimed),
        )
    }
}
