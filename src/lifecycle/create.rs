//! `wu create` — a new WU spec lands on the shared branch as `ready`.

use chrono::Utc;
use tracing::info;

use lumen_git::GitClient;

use crate::error::LumenError;
use crate::lock::FileLock;
use crate::model::{Exposure, Lane, Priority, WuId, WuStatus, WuType};
use crate::projection;
use crate::spec_store::WriteMode;
use crate::transact::TxWrite;
use crate::wu::{SizingEstimate, TestPlan, WuSpec};

use super::Engine;

/// Inputs for `wu create`.
#[derive(Clone, Debug)]
pub struct CreateRequest {
    /// Explicit ID; omitted means "next sequential".
    pub id: Option<WuId>,
    /// The lane the WU will occupy when claimed.
    pub lane: Lane,
    /// Short imperative title.
    pub title: String,
    /// Work category.
    pub wu_type: WuType,
    /// Priority band.
    pub priority: Priority,
    /// Where the work surfaces.
    pub exposure: Exposure,
    /// What and why.
    pub description: String,
    /// Ordered acceptance criteria.
    pub acceptance: Vec<String>,
    /// Repo-relative globs the work may touch.
    pub code_paths: Vec<String>,
    /// Links into design/spec documents.
    pub spec_refs: Vec<String>,
    /// Owning initiative, if any.
    pub initiative: Option<String>,
    /// Initiative phase.
    pub phase: Option<u32>,
    /// Optional sizing estimate.
    pub sizing: Option<SizingEstimate>,
    /// Pipeline strictness.
    pub mode: WriteMode,
}

impl<G: GitClient> Engine<G> {
    /// Create a new WU. Returns the assigned ID.
    ///
    /// No lifecycle event is written; a `ready` spec's history starts at
    /// its first claim.
    ///
    /// # Errors
    /// Duplicate IDs, validation failures, and transaction failures.
    pub fn create(&self, req: &CreateRequest) -> Result<WuId, LumenError> {
        let id = self.reserve_id(req)?;
        let spec = self.build_spec(req, id)?;
        let projected = self.projected_specs(Some(&spec), None)?;

        let initiative = match &req.initiative {
            Some(name) => {
                let mut init = self.initiatives().load_or_new(name)?;
                init.add_member(id);
                init.recompute(&projected);
                Some(init)
            }
            None => None,
        };

        self.transactor()
            .with_micro_worktree("create", &id.lowercase(), |worktree| {
                let mut files = vec![self.specs().stage_write(worktree, &spec)?];
                if let Some(init) = &initiative {
                    files.push(self.initiatives().stage_write(worktree, init)?);
                }
                files.extend(projection::stage_projections(worktree, &projected)?);
                Ok(TxWrite {
                    commit_message: format!(
                        "docs: create {} for {}",
                        id.lowercase(),
                        spec.title
                    ),
                    files,
                })
            })?;

        info!(wu = %id, lane = %spec.lane, "created work unit");
        Ok(id)
    }

    /// Resolve the ID for a create/spawn request: either the explicit ID
    /// (must be unused) or the next sequential one.
    pub(crate) fn reserve_id(&self, req: &CreateRequest) -> Result<WuId, LumenError> {
        match req.id {
            Some(id) => {
                if self.specs().exists(id) {
                    return Err(LumenError::DuplicateWu { wu_id: id });
                }
                Ok(id)
            }
            None => self.next_id(),
        }
    }

    /// Build and validate the `ready` spec for a create/spawn request.
    pub(crate) fn build_spec(&self, req: &CreateRequest, id: WuId) -> Result<WuSpec, LumenError> {
        let spec = WuSpec {
            id,
            title: req.title.clone(),
            lane: req.lane.clone(),
            wu_type: req.wu_type,
            priority: req.priority,
            status: WuStatus::Ready,
            created: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
            exposure: req.exposure,
            description: req.description.clone(),
            acceptance: req.acceptance.clone(),
            code_paths: req.code_paths.clone(),
            tests: TestPlan::default(),
            dependencies: vec![],
            blocked_by: vec![],
            blocks: vec![],
            labels: vec![],
            assigned_to: None,
            initiative: req.initiative.clone(),
            phase: req.phase,
            spec_refs: req.spec_refs.clone(),
            notes: None,
            risks: vec![],
            sizing: req.sizing.clone(),
            worktree_path: None,
            claimed_mode: None,
            claimed_branch: None,
            completed_at: None,
            locked: false,
        };
        self.specs().prepare(&spec, req.mode)
    }

    /// Next sequential ID, generated under the ID lock with a bounded
    /// re-scan loop in case a concurrent creator wins the first candidate.
    fn next_id(&self) -> Result<WuId, LumenError> {
        const RETRIES: u32 = 5;
        let _guard = FileLock::acquire(
            &self.layout().id_lock_file(),
            self.config().locks.log_stale(),
        )?;
        for _ in 0..RETRIES {
            let next = self
                .specs()
                .max_id()?
                .map_or(1, |max| max.number() + 1);
            let candidate = WuId::from_number(next);
            if !self.specs().exists(candidate) {
                return Ok(candidate);
            }
        }
        Err(LumenError::Internal {
            detail: "could not allocate a fresh WU id after repeated scans".to_owned(),
        })
    }
}
