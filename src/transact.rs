//! The micro-worktree transactor — the only write channel to the shared
//! branch.
//!
//! Every file-level write to the shared branch happens from an isolated
//! throwaway checkout; the main checkout is never switched away from its
//! branch. The protocol for one transaction:
//!
//! 1. Verify the main checkout is on the shared branch and clean; fetch and
//!    fast-forward it to the remote tip.
//! 2. Create a temp branch `tmp/<op>/<id>/<nonce>` at the local tip.
//! 3. Add an ephemeral worktree (outside the repo tree) on the temp branch.
//! 4. Run the caller's closure in the worktree; it returns the commit
//!    message and the files it touched.
//! 5. Stage and commit.
//! 6. Fast-forward-merge the temp branch into the shared branch, rebasing
//!    the temp branch and retrying when the remote has advanced.
//! 7. Push, retrying transient failures with backoff; a failed push rolls
//!    the shared branch back so it is never left merged-but-unpushed.
//! 8. Clean up worktree and temp branch on every exit path.
//!
//! Cloud mode (`CLOUD=1`) skips the worktree and commits on the current
//! per-WU branch; it is forbidden on the shared branch itself.

use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, info, warn};

use lumen_git::GitClient;

use crate::config::LumenConfig;
use crate::error::LumenError;
use crate::retry::{classify_git, run_with_retry, ErrorClass, RetryPolicy};

// ---------------------------------------------------------------------------
// TxWrite
// ---------------------------------------------------------------------------

/// What a transaction closure produced: the commit message and the
/// repo-relative files it wrote (or deleted) inside the worktree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxWrite {
    /// The commit message.
    pub commit_message: String,
    /// Repo-relative paths to stage. Empty means nothing to commit; the
    /// transaction becomes a no-op.
    pub files: Vec<PathBuf>,
}

/// `true` when the caller opted into cloud mode via `CLOUD`.
#[must_use]
pub fn cloud_mode() -> bool {
    std::env::var("CLOUD").is_ok_and(|v| !v.is_empty() && v != "0")
}

// ---------------------------------------------------------------------------
// Transactor
// ---------------------------------------------------------------------------

/// Serializes writes to the shared branch.
pub struct Transactor<'a, G: GitClient> {
    git: &'a G,
    root: &'a Path,
    branch: String,
    remote: String,
    policy: RetryPolicy,
    cloud: Option<bool>,
}

impl<'a, G: GitClient> Transactor<'a, G> {
    /// Build a transactor for the repository at `root`.
    #[must_use]
    pub fn new(git: &'a G, root: &'a Path, config: &LumenConfig) -> Self {
        Self {
            git,
            root,
            branch: config.repo.branch.clone(),
            remote: config.repo.remote.clone(),
            policy: RetryPolicy::from_config(&config.retry),
            cloud: None,
        }
    }

    /// Override the retry schedule (tests use an immediate policy).
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Force cloud mode on or off, overriding the `CLOUD` env opt-in.
    #[must_use]
    pub fn with_cloud(mut self, cloud: bool) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// The shared branch name.
    #[must_use]
    pub fn shared_branch(&self) -> &str {
        &self.branch
    }

    /// Run one micro-worktree transaction (or a cloud commit when opted in).
    ///
    /// # Errors
    /// Precondition failures, conflicts, and retry exhaustion; cleanup runs
    /// on every path.
    pub fn with_micro_worktree<F>(&self, op: &str, id: &str, exec: F) -> Result<(), LumenError>
    where
        F: FnOnce(&Path) -> Result<TxWrite, LumenError>,
    {
        if self.cloud.unwrap_or_else(cloud_mode) {
            return self.cloud_commit(exec);
        }

        let tool = std::env::var("WU_TOOL").unwrap_or_default();
        let span = tracing::info_span!("transaction", op, id, tool = %tool);
        let _enter = span.enter();

        self.sync_shared_branch()?;

        let nonce = nonce();
        let tmp_branch = format!("tmp/{op}/{id}/{nonce}");
        self.git.branch_create(self.root, &tmp_branch, &self.branch)?;
        let worktree = std::env::temp_dir().join(format!("lumenflow-{op}-{id}-{nonce}"));

        // From here on the guard owns cleanup: worktree first, then branch,
        // on success, error, and panic alike.
        let guard = TxGuard {
            git: self.git,
            root: self.root,
            branch: tmp_branch.clone(),
            worktree: worktree.clone(),
        };

        self.git.worktree_add(self.root, &worktree, &tmp_branch)?;
        let write = exec(&worktree)?;
        if write.files.is_empty() {
            debug!(op, id, "transaction wrote nothing; skipping commit");
            drop(guard);
            return Ok(());
        }
        self.git.stage(&worktree, &write.files)?;
        self.git.commit(&worktree, &write.commit_message)?;

        self.integrate(&tmp_branch, Some(&worktree))?;
        info!(op, id, files = write.files.len(), "transaction committed and pushed");
        drop(guard);
        Ok(())
    }

    /// Cloud mode: commit and push on the current (per-WU) branch.
    fn cloud_commit<F>(&self, exec: F) -> Result<(), LumenError>
    where
        F: FnOnce(&Path) -> Result<TxWrite, LumenError>,
    {
        let current = self.git.current_branch(self.root)?;
        if current == self.branch {
            return Err(LumenError::CloudOnSharedBranch {
                branch: self.branch.clone(),
            });
        }
        let write = exec(self.root)?;
        if write.files.is_empty() {
            return Ok(());
        }
        self.git.stage(self.root, &write.files)?;
        self.git.commit(self.root, &write.commit_message)?;
        run_with_retry(&self.policy, "push claimed branch", |_| {
            self.git.push(self.root, &self.remote, &current)
        })
    }

    /// Bring the local shared branch to the remote tip; the main checkout
    /// must be on the shared branch and clean.
    fn sync_shared_branch(&self) -> Result<(), LumenError> {
        let current = self.git.current_branch(self.root)?;
        if current != self.branch {
            return Err(LumenError::DirtyCheckout {
                detail: format!(
                    "main checkout is on '{current}', transactions require '{}'",
                    self.branch
                ),
            });
        }
        if !self.git.is_clean(self.root)? {
            return Err(LumenError::DirtyCheckout {
                detail: "uncommitted changes in the main checkout".to_owned(),
            });
        }
        run_with_retry(&self.policy, "fetch", |_| {
            self.git.fetch(self.root, &self.remote)
        })?;
        self.git
            .merge_ff_only(self.root, &format!("{}/{}", self.remote, self.branch))?;
        Ok(())
    }

    /// Merge `branch` into the shared branch ff-only and push, rebasing
    /// `branch` (in `rebase_checkout`) and retrying when the remote
    /// advances. A failed push rolls the local shared branch back to the
    /// last fetched remote tip before the next attempt, so the merge is
    /// never observable without the push.
    ///
    /// # Errors
    /// Conflicts fail immediately; transient failures retry then surface as
    /// exhaustion.
    pub fn integrate(
        &self,
        branch: &str,
        rebase_checkout: Option<&Path>,
    ) -> Result<(), LumenError> {
        let op_name = format!("integrate {branch} into {}", self.branch);
        let tracking = format!("{}/{}", self.remote, self.branch);
        let mut attempt = 1;
        loop {
            match self.integrate_once(branch, rebase_checkout, &tracking) {
                Ok(()) => return Ok(()),
                Err(e) => match classify_git(&e) {
                    ErrorClass::Conflict => {
                        return Err(LumenError::MergeConflict {
                            op: op_name,
                            detail: e.to_string(),
                        });
                    }
                    ErrorClass::Permanent => return Err(e.into()),
                    ErrorClass::Transient => {
                        if attempt >= self.policy.max_attempts {
                            return Err(LumenError::RetryExhaustion {
                                op: op_name,
                                attempts: attempt,
                                last: e.to_string(),
                            });
                        }
                        let delay = self.policy.delay_for(attempt);
                        warn!(
                            op = %op_name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "remote moved or infrastructure hiccup; retrying"
                        );
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                },
            }
        }
    }

    fn integrate_once(
        &self,
        branch: &str,
        rebase_checkout: Option<&Path>,
        tracking: &str,
    ) -> Result<(), lumen_git::GitError> {
        self.git.fetch(self.root, &self.remote)?;
        self.git.merge_ff_only(self.root, tracking)?;
        if let Some(checkout) = rebase_checkout {
            self.git.rebase(checkout, &self.branch)?;
        }
        self.git.merge_ff_only(self.root, branch)?;
        match self.git.push(self.root, &self.remote, &self.branch) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Never leave the shared branch merged but unpushed.
                if let Err(rollback) = self.git.reset_hard(self.root, tracking) {
                    warn!(error = %rollback, "rollback after failed push also failed");
                }
                Err(e)
            }
        }
    }
}

fn nonce() -> String {
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(6)
        .map(|b| char::from(b.to_ascii_lowercase()))
        .collect()
}

// ---------------------------------------------------------------------------
// TxGuard
// ---------------------------------------------------------------------------

/// Scoped cleanup of one transaction's worktree and temp branch.
struct TxGuard<'a, G: GitClient> {
    git: &'a G,
    root: &'a Path,
    branch: String,
    worktree: PathBuf,
}

impl<G: GitClient> Drop for TxGuard<'_, G> {
    fn drop(&mut self) {
        if let Err(e) = self
            .git
            .worktree_remove(self.root, &self.worktree, true)
            && self.worktree.exists()
        {
            warn!(worktree = %self.worktree.display(), error = %e, "worktree cleanup failed");
            let _ = std::fs::remove_dir_all(&self.worktree);
        }
        if let Err(e) = self.git.branch_delete(self.root, &self.branch, true) {
            warn!(branch = %self.branch, error = %e, "temp branch cleanup failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_git::fake::FakeGit;

    fn fixture() -> (tempfile::TempDir, FakeGit, LumenConfig) {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path());
        (dir, git, LumenConfig::default())
    }

    fn tx<'a>(git: &'a FakeGit, root: &'a Path, cfg: &LumenConfig) -> Transactor<'a, FakeGit> {
        Transactor::new(git, root, cfg).with_policy(RetryPolicy::immediate(4))
    }

    fn write_note(worktree: &Path) -> Result<TxWrite, LumenError> {
        let rel = PathBuf::from("tasks/note.md");
        let dst = worktree.join(&rel);
        std::fs::create_dir_all(dst.parent().unwrap()).unwrap();
        std::fs::write(&dst, "note").unwrap();
        Ok(TxWrite {
            commit_message: "docs: add note".to_owned(),
            files: vec![rel],
        })
    }

    #[test]
    fn transaction_lands_files_on_shared_branch_and_remote() {
        let (dir, git, cfg) = fixture();
        let root = dir.path();
        tx(&git, root, &cfg)
            .with_micro_worktree("create", "wu-1", write_note)
            .unwrap();

        // Materialized into the main checkout by the ff merge.
        assert_eq!(std::fs::read_to_string(root.join("tasks/note.md")).unwrap(), "note");
        // Pushed.
        assert_eq!(git.remote_tip("main"), git.local_tip("main"));
    }

    #[test]
    fn cleanup_totality_on_success() {
        let (dir, git, cfg) = fixture();
        tx(&git, dir.path(), &cfg)
            .with_micro_worktree("create", "wu-1", write_note)
            .unwrap();
        assert_eq!(git.local_branches(), vec!["main".to_owned()]);
        assert!(
            !std::fs::read_dir(std::env::temp_dir())
                .unwrap()
                .filter_map(Result::ok)
                .any(|e| e.file_name().to_string_lossy().starts_with("lumenflow-create-wu-1")),
            "ephemeral worktrees must be removed"
        );
    }

    #[test]
    fn cleanup_totality_on_exec_failure() {
        let (dir, git, cfg) = fixture();
        let err = tx(&git, dir.path(), &cfg)
            .with_micro_worktree("edit", "wu-2", |_| {
                Err(LumenError::Internal {
                    detail: "caller exploded".to_owned(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, LumenError::Internal { .. }));
        assert_eq!(git.local_branches(), vec!["main".to_owned()]);
    }

    #[test]
    fn push_reject_triggers_rebase_retry_and_succeeds() {
        let (dir, git, cfg) = fixture();
        git.reject_next_pushes(1);
        tx(&git, dir.path(), &cfg)
            .with_micro_worktree("complete", "wu-3", write_note)
            .unwrap();

        let ops = git.ops();
        let pushes = ops.iter().filter(|o| o.starts_with("push main")).count();
        assert_eq!(pushes, 2, "one rejected push, one successful retry");
        assert!(
            ops.iter().any(|o| o.starts_with("reset_hard")),
            "failed push must roll the shared branch back"
        );
        assert_eq!(git.remote_tip("main"), git.local_tip("main"));
    }

    #[test]
    fn retry_budget_exhaustion_surfaces_and_cleans_up() {
        let (dir, git, cfg) = fixture();
        git.reject_next_pushes(10);
        let err = tx(&git, dir.path(), &cfg)
            .with_micro_worktree("complete", "wu-4", write_note)
            .unwrap_err();
        assert!(matches!(err, LumenError::RetryExhaustion { .. }));
        assert_eq!(git.local_branches(), vec!["main".to_owned()]);
    }

    #[test]
    fn rebase_conflict_fails_without_retry() {
        let (dir, git, cfg) = fixture();
        git.fail_next("rebase", "CONFLICT (content): Merge conflict in tasks/note.md");
        let err = tx(&git, dir.path(), &cfg)
            .with_micro_worktree("complete", "wu-5", write_note)
            .unwrap_err();
        assert!(matches!(err, LumenError::MergeConflict { .. }));
        assert_eq!(git.local_branches(), vec!["main".to_owned()]);
    }

    #[test]
    fn dirty_main_checkout_is_refused() {
        let (dir, git, cfg) = fixture();
        git.mark_dirty(dir.path());
        let err = tx(&git, dir.path(), &cfg)
            .with_micro_worktree("create", "wu-6", write_note)
            .unwrap_err();
        assert!(matches!(err, LumenError::DirtyCheckout { .. }));
    }

    #[test]
    fn empty_write_is_a_no_op() {
        let (dir, git, cfg) = fixture();
        let before = git.local_tip("main");
        tx(&git, dir.path(), &cfg)
            .with_micro_worktree("edit", "wu-7", |_| {
                Ok(TxWrite {
                    commit_message: "noop".to_owned(),
                    files: vec![],
                })
            })
            .unwrap();
        assert_eq!(git.local_tip("main"), before);
        assert_eq!(git.local_branches(), vec!["main".to_owned()]);
    }

    #[test]
    fn transient_fetch_failure_is_retried() {
        let (dir, git, cfg) = fixture();
        git.fail_next("fetch", "ssh: ETIMEDOUT");
        tx(&git, dir.path(), &cfg)
            .with_micro_worktree("create", "wu-8", write_note)
            .unwrap();
        assert_eq!(git.remote_tip("main"), git.local_tip("main"));
    }
}
