//! The [`GitClient`] trait — the single seam between the engine and git.

use std::path::Path;

use crate::error::GitError;
use crate::types::WorktreeInfo;

/// Interface to the git substrate.
///
/// Every method takes the directory to operate in (`dir`): either the main
/// checkout or an ephemeral worktree. Implementations must not keep
/// per-operation state; the engine may call concurrently-created clients
/// from independent processes.
pub trait GitClient {
    /// Name of the branch checked out in `dir`, without `refs/heads/`.
    ///
    /// # Errors
    /// Fails on a detached HEAD or if `dir` is not a git checkout.
    fn current_branch(&self, dir: &Path) -> Result<String, GitError>;

    /// `true` if the working tree and index have no uncommitted changes.
    ///
    /// # Errors
    /// Fails if status cannot be read.
    fn is_clean(&self, dir: &Path) -> Result<bool, GitError>;

    /// Fetch all branches from `remote`.
    ///
    /// # Errors
    /// Fails on network or remote errors (usually transient).
    fn fetch(&self, dir: &Path, remote: &str) -> Result<(), GitError>;

    /// Merge `rev` into the branch checked out in `dir`, fast-forward only.
    ///
    /// # Errors
    /// Fails if the merge is not a fast-forward.
    fn merge_ff_only(&self, dir: &Path, rev: &str) -> Result<(), GitError>;

    /// Rebase the branch checked out in `dir` onto `onto`.
    ///
    /// # Errors
    /// Fails on content conflicts ([`GitError::is_conflict`]); the
    /// implementation aborts the rebase before returning.
    fn rebase(&self, dir: &Path, onto: &str) -> Result<(), GitError>;

    /// Hard-reset the branch checked out in `dir` to `rev`.
    ///
    /// # Errors
    /// Fails if `rev` cannot be resolved.
    fn reset_hard(&self, dir: &Path, rev: &str) -> Result<(), GitError>;

    /// Push `branch` to `remote`.
    ///
    /// # Errors
    /// Fails on rejection (remote advanced) or network errors.
    fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError>;

    /// Delete `branch` on `remote`.
    ///
    /// # Errors
    /// Fails on network errors; deleting an absent branch is not an error.
    fn push_delete(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError>;

    /// Create branch `name` pointing at `at`, without switching to it.
    ///
    /// # Errors
    /// Fails if the branch already exists.
    fn branch_create(&self, dir: &Path, name: &str, at: &str) -> Result<(), GitError>;

    /// Delete local branch `name`.
    ///
    /// # Errors
    /// Fails if the branch is not fully merged, unless `force`.
    fn branch_delete(&self, dir: &Path, name: &str, force: bool) -> Result<(), GitError>;

    /// `true` if local branch `name` exists.
    ///
    /// # Errors
    /// Fails only on infrastructure errors, not on absence.
    fn branch_exists(&self, dir: &Path, name: &str) -> Result<bool, GitError>;

    /// All local branch names, without `refs/heads/`.
    ///
    /// # Errors
    /// Fails if the ref list cannot be read.
    fn branch_list(&self, dir: &Path) -> Result<Vec<String>, GitError>;

    /// Create a worktree at `path` checked out to existing branch `branch`.
    ///
    /// # Errors
    /// Fails if `path` exists or `branch` is already checked out elsewhere.
    fn worktree_add(&self, dir: &Path, path: &Path, branch: &str) -> Result<(), GitError>;

    /// Remove the worktree at `path`.
    ///
    /// # Errors
    /// Fails if the worktree has uncommitted changes, unless `force`.
    fn worktree_remove(&self, dir: &Path, path: &Path, force: bool) -> Result<(), GitError>;

    /// Enumerate registered worktrees, main checkout first.
    ///
    /// # Errors
    /// Fails if the worktree list cannot be read.
    fn worktree_list(&self, dir: &Path) -> Result<Vec<WorktreeInfo>, GitError>;

    /// Stage the given paths (relative to `dir`).
    ///
    /// # Errors
    /// Fails if a path cannot be staged.
    fn stage(&self, dir: &Path, files: &[std::path::PathBuf]) -> Result<(), GitError>;

    /// Commit staged changes with `message`.
    ///
    /// # Errors
    /// Fails if there is nothing to commit or identity is unconfigured.
    fn commit(&self, dir: &Path, message: &str) -> Result<(), GitError>;

    /// Read a git config value (e.g. `user.email`). `None` if unset.
    ///
    /// # Errors
    /// Fails only on infrastructure errors.
    fn config_get(&self, dir: &Path, key: &str) -> Result<Option<String>, GitError>;
}
