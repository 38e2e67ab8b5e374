//! [`SystemGit`] — the production [`GitClient`] backed by the `git` binary.
//!
//! Every operation shells out to `git` in the requested directory and maps
//! non-zero exits to [`GitError::Command`] with the trimmed stderr, so
//! callers can classify transient failures by pattern.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::client::GitClient;
use crate::error::GitError;
use crate::types::WorktreeInfo;

/// Runs git as a subprocess. Stateless; cheap to construct.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemGit;

impl SystemGit {
    /// Create a new system git client.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Run `git <args>` in `dir` and return stdout on success.
    fn git_stdout(dir: &Path, args: &[&str]) -> Result<String, GitError> {
        debug!(dir = %dir.display(), ?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(GitError::Io)?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(GitError::Command {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
                exit_code: output.status.code(),
            })
        }
    }

    /// Run `git <args>` in `dir`, discarding stdout.
    fn git(dir: &Path, args: &[&str]) -> Result<(), GitError> {
        Self::git_stdout(dir, args).map(|_| ())
    }
}

impl GitClient for SystemGit {
    fn current_branch(&self, dir: &Path) -> Result<String, GitError> {
        let branch = Self::git_stdout(dir, &["branch", "--show-current"])?;
        let branch = branch.trim();
        if branch.is_empty() {
            return Err(GitError::Command {
                command: "git branch --show-current".to_owned(),
                stderr: "HEAD is detached".to_owned(),
                exit_code: Some(1),
            });
        }
        Ok(branch.to_owned())
    }

    fn is_clean(&self, dir: &Path) -> Result<bool, GitError> {
        // Untracked files (lock records, claim worktrees) do not count;
        // clean means no changes to tracked content.
        let status = Self::git_stdout(dir, &["status", "--porcelain", "--untracked-files=no"])?;
        Ok(status.trim().is_empty())
    }

    fn fetch(&self, dir: &Path, remote: &str) -> Result<(), GitError> {
        Self::git(dir, &["fetch", remote])
    }

    fn merge_ff_only(&self, dir: &Path, rev: &str) -> Result<(), GitError> {
        Self::git(dir, &["merge", "--ff-only", rev])
    }

    fn rebase(&self, dir: &Path, onto: &str) -> Result<(), GitError> {
        match Self::git(dir, &["rebase", onto]) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Leave the checkout usable for the caller's cleanup.
                let _ = Self::git(dir, &["rebase", "--abort"]);
                Err(e)
            }
        }
    }

    fn reset_hard(&self, dir: &Path, rev: &str) -> Result<(), GitError> {
        Self::git(dir, &["reset", "--hard", rev])
    }

    fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        Self::git(dir, &["push", remote, branch])
    }

    fn push_delete(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        match Self::git(dir, &["push", remote, "--delete", branch]) {
            Err(e) if e.stderr().contains("remote ref does not exist") => Ok(()),
            other => other,
        }
    }

    fn branch_create(&self, dir: &Path, name: &str, at: &str) -> Result<(), GitError> {
        Self::git(dir, &["branch", name, at])
    }

    fn branch_delete(&self, dir: &Path, name: &str, force: bool) -> Result<(), GitError> {
        let flag = if force { "-D" } else { "-d" };
        Self::git(dir, &["branch", flag, name])
    }

    fn branch_exists(&self, dir: &Path, name: &str) -> Result<bool, GitError> {
        match Self::git(
            dir,
            &["show-ref", "--verify", "--quiet", &format!("refs/heads/{name}")],
        ) {
            Ok(()) => Ok(true),
            Err(GitError::Command { exit_code: Some(1), .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn branch_list(&self, dir: &Path) -> Result<Vec<String>, GitError> {
        let out = Self::git_stdout(
            dir,
            &["for-each-ref", "--format=%(refname:short)", "refs/heads/"],
        )?;
        Ok(out.lines().map(str::to_owned).collect())
    }

    fn worktree_add(&self, dir: &Path, path: &Path, branch: &str) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        Self::git(dir, &["worktree", "add", &path_str, branch])
    }

    fn worktree_remove(&self, dir: &Path, path: &Path, force: bool) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&path_str);
        Self::git(dir, &args)
    }

    fn worktree_list(&self, dir: &Path) -> Result<Vec<WorktreeInfo>, GitError> {
        let out = Self::git_stdout(dir, &["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&out))
    }

    fn stage(&self, dir: &Path, files: &[PathBuf]) -> Result<(), GitError> {
        let mut args: Vec<&str> = vec!["add", "--"];
        let strs: Vec<String> = files
            .iter()
            .map(|f| f.to_string_lossy().into_owned())
            .collect();
        args.extend(strs.iter().map(String::as_str));
        Self::git(dir, &args)
    }

    fn commit(&self, dir: &Path, message: &str) -> Result<(), GitError> {
        Self::git(dir, &["commit", "-m", message])
    }

    fn config_get(&self, dir: &Path, key: &str) -> Result<Option<String>, GitError> {
        match Self::git_stdout(dir, &["config", "--get", key]) {
            Ok(v) => Ok(Some(v.trim().to_owned())),
            Err(GitError::Command { exit_code: Some(1), .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Parse `git worktree list --porcelain` output.
///
/// The porcelain format is a sequence of stanzas separated by blank lines:
///
/// ```text
/// worktree /repo
/// HEAD abc123…
/// branch refs/heads/main
///
/// worktree /tmp/lumenflow-claim-wu-7
/// HEAD def456…
/// detached
/// ```
fn parse_worktree_list(out: &str) -> Vec<WorktreeInfo> {
    let mut result = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut branch: Option<String> = None;

    for line in out.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if let Some(p) = path.take() {
                result.push(WorktreeInfo::new(p, branch.take()));
            }
            branch = None;
            continue;
        }
        if let Some(p) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(p));
        } else if let Some(b) = line.strip_prefix("branch ") {
            branch = Some(b.strip_prefix("refs/heads/").unwrap_or(b).to_owned());
        }
    }
    result
}
