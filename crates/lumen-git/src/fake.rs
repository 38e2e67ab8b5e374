//! In-memory [`GitClient`] double for engine tests.
//!
//! Models just enough of git for the engine's protocol to be observable:
//! branches are monotonically-numbered tips carrying a file tree (the delta
//! committed through the fake), worktrees are real directories on disk, and
//! merges materialize the source tree into the destination checkout so the
//! engine can read back what a transaction wrote.
//!
//! Failure injection:
//! - [`FakeGit::reject_next_pushes`] — the next N pushes fail with a
//!   fast-forward rejection while the remote tip advances, exercising the
//!   transactor's rebase-retry loop.
//! - [`FakeGit::fail_next`] — queue an arbitrary stderr for the next call of
//!   a named operation.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::client::GitClient;
use crate::error::GitError;
use crate::types::WorktreeInfo;

/// A branch: a commit tip plus the files committed through the fake.
/// A `None` tree entry records a committed deletion.
#[derive(Clone, Debug, Default)]
struct Branch {
    tip: u64,
    tree: BTreeMap<PathBuf, Option<Vec<u8>>>,
}

#[derive(Debug)]
struct FakeState {
    root: PathBuf,
    current_branch: String,
    branches: BTreeMap<String, Branch>,
    remote: BTreeMap<String, Branch>,
    /// `origin/<name>` snapshots, refreshed by `fetch`.
    tracking: BTreeMap<String, Branch>,
    worktrees: BTreeMap<PathBuf, String>,
    dirty: BTreeSet<PathBuf>,
    staged: BTreeMap<PathBuf, Vec<PathBuf>>,
    next_commit: u64,
    user_email: Option<String>,
    ops: Vec<String>,
    push_rejects: u32,
    fail_plan: VecDeque<(String, String)>,
}

/// In-memory git double. Construct with the main checkout directory.
#[derive(Debug)]
pub struct FakeGit {
    state: Mutex<FakeState>,
}

impl FakeGit {
    /// Create a fake repository rooted at `root`, on branch `main`, with the
    /// remote in sync.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        let initial = Branch {
            tip: 1,
            tree: BTreeMap::new(),
        };
        let mut branches = BTreeMap::new();
        branches.insert("main".to_owned(), initial.clone());
        let mut remote = BTreeMap::new();
        remote.insert("main".to_owned(), initial.clone());
        let mut tracking = BTreeMap::new();
        tracking.insert("main".to_owned(), initial);
        Self {
            state: Mutex::new(FakeState {
                root: root.to_path_buf(),
                current_branch: "main".to_owned(),
                branches,
                remote,
                tracking,
                worktrees: BTreeMap::new(),
                dirty: BTreeSet::new(),
                staged: BTreeMap::new(),
                next_commit: 1,
                user_email: Some("agent@lumenflow.test".to_owned()),
                ops: Vec::new(),
                push_rejects: 0,
                fail_plan: VecDeque::new(),
            }),
        }
    }

    /// Snapshot of every operation performed, in order (for assertions).
    #[must_use]
    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    /// Make the next `n` pushes of any branch fail with a fast-forward
    /// rejection; each rejection also advances the remote tip, as if a
    /// concurrent transactor won the race.
    pub fn reject_next_pushes(&self, n: u32) {
        self.lock().push_rejects = n;
    }

    /// Queue a failure for the next call of `op` (e.g. `"fetch"`, `"push"`,
    /// `"rebase"`). Failures are consumed FIFO per matching operation.
    pub fn fail_next(&self, op: &str, stderr: &str) {
        self.lock()
            .fail_plan
            .push_back((op.to_owned(), stderr.to_owned()));
    }

    /// Mark a checkout as having uncommitted changes.
    pub fn mark_dirty(&self, dir: &Path) {
        self.lock().dirty.insert(dir.to_path_buf());
    }

    /// Simulate another process pushing to the remote.
    pub fn advance_remote(&self, branch: &str) {
        let mut st = self.lock();
        st.next_commit += 1;
        let tip = st.next_commit;
        st.remote.entry(branch.to_owned()).or_default().tip = tip;
    }

    /// The remote tip number of `branch`, if it exists.
    #[must_use]
    pub fn remote_tip(&self, branch: &str) -> Option<u64> {
        self.lock().remote.get(branch).map(|b| b.tip)
    }

    /// The local tip number of `branch`, if it exists.
    #[must_use]
    pub fn local_tip(&self, branch: &str) -> Option<u64> {
        self.lock().branches.get(branch).map(|b| b.tip)
    }

    /// Local branch names, sorted.
    #[must_use]
    pub fn local_branches(&self) -> Vec<String> {
        self.lock().branches.keys().cloned().collect()
    }

    /// Unset the configured `user.email`.
    pub fn clear_user_email(&self) {
        self.lock().user_email = None;
    }

    /// Switch the main checkout to `branch`, creating it at the current
    /// tip if needed (models `git switch -c`).
    pub fn switch_branch(&self, branch: &str) {
        let mut st = self.lock();
        if !st.branches.contains_key(branch) {
            let current = st
                .branches
                .get(&st.current_branch)
                .cloned()
                .unwrap_or_default();
            st.branches.insert(branch.to_owned(), current);
        }
        st.current_branch = branch.to_owned();
    }

    #[allow(clippy::unwrap_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Record the op; return an injected failure if one is queued for it.
    fn enter(&self, op: &str, detail: &str) -> Result<(), GitError> {
        let mut st = self.lock();
        st.ops.push(format!("{op} {detail}").trim().to_owned());
        if let Some(pos) = st.fail_plan.iter().position(|(o, _)| o == op) {
            let (_, stderr) = st.fail_plan.remove(pos).unwrap_or_default();
            return Err(GitError::Command {
                command: format!("git {op}"),
                stderr,
                exit_code: Some(1),
            });
        }
        Ok(())
    }
}

fn command_err(op: &str, stderr: &str) -> GitError {
    GitError::Command {
        command: format!("git {op}"),
        stderr: stderr.to_owned(),
        exit_code: Some(1),
    }
}

fn materialize(tree: &BTreeMap<PathBuf, Option<Vec<u8>>>, dir: &Path) -> Result<(), GitError> {
    for (rel, bytes) in tree {
        let dst = dir.join(rel);
        match bytes {
            Some(bytes) => {
                if let Some(parent) = dst.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&dst, bytes)?;
            }
            None => {
                if dst.exists() {
                    std::fs::remove_file(&dst)?;
                }
            }
        }
    }
    Ok(())
}

impl FakeState {
    fn branch_for_dir(&self, dir: &Path) -> Result<String, GitError> {
        if dir == self.root {
            return Ok(self.current_branch.clone());
        }
        self.worktrees
            .get(dir)
            .cloned()
            .ok_or_else(|| GitError::WorktreeNotFound {
                path: dir.to_path_buf(),
            })
    }

    fn resolve(&self, rev: &str) -> Result<Branch, GitError> {
        if let Some(name) = rev.strip_prefix("origin/") {
            return self
                .tracking
                .get(name)
                .cloned()
                .ok_or_else(|| command_err("rev-parse", &format!("unknown revision '{rev}'")));
        }
        self.branches
            .get(rev)
            .cloned()
            .ok_or_else(|| command_err("rev-parse", &format!("unknown revision '{rev}'")))
    }
}

impl GitClient for FakeGit {
    fn current_branch(&self, dir: &Path) -> Result<String, GitError> {
        self.enter("current_branch", &dir.display().to_string())?;
        self.lock().branch_for_dir(dir)
    }

    fn is_clean(&self, dir: &Path) -> Result<bool, GitError> {
        self.enter("is_clean", &dir.display().to_string())?;
        Ok(!self.lock().dirty.contains(dir))
    }

    fn fetch(&self, dir: &Path, remote: &str) -> Result<(), GitError> {
        self.enter("fetch", remote)?;
        let _ = dir;
        let mut st = self.lock();
        st.tracking = st.remote.clone();
        Ok(())
    }

    fn merge_ff_only(&self, dir: &Path, rev: &str) -> Result<(), GitError> {
        self.enter("merge_ff_only", rev)?;
        let mut st = self.lock();
        let name = st.branch_for_dir(dir)?;
        let source = st.resolve(rev)?;
        let dest = st
            .branches
            .get(&name)
            .cloned()
            .ok_or_else(|| command_err("merge", &format!("unknown branch '{name}'")))?;
        if source.tip <= dest.tip {
            return Ok(());
        }
        let mut merged = dest;
        merged.tip = source.tip;
        merged.tree.extend(source.tree.clone());
        st.branches.insert(name, merged);
        drop(st);
        materialize(&source.tree, dir)
    }

    fn rebase(&self, dir: &Path, onto: &str) -> Result<(), GitError> {
        self.enter("rebase", onto)?;
        let mut st = self.lock();
        let name = st.branch_for_dir(dir)?;
        let base = st.resolve(onto)?;
        let branch = st
            .branches
            .get(&name)
            .cloned()
            .ok_or_else(|| command_err("rebase", &format!("unknown branch '{name}'")))?;
        if branch.tip >= base.tip {
            return Ok(());
        }
        st.next_commit += 1;
        let mut rebased = Branch {
            tip: st.next_commit,
            tree: base.tree.clone(),
        };
        // Replayed commits win over the new base, as in a clean rebase.
        rebased.tree.extend(branch.tree);
        st.branches.insert(name, rebased);
        Ok(())
    }

    fn reset_hard(&self, dir: &Path, rev: &str) -> Result<(), GitError> {
        self.enter("reset_hard", rev)?;
        let mut st = self.lock();
        let name = st.branch_for_dir(dir)?;
        let target = st.resolve(rev)?;
        st.branches.insert(name, target.clone());
        drop(st);
        materialize(&target.tree, dir)
    }

    fn push(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        self.enter("push", branch)?;
        let _ = (dir, remote);
        let mut st = self.lock();
        if st.push_rejects > 0 {
            st.push_rejects -= 1;
            st.next_commit += 1;
            let tip = st.next_commit;
            st.remote.entry(branch.to_owned()).or_default().tip = tip;
            return Err(command_err(
                "push",
                "! [rejected] main -> main (non-fast-forward): not possible to fast-forward, fetch first",
            ));
        }
        let local = st
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| command_err("push", &format!("unknown branch '{branch}'")))?;
        st.remote.insert(branch.to_owned(), local);
        Ok(())
    }

    fn push_delete(&self, dir: &Path, remote: &str, branch: &str) -> Result<(), GitError> {
        self.enter("push_delete", branch)?;
        let _ = (dir, remote);
        self.lock().remote.remove(branch);
        Ok(())
    }

    fn branch_create(&self, dir: &Path, name: &str, at: &str) -> Result<(), GitError> {
        self.enter("branch_create", name)?;
        let _ = dir;
        let mut st = self.lock();
        if st.branches.contains_key(name) {
            return Err(command_err(
                "branch",
                &format!("a branch named '{name}' already exists"),
            ));
        }
        let base = st.resolve(at)?;
        st.branches.insert(name.to_owned(), base);
        Ok(())
    }

    fn branch_delete(&self, dir: &Path, name: &str, force: bool) -> Result<(), GitError> {
        self.enter("branch_delete", name)?;
        let _ = (dir, force);
        let mut st = self.lock();
        if st.worktrees.values().any(|b| b == name) {
            return Err(command_err(
                "branch",
                &format!("cannot delete branch '{name}' checked out in a worktree"),
            ));
        }
        st.branches.remove(name);
        Ok(())
    }

    fn branch_exists(&self, dir: &Path, name: &str) -> Result<bool, GitError> {
        self.enter("branch_exists", name)?;
        let _ = dir;
        Ok(self.lock().branches.contains_key(name))
    }

    fn branch_list(&self, dir: &Path) -> Result<Vec<String>, GitError> {
        self.enter("branch_list", "")?;
        let _ = dir;
        Ok(self.lock().branches.keys().cloned().collect())
    }

    fn worktree_add(&self, dir: &Path, path: &Path, branch: &str) -> Result<(), GitError> {
        self.enter("worktree_add", &path.display().to_string())?;
        let _ = dir;
        let mut st = self.lock();
        if st.worktrees.contains_key(path) {
            return Err(command_err(
                "worktree add",
                &format!("'{}' already exists", path.display()),
            ));
        }
        let tree = st
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| command_err("worktree add", &format!("unknown branch '{branch}'")))?
            .tree;
        st.worktrees.insert(path.to_path_buf(), branch.to_owned());
        drop(st);
        std::fs::create_dir_all(path)?;
        materialize(&tree, path)
    }

    fn worktree_remove(&self, dir: &Path, path: &Path, force: bool) -> Result<(), GitError> {
        self.enter("worktree_remove", &path.display().to_string())?;
        let _ = dir;
        let mut st = self.lock();
        if !force && st.dirty.contains(path) {
            return Err(command_err(
                "worktree remove",
                &format!("'{}' contains modified or untracked files", path.display()),
            ));
        }
        st.worktrees.remove(path);
        st.dirty.remove(path);
        drop(st);
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    fn worktree_list(&self, dir: &Path) -> Result<Vec<WorktreeInfo>, GitError> {
        self.enter("worktree_list", "")?;
        let _ = dir;
        let st = self.lock();
        let mut list = vec![WorktreeInfo::new(
            st.root.clone(),
            Some(st.current_branch.clone()),
        )];
        for (path, branch) in &st.worktrees {
            list.push(WorktreeInfo::new(path.clone(), Some(branch.clone())));
        }
        Ok(list)
    }

    fn stage(&self, dir: &Path, files: &[PathBuf]) -> Result<(), GitError> {
        self.enter("stage", &format!("{} file(s)", files.len()))?;
        let mut st = self.lock();
        st.staged
            .entry(dir.to_path_buf())
            .or_default()
            .extend(files.iter().cloned());
        Ok(())
    }

    fn commit(&self, dir: &Path, message: &str) -> Result<(), GitError> {
        self.enter("commit", message)?;
        let mut st = self.lock();
        if st.user_email.is_none() {
            return Err(command_err(
                "commit",
                "Author identity unknown: please set user.email",
            ));
        }
        let staged = st.staged.remove(dir).unwrap_or_default();
        if staged.is_empty() {
            return Err(command_err("commit", "nothing to commit"));
        }
        let name = st.branch_for_dir(dir)?;
        let mut delta = BTreeMap::new();
        for rel in staged {
            // A staged path that is absent on disk records a deletion.
            match std::fs::read(dir.join(&rel)) {
                Ok(bytes) => {
                    delta.insert(rel, Some(bytes));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    delta.insert(rel, None);
                }
                Err(e) => return Err(GitError::Io(e)),
            }
        }
        st.next_commit += 1;
        let tip = st.next_commit;
        let branch = st.branches.entry(name).or_default();
        branch.tip = tip;
        branch.tree.extend(delta);
        st.dirty.remove(dir);
        Ok(())
    }

    fn config_get(&self, dir: &Path, key: &str) -> Result<Option<String>, GitError> {
        self.enter("config_get", key)?;
        let _ = dir;
        if key == "user.email" {
            return Ok(self.lock().user_email.clone());
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, FakeGit) {
        let dir = tempfile::tempdir().unwrap();
        let git = FakeGit::new(dir.path());
        (dir, git)
    }

    #[test]
    fn commit_in_worktree_then_merge_materializes_into_root() {
        let (dir, git) = fixture();
        let root = dir.path().to_path_buf();
        let wt = root.join("wt");

        git.branch_create(&root, "tmp/test/1", "main").unwrap();
        git.worktree_add(&root, &wt, "tmp/test/1").unwrap();

        std::fs::write(wt.join("note.txt"), b"hello").unwrap();
        git.stage(&wt, &[PathBuf::from("note.txt")]).unwrap();
        git.commit(&wt, "docs: add note").unwrap();

        git.merge_ff_only(&root, "tmp/test/1").unwrap();
        assert_eq!(std::fs::read(root.join("note.txt")).unwrap(), b"hello");
    }

    #[test]
    fn push_reject_advances_remote_then_succeeds() {
        let (dir, git) = fixture();
        let root = dir.path().to_path_buf();
        git.reject_next_pushes(1);

        std::fs::write(root.join("a"), b"a").unwrap();
        git.stage(&root, &[PathBuf::from("a")]).unwrap();
        git.commit(&root, "x").unwrap();

        let before = git.remote_tip("main").unwrap();
        let err = git.push(&root, "origin", "main").unwrap_err();
        assert!(err.stderr().contains("not possible to fast-forward"));
        assert!(git.remote_tip("main").unwrap() > before);

        // Recover the way the transactor does: fetch + ff + push.
        git.fetch(&root, "origin").unwrap();
        git.merge_ff_only(&root, "origin/main").unwrap();
        git.push(&root, "origin", "main").unwrap();
        assert_eq!(git.remote_tip("main"), git.local_tip("main"));
    }

    #[test]
    fn commit_without_staged_files_fails() {
        let (dir, git) = fixture();
        let err = git.commit(dir.path(), "empty").unwrap_err();
        assert!(err.stderr().contains("nothing to commit"));
    }

    #[test]
    fn worktree_remove_refuses_dirty_without_force() {
        let (dir, git) = fixture();
        let root = dir.path().to_path_buf();
        let wt = root.join("wt");
        git.branch_create(&root, "b", "main").unwrap();
        git.worktree_add(&root, &wt, "b").unwrap();
        git.mark_dirty(&wt);

        assert!(git.worktree_remove(&root, &wt, false).is_err());
        git.worktree_remove(&root, &wt, true).unwrap();
        assert!(!wt.exists());
    }

    #[test]
    fn branch_delete_refuses_checked_out() {
        let (dir, git) = fixture();
        let root = dir.path().to_path_buf();
        let wt = root.join("wt");
        git.branch_create(&root, "b", "main").unwrap();
        git.worktree_add(&root, &wt, "b").unwrap();

        assert!(git.branch_delete(&root, "b", true).is_err());
        git.worktree_remove(&root, &wt, true).unwrap();
        git.branch_delete(&root, "b", true).unwrap();
        assert!(!git.branch_exists(&root, "b").unwrap());
    }

    #[test]
    fn fail_next_injects_for_named_op_only() {
        let (dir, git) = fixture();
        git.fail_next("fetch", "ETIMEDOUT while connecting");
        // Other ops are unaffected.
        assert!(git.branch_exists(dir.path(), "main").unwrap());
        let err = git.fetch(dir.path(), "origin").unwrap_err();
        assert!(err.stderr().contains("ETIMEDOUT"));
        // Injection is consumed.
        git.fetch(dir.path(), "origin").unwrap();
    }

    #[test]
    fn rebase_fast_forwards_over_new_base() {
        let (dir, git) = fixture();
        let root = dir.path().to_path_buf();
        git.branch_create(&root, "tmp/x", "main").unwrap();
        git.advance_remote("main");
        git.fetch(&root, "origin").unwrap();
        git.merge_ff_only(&root, "origin/main").unwrap();

        let wt = root.join("wt");
        git.worktree_add(&root, &wt, "tmp/x").unwrap();
        std::fs::write(wt.join("f"), b"f").unwrap();
        git.stage(&wt, &[PathBuf::from("f")]).unwrap();
        git.commit(&wt, "f").unwrap();

        git.rebase(&wt, "main").unwrap();
        assert!(git.local_tip("tmp/x").unwrap() > git.local_tip("main").unwrap());
    }
}
