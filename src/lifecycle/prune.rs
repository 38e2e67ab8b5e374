//! `wu prune` — sweep up leftovers from crashed transactions and claims.
//!
//! Two kinds of debris accumulate: `tmp/<op>/…` branches from transactions
//! that died before cleanup, and claim worktrees whose WU is no longer
//! claimed. Without `--force` the sweep only previews.

use std::path::PathBuf;

use lumen_git::GitClient;

use crate::error::LumenError;

use super::Engine;

/// What a prune pass found (and, with force, removed).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Leftover transaction branches.
    pub tmp_branches: Vec<String>,
    /// Claim worktree directories no claimed spec references.
    pub orphan_worktrees: Vec<PathBuf>,
    /// `true` if the findings were actually removed.
    pub forced: bool,
}

impl PruneReport {
    /// Total number of findings.
    #[must_use]
    pub fn total(&self) -> usize {
        self.tmp_branches.len() + self.orphan_worktrees.len()
    }
}

impl<G: GitClient> Engine<G> {
    /// Find (and with `force`, remove) orphaned temp branches and claim
    /// worktrees.
    ///
    /// # Errors
    /// Propagates git and filesystem errors from the scan; per-item removal
    /// failures are reported by leaving the item in the report.
    pub fn prune(&self, force: bool) -> Result<PruneReport, LumenError> {
        let root = self.layout().root();
        let mut report = PruneReport {
            forced: force,
            ..PruneReport::default()
        };

        // Orphaned transaction branches are recognizable by prefix.
        for branch in self.git().branch_list(root)? {
            if branch.starts_with("tmp/") {
                report.tmp_branches.push(branch);
            }
        }

        // Compare registered worktrees and on-disk directories against the
        // claim worktrees the specs actually reference. A registered entry
        // nobody references is debris; so is an unregistered directory.
        let referenced: Vec<PathBuf> = self
            .specs()
            .read_all()?
            .iter()
            .filter(|s| s.status.occupies_lane())
            .filter_map(|s| self.worktree_abs(s))
            .collect();
        let wt_dir = self.layout().worktrees_dir();
        let registered: Vec<PathBuf> = self
            .git()
            .worktree_list(root)?
            .into_iter()
            .map(|wt| wt.path)
            .filter(|p| p.starts_with(&wt_dir))
            .collect();
        for path in &registered {
            if !referenced.contains(path) {
                report.orphan_worktrees.push(path.clone());
            }
        }
        if wt_dir.is_dir() {
            for entry in std::fs::read_dir(&wt_dir)? {
                let path = entry?.path();
                if path.is_dir() && !referenced.contains(&path) && !registered.contains(&path) {
                    report.orphan_worktrees.push(path);
                }
            }
        }
        report.tmp_branches.sort();
        report.orphan_worktrees.sort();
        report.orphan_worktrees.dedup();

        if force {
            for branch in &report.tmp_branches {
                let _ = self.git().branch_delete(root, branch, true);
            }
            for path in &report.orphan_worktrees {
                if self.git().worktree_remove(root, path, true).is_err() && path.exists() {
                    let _ = std::fs::remove_dir_all(path);
                }
            }
        }
        Ok(report)
    }
}
