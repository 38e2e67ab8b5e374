//! On-disk layout of persisted engine state.
//!
//! All well-known names live here so every module resolves paths the same
//! way. The caller configures only the root (the repository checkout).

use std::path::{Path, PathBuf};

use crate::model::{Lane, WuId};

/// Resolves the well-known file locations under a repository root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Create a layout rooted at `root`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// The repository root this layout resolves under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `tasks/` — specs and projections.
    #[must_use]
    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    /// `tasks/wu/` — per-WU YAML specs.
    #[must_use]
    pub fn wu_dir(&self) -> PathBuf {
        self.tasks_dir().join("wu")
    }

    /// `tasks/wu/WU-<n>.yaml`.
    #[must_use]
    pub fn wu_file(&self, id: WuId) -> PathBuf {
        self.wu_dir().join(format!("{id}.yaml"))
    }

    /// Repo-relative path of a WU spec (used in transaction file lists and
    /// projection links).
    #[must_use]
    pub fn wu_rel(id: WuId) -> PathBuf {
        PathBuf::from("tasks/wu").join(format!("{id}.yaml"))
    }

    /// `tasks/backlog.md` — the backlog projection.
    #[must_use]
    pub fn backlog_file(&self) -> PathBuf {
        self.tasks_dir().join("backlog.md")
    }

    /// Repo-relative path of the backlog projection.
    #[must_use]
    pub fn backlog_rel() -> PathBuf {
        PathBuf::from("tasks/backlog.md")
    }

    /// `tasks/status.md` — the status projection.
    #[must_use]
    pub fn status_file(&self) -> PathBuf {
        self.tasks_dir().join("status.md")
    }

    /// Repo-relative path of the status projection.
    #[must_use]
    pub fn status_rel() -> PathBuf {
        PathBuf::from("tasks/status.md")
    }

    /// `tasks/initiatives/` — initiative documents.
    #[must_use]
    pub fn initiatives_dir(&self) -> PathBuf {
        self.tasks_dir().join("initiatives")
    }

    /// `tasks/initiatives/<slug>.yaml`.
    #[must_use]
    pub fn initiative_file(&self, slug: &str) -> PathBuf {
        self.initiatives_dir().join(format!("{slug}.yaml"))
    }

    /// Repo-relative path of an initiative document.
    #[must_use]
    pub fn initiative_rel(slug: &str) -> PathBuf {
        PathBuf::from("tasks/initiatives").join(format!("{slug}.yaml"))
    }

    /// `state/wu-events.jsonl` — the event log.
    #[must_use]
    pub fn events_file(&self) -> PathBuf {
        self.root.join("state").join("wu-events.jsonl")
    }

    /// Repo-relative path of the event log.
    #[must_use]
    pub fn events_rel() -> PathBuf {
        PathBuf::from("state/wu-events.jsonl")
    }

    /// `state/locks/` — lane lock records.
    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("state").join("locks")
    }

    /// `state/locks/<kebab(lane)>.lock`.
    #[must_use]
    pub fn lane_lock_file(&self, lane: &Lane) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", lane.kebab()))
    }

    /// The create-exclusive lock guarding direct event-log appends.
    #[must_use]
    pub fn events_lock_file(&self) -> PathBuf {
        self.root.join("state").join("wu-events.jsonl.lock")
    }

    /// The lock guarding sequential ID generation.
    #[must_use]
    pub fn id_lock_file(&self) -> PathBuf {
        self.locks_dir().join("wu-id.lock")
    }

    /// `stamps/` — completion markers.
    #[must_use]
    pub fn stamps_dir(&self) -> PathBuf {
        self.root.join("stamps")
    }

    /// `stamps/WU-<n>.done`.
    #[must_use]
    pub fn stamp_file(&self, id: WuId) -> PathBuf {
        self.stamps_dir().join(format!("{id}.done"))
    }

    /// Repo-relative path of a stamp.
    #[must_use]
    pub fn stamp_rel(id: WuId) -> PathBuf {
        PathBuf::from("stamps").join(format!("{id}.done"))
    }

    /// `tools/invariants.yml` — repo invariants consumed by the spec linter.
    #[must_use]
    pub fn invariants_file(&self) -> PathBuf {
        self.root.join("tools").join("invariants.yml")
    }

    /// `worktrees/` — claim worktrees.
    #[must_use]
    pub fn worktrees_dir(&self) -> PathBuf {
        self.root.join("worktrees")
    }

    /// The claim worktree for a WU: `worktrees/<kebab(lane)>-<wu-n>`.
    #[must_use]
    pub fn claim_worktree(&self, lane: &Lane, id: WuId) -> PathBuf {
        self.worktrees_dir()
            .join(format!("{}-{}", lane.kebab(), id.lowercase()))
    }

    /// Create the directories the engine writes into.
    ///
    /// # Errors
    /// Propagates filesystem errors.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.wu_dir())?;
        std::fs::create_dir_all(self.initiatives_dir())?;
        std::fs::create_dir_all(self.locks_dir())?;
        std::fs::create_dir_all(self.stamps_dir())?;
        std::fs::create_dir_all(self.root.join("tools"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout::new(Path::new("/repo"))
    }

    #[test]
    fn wu_paths() {
        let id = WuId::from_number(100);
        assert_eq!(
            layout().wu_file(id),
            PathBuf::from("/repo/tasks/wu/WU-100.yaml")
        );
        assert_eq!(Layout::wu_rel(id), PathBuf::from("tasks/wu/WU-100.yaml"));
    }

    #[test]
    fn lock_paths_use_kebab() {
        let lane = Lane::new("Ops: Tooling").unwrap();
        assert_eq!(
            layout().lane_lock_file(&lane),
            PathBuf::from("/repo/state/locks/ops-tooling.lock")
        );
    }

    #[test]
    fn claim_worktree_path() {
        let lane = Lane::new("Ops: Tooling").unwrap();
        let id = WuId::from_number(100);
        assert_eq!(
            layout().claim_worktree(&lane, id),
            PathBuf::from("/repo/worktrees/ops-tooling-wu-100")
        );
    }

    #[test]
    fn stamp_and_event_paths() {
        let id = WuId::from_number(7);
        assert_eq!(
            layout().stamp_file(id),
            PathBuf::from("/repo/stamps/WU-7.done")
        );
        assert_eq!(
            layout().events_file(),
            PathBuf::from("/repo/state/wu-events.jsonl")
        );
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure_dirs().unwrap();
        layout.ensure_dirs().unwrap();
        assert!(layout.wu_dir().is_dir());
        assert!(layout.locks_dir().is_dir());
        assert!(layout.stamps_dir().is_dir());
    }
}
