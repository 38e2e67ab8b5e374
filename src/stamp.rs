//! Completion stamps (`stamps/WU-<n>.done`).
//!
//! A stamp is a zero-content marker whose existence must agree with the
//! WU's YAML saying `done` + `locked`. Zero-content is canonical on write;
//! reads also accept a headed stamp carrying an `<id>: <title>` first line
//! (older tools wrote those).

use std::path::{Path, PathBuf};

use crate::error::LumenError;
use crate::layout::Layout;
use crate::model::WuId;

/// Reads and stages completion stamps under a [`Layout`].
#[derive(Clone, Debug)]
pub struct StampStore {
    layout: Layout,
}

impl StampStore {
    /// Create a store over `layout`.
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// `true` if a stamp exists for `id` (either format).
    #[must_use]
    pub fn exists(&self, id: WuId) -> bool {
        self.layout.stamp_file(id).is_file()
    }

    /// The headed stamp's first line, if the stamp has content.
    #[must_use]
    pub fn header(&self, id: WuId) -> Option<String> {
        let text = std::fs::read_to_string(self.layout.stamp_file(id)).ok()?;
        let first = text.lines().next()?.trim();
        (!first.is_empty()).then(|| first.to_owned())
    }

    /// Stage a canonical (zero-content) stamp into `dir` for a transaction.
    ///
    /// # Errors
    /// Propagates filesystem errors.
    pub fn stage_write(&self, dir: &Path, id: WuId) -> Result<PathBuf, LumenError> {
        let rel = Layout::stamp_rel(id);
        let dst = dir.join(&rel);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dst, b"")?;
        Ok(rel)
    }

    /// Stage removal of a stamp: delete the worktree copy so the commit
    /// records the deletion. Returns the repo-relative path to stage.
    ///
    /// # Errors
    /// Propagates filesystem errors.
    pub fn stage_remove(&self, dir: &Path, id: WuId) -> Result<PathBuf, LumenError> {
        let rel = Layout::stamp_rel(id);
        let dst = dir.join(&rel);
        if dst.exists() {
            std::fs::remove_file(&dst)?;
        }
        Ok(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, StampStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure_dirs().unwrap();
        (dir, StampStore::new(layout))
    }

    #[test]
    fn stage_write_creates_zero_content_stamp() {
        let (dir, store) = fixture();
        let id = WuId::from_number(100);
        let rel = store.stage_write(dir.path(), id).unwrap();
        assert_eq!(rel, PathBuf::from("stamps/WU-100.done"));
        assert!(store.exists(id));
        assert_eq!(std::fs::read(dir.path().join(rel)).unwrap(), b"");
        assert!(store.header(id).is_none(), "canonical stamps have no header");
    }

    #[test]
    fn headed_stamp_is_accepted_on_read() {
        let (dir, store) = fixture();
        let id = WuId::from_number(7);
        std::fs::write(
            dir.path().join("stamps/WU-7.done"),
            "WU-7: Wire the flux capacitor\n",
        )
        .unwrap();
        assert!(store.exists(id));
        assert_eq!(
            store.header(id).as_deref(),
            Some("WU-7: Wire the flux capacitor")
        );
    }

    #[test]
    fn stage_remove_deletes_the_worktree_copy() {
        let (dir, store) = fixture();
        let id = WuId::from_number(3);
        store.stage_write(dir.path(), id).unwrap();
        let rel = store.stage_remove(dir.path(), id).unwrap();
        assert!(!dir.path().join(rel).exists());
    }

    #[test]
    fn missing_stamp_reports_absent() {
        let (_dir, store) = fixture();
        assert!(!store.exists(WuId::from_number(9)));
    }
}
