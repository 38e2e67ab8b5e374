//! The lifecycle coordinator — the user-visible verbs.
//!
//! [`Engine`] wires the layers together: spec store, event log, lane locks,
//! stamps, initiatives, projections, and the micro-worktree transactor over
//! a [`GitClient`]. Each verb lives in its own file and enforces the state
//! machine:
//!
//! ```text
//!  (non-existent) --create--> ready
//!  ready --claim--> in_progress
//!  in_progress --release--> ready
//!  in_progress --block--> blocked
//!  blocked --unblock--> in_progress
//!  in_progress --complete--> done
//!  any --delete--> (non-existent)
//! ```

use std::path::PathBuf;

use lumen_git::GitClient;

use crate::config::LumenConfig;
use crate::error::LumenError;
use crate::event::EventLog;
use crate::initiative::InitiativeStore;
use crate::layout::Layout;
use crate::lock::LaneLockManager;
use crate::model::WuId;
use crate::spec_store::SpecStore;
use crate::stamp::StampStore;
use crate::state::StateIndex;
use crate::transact::Transactor;
use crate::wu::WuSpec;

mod block;
mod claim;
mod complete;
mod create;
mod delete;
mod edit;
mod harness;
mod prune;
mod release;
mod spawn;

pub use block::{BlockRequest, UnblockRequest};
pub use claim::ClaimOutcome;
pub use create::CreateRequest;
pub use edit::EditRequest;
pub use harness::HarnessReport;
pub use prune::PruneReport;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The lifecycle coordinator over one repository checkout.
pub struct Engine<G: GitClient> {
    layout: Layout,
    config: LumenConfig,
    git: G,
}

impl<G: GitClient> Engine<G> {
    /// Build an engine for the repository at `root`.
    #[must_use]
    pub fn new(root: &std::path::Path, config: LumenConfig, git: G) -> Self {
        Self {
            layout: Layout::new(root),
            config,
            git,
        }
    }

    /// The on-disk layout.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The repository configuration.
    #[must_use]
    pub fn config(&self) -> &LumenConfig {
        &self.config
    }

    /// The git client.
    #[must_use]
    pub fn git(&self) -> &G {
        &self.git
    }

    /// The spec store.
    #[must_use]
    pub fn specs(&self) -> SpecStore {
        SpecStore::new(self.layout.clone())
    }

    /// The stamp store.
    #[must_use]
    pub fn stamps(&self) -> StampStore {
        StampStore::new(self.layout.clone())
    }

    /// The initiative store.
    #[must_use]
    pub fn initiatives(&self) -> InitiativeStore {
        InitiativeStore::new(self.layout.clone())
    }

    /// The event log.
    #[must_use]
    pub fn events(&self) -> EventLog {
        EventLog::new(&self.layout, self.config.locks.log_stale())
    }

    /// The lane lock manager.
    #[must_use]
    pub fn locks(&self) -> LaneLockManager {
        LaneLockManager::new(self.layout.clone(), self.config.locks.lane_stale())
    }

    /// A transactor bound to this repository.
    #[must_use]
    pub fn transactor(&self) -> Transactor<'_, G> {
        Transactor::new(&self.git, self.layout.root(), &self.config)
    }

    /// Replay the event log into a fresh index.
    ///
    /// # Errors
    /// Fails if the log contains invalid lines (repair first).
    pub fn load_index(&self) -> Result<StateIndex, LumenError> {
        let events = self.events().read_all()?;
        let mut index = StateIndex::new();
        index.load(&events);
        Ok(index)
    }

    /// The spec set as it will look after this transaction: everything on
    /// disk, with `replace` swapped in and `remove` dropped. Projection
    /// input for state-mutating verbs.
    pub(crate) fn projected_specs(
        &self,
        replace: Option<&WuSpec>,
        remove: Option<WuId>,
    ) -> Result<Vec<WuSpec>, LumenError> {
        let mut specs = self.specs().read_all()?;
        if let Some(spec) = replace {
            specs.retain(|s| s.id != spec.id);
            specs.push(spec.clone());
            specs.sort_by_key(|s| s.id);
        }
        if let Some(id) = remove {
            specs.retain(|s| s.id != id);
        }
        Ok(specs)
    }

    /// Absolute path of a claim worktree recorded in a spec.
    pub(crate) fn worktree_abs(&self, spec: &WuSpec) -> Option<PathBuf> {
        spec.worktree_path
            .as_ref()
            .map(|rel| self.layout.root().join(rel))
    }
}
