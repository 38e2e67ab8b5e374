//! Initiatives — multi-phase groupings of WUs.
//!
//! An initiative document (`tasks/initiatives/<slug>.yaml`) owns a set of
//! WUs. Its phase and status are derived: the active phase is the lowest
//! phase that still has a pending member, and the initiative is done once
//! every member is.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LumenError;
use crate::layout::Layout;
use crate::model::{WuId, WuStatus};
use crate::wu::WuSpec;

// ---------------------------------------------------------------------------
// Initiative
// ---------------------------------------------------------------------------

/// Derived lifecycle of an initiative.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiativeStatus {
    /// At least one member WU is pending.
    #[default]
    Active,
    /// Every member WU is done.
    Done,
}

/// An initiative document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiative {
    /// Human-readable name.
    pub name: String,
    /// Derived status.
    #[serde(default)]
    pub status: InitiativeStatus,
    /// The currently active phase (1-based).
    #[serde(default = "default_phase")]
    pub phase: u32,
    /// Member WUs.
    #[serde(default)]
    pub wus: Vec<WuId>,
}

const fn default_phase() -> u32 {
    1
}

/// Kebab slug used for the document filename.
#[must_use]
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

impl Initiative {
    /// A fresh initiative with no members.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: InitiativeStatus::Active,
            phase: 1,
            wus: Vec::new(),
        }
    }

    /// Add a member, keeping the list sorted and unique.
    pub fn add_member(&mut self, id: WuId) {
        if !self.wus.contains(&id) {
            self.wus.push(id);
            self.wus.sort_unstable();
        }
    }

    /// Remove a member if present.
    pub fn remove_member(&mut self, id: WuId) {
        self.wus.retain(|w| *w != id);
    }

    /// Recompute phase and status from the member specs.
    ///
    /// The active phase is the lowest phase among pending members
    /// (members without a phase count as phase 1); with no pending members
    /// the phase stays at the highest member phase and the initiative is
    /// done.
    pub fn recompute(&mut self, specs: &[WuSpec]) {
        let members: Vec<&WuSpec> = specs.iter().filter(|s| self.wus.contains(&s.id)).collect();
        if members.is_empty() {
            self.status = InitiativeStatus::Active;
            return;
        }
        let pending_phases: Vec<u32> = members
            .iter()
            .filter(|s| s.status != WuStatus::Done)
            .map(|s| s.phase.unwrap_or(1))
            .collect();
        if pending_phases.is_empty() {
            self.phase = members.iter().map(|s| s.phase.unwrap_or(1)).max().unwrap_or(1);
            self.status = InitiativeStatus::Done;
        } else {
            self.phase = pending_phases.into_iter().min().unwrap_or(1);
            self.status = InitiativeStatus::Active;
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Reads and stages initiative documents under a [`Layout`].
#[derive(Clone, Debug)]
pub struct InitiativeStore {
    layout: Layout,
}

impl InitiativeStore {
    /// Create a store over `layout`.
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Load an initiative by name, if its document exists.
    ///
    /// # Errors
    /// Fails on unreadable or invalid YAML.
    pub fn load(&self, name: &str) -> Result<Option<Initiative>, LumenError> {
        let path = self.layout.initiative_file(&slug(name));
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_yaml::from_str(&text)
            .map(Some)
            .map_err(|e| LumenError::Config {
                path,
                detail: format!("invalid initiative document: {e}"),
            })
    }

    /// Load by name, creating a fresh document when absent.
    ///
    /// # Errors
    /// Fails on unreadable or invalid YAML.
    pub fn load_or_new(&self, name: &str) -> Result<Initiative, LumenError> {
        Ok(self.load(name)?.unwrap_or_else(|| Initiative::new(name)))
    }

    /// Serialize an initiative into `dir` for a transaction, returning the
    /// repo-relative path.
    ///
    /// # Errors
    /// Propagates filesystem and serialization errors.
    pub fn stage_write(&self, dir: &Path, initiative: &Initiative) -> Result<PathBuf, LumenError> {
        let rel = Layout::initiative_rel(&slug(&initiative.name));
        let dst = dir.join(&rel);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = serde_yaml::to_string(initiative).map_err(|e| LumenError::Internal {
            detail: format!("initiative serialization failed: {e}"),
        })?;
        std::fs::write(&dst, yaml)?;
        Ok(rel)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
