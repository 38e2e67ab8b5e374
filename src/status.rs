//! `wu status` — a terminal summary of the current state.

use std::collections::BTreeMap;

use lumen_git::GitClient;

use crate::error::LumenError;
use crate::lifecycle::Engine;
use crate::lock::LaneLockStatus;
use crate::model::{Lane, WuStatus};
use crate::wu::WuSpec;

impl<G: GitClient> Engine<G> {
    /// Render the status summary shown by `wu status`.
    ///
    /// # Errors
    /// Propagates spec and lock read errors.
    pub fn status_report(&self) -> Result<String, LumenError> {
        let specs = self.specs().read_all()?;
        let locks = self.locks();

        let mut by_status: BTreeMap<&str, Vec<&WuSpec>> = BTreeMap::new();
        for spec in &specs {
            by_status
                .entry(match spec.status {
                    WuStatus::Ready => "ready",
                    WuStatus::InProgress => "in_progress",
                    WuStatus::Blocked => "blocked",
                    WuStatus::Done => "done",
                })
                .or_default()
                .push(spec);
        }

        let mut out = String::new();
        out.push_str(&format!("{} work unit(s)\n", specs.len()));
        for label in ["ready", "in_progress", "blocked", "done"] {
            let list = by_status.remove(label).unwrap_or_default();
            out.push_str(&format!("\n{label} ({}):\n", list.len()));
            for spec in list {
                out.push_str(&format!("  {}  {} ({})\n", spec.id, spec.title, spec.lane));
            }
        }

        let mut lanes: Vec<&Lane> = specs
            .iter()
            .filter(|s| s.status.occupies_lane())
            .map(|s| &s.lane)
            .collect();
        lanes.sort();
        lanes.dedup();
        if !lanes.is_empty() {
            out.push_str("\nlane locks:\n");
            for lane in lanes {
                let state = match locks.check(lane)? {
                    LaneLockStatus::Free => "unlocked".to_owned(),
                    LaneLockStatus::Held(r) => {
                        format!("held by {} (pid {} on {})", r.wu_id, r.pid, r.hostname)
                    }
                    LaneLockStatus::Stale(r) => format!("STALE, last held by {}", r.wu_id),
                };
                out.push_str(&format!("  {lane}: {state}\n"));
            }
        }
        Ok(out)
    }
}
