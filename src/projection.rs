//! Derived markdown views: `tasks/backlog.md` and `tasks/status.md`.
//!
//! Projections are a deterministic reduction over the set of existing WU
//! YAML documents. They are regenerated whole on every state-mutating verb,
//! never patched; generating twice from the same input yields byte-identical
//! output. The backlog's YAML front-matter declares each section heading and
//! the insertion strategy, so external writers know where entries belong.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LumenError;
use crate::layout::Layout;
use crate::model::{WuId, WuStatus};
use crate::wu::WuSpec;

// ---------------------------------------------------------------------------
// Front matter
// ---------------------------------------------------------------------------

/// Insertion strategy a section declares for external writers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertStrategy {
    /// New entries go directly under the heading.
    #[default]
    After,
    /// New entries go at the end of the section.
    Append,
}

/// One backlog section as declared in front matter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    /// The markdown heading line, e.g. `"## Ready"`.
    pub heading: String,
    /// Where writers insert relative to the heading.
    #[serde(default)]
    pub insert: InsertStrategy,
}

/// The backlog front matter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogFrontMatter {
    /// Sections in render order.
    pub sections: Vec<SectionSpec>,
}

impl Default for BacklogFrontMatter {
    fn default() -> Self {
        Self {
            sections: [
                ("## Ready", InsertStrategy::After),
                ("## In Progress", InsertStrategy::After),
                ("## Blocked", InsertStrategy::After),
                ("## Done", InsertStrategy::Append),
            ]
            .into_iter()
            .map(|(heading, insert)| SectionSpec {
                heading: heading.to_owned(),
                insert,
            })
            .collect(),
        }
    }
}

const fn section_for(status: WuStatus) -> usize {
    match status {
        WuStatus::Ready => 0,
        WuStatus::InProgress => 1,
        WuStatus::Blocked => 2,
        WuStatus::Done => 3,
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Render the backlog from the spec set. Entries are sorted by ID inside
/// each section; the output is a pure function of the input.
#[must_use]
pub fn generate_backlog(specs: &[WuSpec]) -> String {
    let fm = BacklogFrontMatter::default();
    let mut sections: Vec<Vec<&WuSpec>> = vec![Vec::new(); fm.sections.len()];
    let mut sorted: Vec<&WuSpec> = specs.iter().collect();
    sorted.sort_by_key(|s| s.id);
    for spec in sorted {
        sections[section_for(spec.status)].push(spec);
    }

    let mut out = String::new();
    out.push_str("---\n");
    // Front matter is serialized, not hand-written, so the declared
    // sections can never drift from what the generator renders.
    out.push_str(&serde_yaml::to_string(&fm).unwrap_or_default());
    out.push_str("---\n\n# Backlog\n");
    for (spec_list, section) in sections.iter().zip(&fm.sections) {
        out.push('\n');
        out.push_str(&section.heading);
        out.push('\n');
        if spec_list.is_empty() {
            out.push_str("\n(none)\n");
            continue;
        }
        out.push('\n');
        for spec in spec_list {
            out.push_str(&entry_line(spec));
            out.push('\n');
        }
    }
    out
}

fn entry_line(spec: &WuSpec) -> String {
    format!(
        "- [{id}](wu/{id}.yaml) {title} ({lane})",
        id = spec.id,
        title = spec.title,
        lane = spec.lane
    )
}

/// Render the status summary: per-status counts and current lane occupancy.
#[must_use]
pub fn generate_status(specs: &[WuSpec]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for status in [
        WuStatus::Ready,
        WuStatus::InProgress,
        WuStatus::Blocked,
        WuStatus::Done,
    ] {
        counts.insert(status_label(status), 0);
    }
    for spec in specs {
        *counts.entry(status_label(spec.status)).or_insert(0) += 1;
    }

    let mut out = String::new();
    out.push_str("# Status\n\nGenerated from tasks/wu. Do not edit by hand.\n\n## Counts\n\n");
    out.push_str("| Status | Count |\n|---|---|\n");
    for status in [
        WuStatus::Ready,
        WuStatus::InProgress,
        WuStatus::Blocked,
        WuStatus::Done,
    ] {
        let label = status_label(status);
        out.push_str(&format!("| {label} | {} |\n", counts[label]));
    }

    out.push_str("\n## Lanes\n\n| Lane | WU | Status |\n|---|---|---|\n");
    let mut occupied: Vec<&WuSpec> = specs
        .iter()
        .filter(|s| s.status.occupies_lane())
        .collect();
    occupied.sort_by(|a, b| a.lane.cmp(&b.lane).then(a.id.cmp(&b.id)));
    for spec in occupied {
        out.push_str(&format!("| {} | {} | {} |\n", spec.lane, spec.id, spec.status));
    }
    out
}

const fn status_label(status: WuStatus) -> &'static str {
    match status {
        WuStatus::Ready => "ready",
        WuStatus::InProgress => "in_progress",
        WuStatus::Blocked => "blocked",
        WuStatus::Done => "done",
    }
}

/// Write both projections into `dir` (a worktree or the root), returning
/// the repo-relative paths for the commit file list.
///
/// # Errors
/// Propagates filesystem errors.
pub fn stage_projections(dir: &Path, specs: &[WuSpec]) -> Result<Vec<PathBuf>, LumenError> {
    let backlog_rel = Layout::backlog_rel();
    let status_rel = Layout::status_rel();
    for (rel, content) in [
        (&backlog_rel, generate_backlog(specs)),
        (&status_rel, generate_status(specs)),
    ] {
        let dst = dir.join(rel);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dst, content)?;
    }
    Ok(vec![backlog_rel, status_rel])
}

// ---------------------------------------------------------------------------
// Parsing (for the consistency checker)
// ---------------------------------------------------------------------------

/// Section membership parsed back out of a backlog document:
/// `(section heading, WU id)` in file order.
#[must_use]
pub fn backlog_entries(content: &str) -> Vec<(String, WuId)> {
    let mut entries = Vec::new();
    let mut current_section = String::new();
    let mut in_front_matter = false;
    for (i, line) in content.lines().enumerate() {
        if line == "---" && (i == 0 || in_front_matter) {
            in_front_matter = !in_front_matter;
            continue;
        }
        if in_front_matter {
            continue;
        }
        if let Some(heading) = line.strip_prefix("## ") {
            current_section = heading.trim().to_owned();
            continue;
        }
        if let Some(rest) = line.strip_prefix("- [")
            && let Some((id_text, _)) = rest.split_once(']')
            && let Ok(id) = WuId::new(id_text)
        {
            entries.push((current_section.clone(), id));
        }
    }
    entries
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Exposure, Lane, Priority, WuType};
    use crate::wu::TestPlan;

    fn spec(n: u64, status: WuStatus) -> WuSpec {
        WuSpec {
            id: WuId::from_number(n),
            title: format!("work {n}"),
            lane: Lane::new("Ops: Tooling").unwrap(),
            wu_type: WuType::Tooling,
            priority: Priority::P2,
            status,
            created: "2026-07-01".to_owned(),
            exposure: Exposure::BackendOnly,
            description: "d".to_owned(),
            acceptance: vec!["a".to_owned()],
            code_paths: vec![],
            tests: TestPlan::default(),
            dependencies: vec![],
            blocked_by: vec![],
            blocks: vec![],
            labels: vec![],
            assigned_to: None,
            initiative: None,
            phase: None,
            spec_refs: vec![],
            notes: None,
            risks: vec![],
            sizing: None,
            worktree_path: None,
            claimed_mode: None,
            claimed_branch: None,
            completed_at: None,
            locked: status == WuStatus::Done,
        }
    }

    #[test]
    fn backlog_places_each_status_in_its_section() {
        let specs = vec![
            spec(100, WuStatus::Ready),
            spec(101, WuStatus::InProgress),
            spec(102, WuStatus::Blocked),
            spec(103, WuStatus::Done),
        ];
        let backlog = generate_backlog(&specs);
        let entries = backlog_entries(&backlog);
        assert_eq!(
            entries,
            vec![
                ("Ready".to_owned(), WuId::from_number(100)),
                ("In Progress".to_owned(), WuId::from_number(101)),
                ("Blocked".to_owned(), WuId::from_number(102)),
                ("Done".to_owned(), WuId::from_number(103)),
            ]
        );
    }

    #[test]
    fn backlog_is_byte_identical_across_runs() {
        let specs = vec![spec(1, WuStatus::Ready), spec(2, WuStatus::Done)];
        assert_eq!(generate_backlog(&specs), generate_backlog(&specs));
        assert_eq!(generate_status(&specs), generate_status(&specs));
    }

    #[test]
    fn backlog_is_insensitive_to_input_order() {
        let a = vec![spec(1, WuStatus::Ready), spec(2, WuStatus::Ready)];
        let b = vec![spec(2, WuStatus::Ready), spec(1, WuStatus::Ready)];
        assert_eq!(generate_backlog(&a), generate_backlog(&b));
    }

    #[test]
    fn backlog_entry_links_the_yaml() {
        let backlog = generate_backlog(&[spec(300, WuStatus::Done)]);
        let lines: Vec<&str> = backlog
            .lines()
            .filter(|l| l.contains("wu/WU-300.yaml"))
            .collect();
        assert_eq!(lines.len(), 1, "exactly one line references the spec");
        assert!(lines[0].starts_with("- [WU-300](wu/WU-300.yaml)"));
    }

    #[test]
    fn backlog_front_matter_declares_sections() {
        let backlog = generate_backlog(&[]);
        assert!(backlog.starts_with("---\n"));
        assert!(backlog.contains("heading: '## Ready'") || backlog.contains("heading: \"## Ready\""));
        assert!(backlog.contains("insert: append"));
    }

    #[test]
    fn empty_sections_render_a_placeholder() {
        let backlog = generate_backlog(&[spec(1, WuStatus::Ready)]);
        assert!(backlog.contains("(none)"));
    }

    #[test]
    fn status_counts_and_lanes() {
        let specs = vec![
            spec(1, WuStatus::Ready),
            spec(2, WuStatus::InProgress),
            spec(3, WuStatus::Done),
        ];
        let status = generate_status(&specs);
        assert!(status.contains("| ready | 1 |"));
        assert!(status.contains("| in_progress | 1 |"));
        assert!(status.contains("| done | 1 |"));
        assert!(status.contains("| Ops: Tooling | WU-2 | in_progress |"));
        assert!(!status.contains("WU-3 |"), "done WUs do not occupy lanes");
    }

    #[test]
    fn stage_projections_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let rels = stage_projections(dir.path(), &[spec(1, WuStatus::Ready)]).unwrap();
        assert_eq!(rels.len(), 2);
        for rel in rels {
            assert!(dir.path().join(rel).is_file());
        }
    }

    #[test]
    fn backlog_entries_handles_hand_edited_duplicates() {
        // The doctor feeds real-world files in here, including broken ones.
        let content = "---\nsections: []\n---\n\n# Backlog\n\n## In Progress\n\n\
                       - [WU-300](wu/WU-300.yaml) work (L)\n\n## Done\n\n\
                       - [WU-300](wu/WU-300.yaml) work (L)\n";
        let entries = backlog_entries(content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "In Progress");
        assert_eq!(entries[1].0, "Done");
    }
}
