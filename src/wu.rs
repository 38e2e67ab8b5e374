//! The per-WU YAML document model.
//!
//! [`WuSpec`] is the authoritative spec for one work unit. Reads tolerate
//! legacy documents (old field names, old status vocabularies) by rewriting
//! the raw YAML value before deserialization; writes always emit the current
//! schema.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{ClaimMode, Exposure, Lane, Priority, WuId, WuStatus, WuType};

// ---------------------------------------------------------------------------
// WuSpec
// ---------------------------------------------------------------------------

/// The test plan attached to a WU.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestPlan {
    /// Manual verification steps.
    #[serde(default)]
    pub manual: Vec<String>,
    /// Unit test paths.
    #[serde(default)]
    pub unit: Vec<String>,
    /// End-to-end test paths.
    #[serde(default)]
    pub e2e: Vec<String>,
}

impl TestPlan {
    /// `true` if no tests of any kind are listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manual.is_empty() && self.unit.is_empty() && self.e2e.is_empty()
    }
}

/// Optional sizing estimate. If any of the three is given, all must be;
/// deserialization enforces this (no field is defaulted).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizingEstimate {
    /// Expected number of files touched.
    pub files: u32,
    /// Expected tool-call budget.
    #[serde(rename = "tool_calls")]
    pub tool_calls: u32,
    /// One-line strategy description.
    pub strategy: String,
}

/// A work-unit specification document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WuSpec {
    /// Stable identifier.
    pub id: WuId,
    /// Short imperative title.
    pub title: String,
    /// The lane this WU occupies when claimed.
    pub lane: Lane,
    /// Work category.
    #[serde(rename = "type")]
    pub wu_type: WuType,
    /// Priority band.
    #[serde(default)]
    pub priority: Priority,
    /// Lifecycle status; must agree with the folded event stream.
    pub status: WuStatus,
    /// Creation date, `YYYY-MM-DD`.
    pub created: String,
    /// Where the work surfaces.
    pub exposure: Exposure,
    /// What and why.
    #[serde(default)]
    pub description: String,
    /// Ordered acceptance criteria.
    #[serde(default)]
    pub acceptance: Vec<String>,
    /// Repo-relative globs the work is allowed to touch.
    #[serde(default)]
    pub code_paths: Vec<String>,
    /// The test plan.
    #[serde(default)]
    pub tests: TestPlan,
    /// Soft dependencies.
    #[serde(default)]
    pub dependencies: Vec<WuId>,
    /// WUs that must complete before this one.
    #[serde(default)]
    pub blocked_by: Vec<WuId>,
    /// WUs waiting on this one.
    #[serde(default)]
    pub blocks: Vec<WuId>,
    /// Free-form labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Assignee, when pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    /// Owning initiative slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiative: Option<String>,
    /// Initiative phase (1-based).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<u32>,
    /// Links into design/spec documents.
    #[serde(default)]
    pub spec_refs: Vec<String>,
    /// Working notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Known risks.
    #[serde(default)]
    pub risks: Vec<String>,
    /// Sizing estimate (all-or-nothing block).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sizing: Option<SizingEstimate>,
    /// The claim worktree, while claimed in worktree mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    /// How the current claim isolates its work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_mode: Option<ClaimMode>,
    /// The claimed branch, in branch-pr mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_branch: Option<String>,
    /// Completion timestamp (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// `true` once done; done specs are immutable apart from a small
    /// metadata whitelist.
    #[serde(default)]
    pub locked: bool,
}

impl WuSpec {
    /// Serialize to YAML in the current schema.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Parse a spec document, accepting legacy field names and statuses.
    ///
    /// # Errors
    /// Returns an error for YAML that is invalid after legacy rewriting.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(text)?;
        rewrite_legacy(&mut value);
        serde_yaml::from_value(value)
    }

    /// Clear all claim-scoped fields (on release, or after completion).
    pub fn clear_claim(&mut self) {
        self.worktree_path = None;
        self.claimed_mode = None;
        self.claimed_branch = None;
    }

    /// Normalize field shapes in place: dates to `YYYY-MM-DD`, stray
    /// embedded newlines in list items collapsed to single spaces.
    pub fn normalize(&mut self) {
        self.created = normalize_date(&self.created);
        for list in [
            &mut self.acceptance,
            &mut self.code_paths,
            &mut self.labels,
            &mut self.spec_refs,
            &mut self.risks,
        ] {
            for item in list.iter_mut() {
                *item = collapse_newlines(item);
            }
        }
    }
}

/// Truncate timestamp-widened dates back to `YYYY-MM-DD`.
fn normalize_date(s: &str) -> String {
    let candidate = s.split(['T', ' ']).next().unwrap_or(s);
    if chrono::NaiveDate::parse_from_str(candidate, "%Y-%m-%d").is_ok() {
        candidate.to_owned()
    } else {
        s.to_owned()
    }
}

fn collapse_newlines(s: &str) -> String {
    if !s.contains('\n') {
        return s.to_owned();
    }
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Legacy rewriting
// ---------------------------------------------------------------------------

/// Rewrite legacy documents into the current schema, preserving intent:
/// `summary` → `description`, string-valued `risks` → one-element list,
/// `test_paths` → `tests.unit`, legacy statuses → the current alphabet.
fn rewrite_legacy(value: &mut serde_yaml::Value) {
    let Some(map) = value.as_mapping_mut() else {
        return;
    };

    let key = |s: &str| serde_yaml::Value::String(s.to_owned());

    if !map.contains_key("description")
        && let Some(summary) = map.remove("summary")
    {
        map.insert(key("description"), summary);
    }

    if let Some(risks) = map.get_mut("risks")
        && risks.is_string()
    {
        let single = risks.clone();
        *risks = serde_yaml::Value::Sequence(vec![single]);
    }

    if !map.contains_key("tests")
        && let Some(paths) = map.remove("test_paths")
        && paths.is_sequence()
    {
        let mut tests = serde_yaml::Mapping::new();
        tests.insert(key("unit"), paths);
        map.insert(key("tests"), serde_yaml::Value::Mapping(tests));
    }

    if let Some(status) = map.get_mut("status")
        && let Some(s) = status.as_str()
        && let Some(normalized) = WuStatus::from_legacy(s)
    {
        *status = serde_yaml::Value::String(normalized.to_string());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
