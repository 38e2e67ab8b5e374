//! Schema-validated read/write of per-WU YAML specs.
//!
//! Writing runs a layered pipeline: per-status schema validation,
//! normalization, spec-lint against the repo invariants side file, a
//! placeholder check for strict writes, and an optional reality check that
//! every referenced path exists on disk. Reads accept legacy documents via
//! [`WuSpec::from_yaml`]'s rewriting.

use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::Deserialize;
use tracing::debug;

use crate::error::LumenError;
use crate::layout::Layout;
use crate::model::{ClaimMode, WuId, WuStatus, WuType};
use crate::wu::WuSpec;

// ---------------------------------------------------------------------------
// WriteMode
// ---------------------------------------------------------------------------

/// How much of the pipeline a write runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Schema + lint + placeholder check.
    #[default]
    Strict,
    /// Everything in `Strict`, plus the on-disk reality check.
    StrictReality,
    /// Schema + lint only. Used by repair paths that must be able to write
    /// imperfect-but-valid documents.
    Relaxed,
}

// ---------------------------------------------------------------------------
// Repo invariants side file
// ---------------------------------------------------------------------------

/// Cross-cutting invariants from `tools/invariants.yml`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RepoInvariants {
    /// Globs no WU's `code_paths` may collide with.
    #[serde(default)]
    pub protected_paths: Vec<String>,
}

impl RepoInvariants {
    /// Load the side file; missing file → no invariants.
    ///
    /// # Errors
    /// Fails on unreadable or unparseable YAML.
    pub fn load(path: &Path) -> Result<Self, LumenError> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        serde_yaml::from_str(&text).map_err(|e| LumenError::Config {
            path: path.to_owned(),
            detail: format!("invalid invariants file: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// SpecStore
// ---------------------------------------------------------------------------

/// Reads and validates per-WU YAML documents under a [`Layout`].
#[derive(Clone, Debug)]
pub struct SpecStore {
    layout: Layout,
}

impl SpecStore {
    /// Create a store over `layout`.
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// `true` if a spec file exists for `id`.
    #[must_use]
    pub fn exists(&self, id: WuId) -> bool {
        self.layout.wu_file(id).is_file()
    }

    /// Read one spec, applying legacy normalization.
    ///
    /// # Errors
    /// [`LumenError::WuNotFound`] when absent; validation errors when the
    /// document does not parse or its `id` disagrees with the filename.
    pub fn read(&self, id: WuId) -> Result<WuSpec, LumenError> {
        let path = self.layout.wu_file(id);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LumenError::WuNotFound { wu_id: id });
            }
            Err(e) => return Err(e.into()),
        };
        let spec = WuSpec::from_yaml(&text).map_err(|e| LumenError::SpecValidation {
            wu_id: Some(id),
            problems: vec![format!("{}: {e}", path.display())],
        })?;
        if spec.id != id {
            return Err(LumenError::SpecValidation {
                wu_id: Some(id),
                problems: vec![format!(
                    "file {} declares id {} (filename and id must agree)",
                    path.display(),
                    spec.id
                )],
            });
        }
        Ok(spec)
    }

    /// Read every spec under `tasks/wu/`, ordered by ID.
    ///
    /// # Errors
    /// Fails on the first unreadable or invalid document.
    pub fn read_all(&self) -> Result<Vec<WuSpec>, LumenError> {
        let mut ids = self.read_ids()?;
        ids.sort_unstable();
        ids.iter().map(|id| self.read(*id)).collect()
    }

    /// The highest existing WU number, if any spec exists.
    ///
    /// # Errors
    /// Propagates directory read errors.
    pub fn max_id(&self) -> Result<Option<WuId>, LumenError> {
        Ok(self.read_ids()?.into_iter().max())
    }

    /// Every WU ID with a spec file, unordered.
    ///
    /// # Errors
    /// Propagates directory read errors.
    pub fn read_ids(&self) -> Result<Vec<WuId>, LumenError> {
        let dir = self.layout.wu_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".yaml")
                && let Ok(id) = WuId::new(stem)
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Run the full pipeline and return the normalized document ready for
    /// serialization.
    ///
    /// # Errors
    /// [`LumenError::SpecValidation`] listing every problem found.
    pub fn prepare(&self, spec: &WuSpec, mode: WriteMode) -> Result<WuSpec, LumenError> {
        let mut spec = spec.clone();
        spec.normalize();

        let mut problems = schema_problems(&spec);
        let invariants = RepoInvariants::load(&self.layout.invariants_file())?;
        problems.extend(lint_problems(&spec, &invariants));
        if matches!(mode, WriteMode::Strict | WriteMode::StrictReality) {
            problems.extend(placeholder_problems(&spec));
        }
        if mode == WriteMode::StrictReality {
            problems.extend(reality_problems(&spec, self.layout.root()));
        }

        if problems.is_empty() {
            debug!(wu = %spec.id, "spec passed validation pipeline");
            Ok(spec)
        } else {
            Err(LumenError::SpecValidation {
                wu_id: Some(spec.id),
                problems,
            })
        }
    }

    /// Serialize a prepared spec into `dir` (a worktree or the root),
    /// returning the repo-relative path for the commit file list.
    ///
    /// # Errors
    /// Fails on I/O or serialization errors.
    pub fn stage_write(&self, dir: &Path, spec: &WuSpec) -> Result<PathBuf, LumenError> {
        let rel = Layout::wu_rel(spec.id);
        let dst = dir.join(&rel);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let yaml = spec.to_yaml().map_err(|e| LumenError::Internal {
            detail: format!("spec serialization failed: {e}"),
        })?;
        std::fs::write(&dst, yaml)?;
        Ok(rel)
    }
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

/// Stage 1: per-status completeness.
fn schema_problems(spec: &WuSpec) -> Vec<String> {
    let mut problems = Vec::new();
    if spec.title.trim().is_empty() {
        problems.push("title must not be empty".to_owned());
    }
    if chrono::NaiveDate::parse_from_str(&spec.created, "%Y-%m-%d").is_err() {
        problems.push(format!("created '{}' is not a YYYY-MM-DD date", spec.created));
    }
    if spec.description.trim().is_empty() {
        problems.push("description must not be empty".to_owned());
    }
    if spec.acceptance.is_empty() {
        problems.push("at least one acceptance criterion is required".to_owned());
    }

    match spec.status {
        WuStatus::Ready => {
            if spec.locked {
                problems.push("a ready WU must not be locked".to_owned());
            }
        }
        WuStatus::InProgress | WuStatus::Blocked => {
            match spec.claimed_mode {
                None => problems.push("a claimed WU must record claimed_mode".to_owned()),
                Some(ClaimMode::Worktree) => {
                    if spec.worktree_path.is_none() {
                        problems
                            .push("worktree-mode claims must record worktree_path".to_owned());
                    }
                }
                Some(ClaimMode::BranchPr) => {
                    if spec.claimed_branch.is_none() {
                        problems
                            .push("branch-pr claims must record claimed_branch".to_owned());
                    }
                }
            }
            if spec.locked {
                problems.push("an in-flight WU must not be locked".to_owned());
            }
        }
        WuStatus::Done => {
            if spec.completed_at.is_none() {
                problems.push("a done WU must record completed_at".to_owned());
            }
            if !spec.locked {
                problems.push("a done WU must be locked".to_owned());
            }
        }
    }
    problems
}

/// Stage 3: cross-field lint against the repo invariants.
fn lint_problems(spec: &WuSpec, invariants: &RepoInvariants) -> Vec<String> {
    let mut problems = Vec::new();

    let patterns: Vec<Pattern> = spec
        .code_paths
        .iter()
        .filter_map(|g| Pattern::new(g).ok())
        .collect();
    for criterion in &spec.acceptance {
        for token in criterion.split_whitespace() {
            let token = token.trim_matches(|c: char| c.is_ascii_punctuation() && c != '/' && c != '.' && c != '_' && c != '-');
            if !looks_like_path(token) {
                continue;
            }
            let covered = patterns.iter().any(|p| p.matches(token))
                || spec.code_paths.iter().any(|c| c == token);
            if !covered {
                problems.push(format!(
                    "acceptance references '{token}' which is not covered by code_paths"
                ));
            }
        }
    }

    for protected in &invariants.protected_paths {
        let protected_pat = Pattern::new(protected).ok();
        for code_path in &spec.code_paths {
            let collides = protected_pat
                .as_ref()
                .is_some_and(|p| p.matches(code_path))
                || Pattern::new(code_path).is_ok_and(|p| p.matches(protected))
                || covers_prefix(code_path, protected);
            if collides {
                problems.push(format!(
                    "code_paths entry '{code_path}' collides with protected path '{protected}'"
                ));
            }
        }
    }

    if spec.wu_type == WuType::Feature && spec.spec_refs.is_empty() {
        problems.push("feature WUs require at least one spec reference".to_owned());
    }
    problems
}

/// A token that names a repo path: has a separator and an extension-ish dot,
/// or a glob tail.
fn looks_like_path(token: &str) -> bool {
    token.contains('/') && (token.contains('.') || token.contains('*'))
}

/// `src/flux/**` covers anything under `src/flux/`.
fn covers_prefix(code_path: &str, protected: &str) -> bool {
    code_path
        .strip_suffix("/**")
        .is_some_and(|prefix| protected.starts_with(prefix))
}

/// Stage 4: reject obvious placeholders on strict writes.
fn placeholder_problems(spec: &WuSpec) -> Vec<String> {
    const MARKERS: [&str; 4] = ["TODO", "FIXME", "TBD", "XXX"];
    let mut problems = Vec::new();
    let mut check = |field: &str, text: &str| {
        for marker in MARKERS {
            if text.contains(marker) {
                problems.push(format!("{field} contains placeholder '{marker}'"));
                return;
            }
        }
    };
    check("description", &spec.description);
    for (i, criterion) in spec.acceptance.iter().enumerate() {
        check(&format!("acceptance[{i}]"), criterion);
    }
    problems
}

/// Stage 5: every referenced path must exist on disk.
fn reality_problems(spec: &WuSpec, root: &Path) -> Vec<String> {
    let mut problems = Vec::new();
    for code_path in &spec.code_paths {
        let full = root.join(code_path);
        let matched = glob::glob(&full.to_string_lossy())
            .map(|mut paths| paths.any(|p| p.is_ok()))
            .unwrap_or(false);
        if !matched {
            problems.push(format!("code_paths entry '{code_path}' matches nothing on disk"));
        }
    }
    for test in spec.tests.unit.iter().chain(&spec.tests.e2e) {
        if !root.join(test).exists() {
            problems.push(format!("test path '{test}' does not exist"));
        }
    }
    problems
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
