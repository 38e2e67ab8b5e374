//! Core work-unit types for LumenFlow.
//!
//! Foundation types used throughout the engine: work-unit identifiers,
//! lanes, lifecycle statuses, and the small closed enums a WU spec carries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// What kind of value failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A work-unit identifier.
    WuId,
    /// A lane name.
    Lane,
}

/// A value failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// What kind of value was being validated.
    pub kind: ErrorKind,
    /// The offending input.
    pub value: String,
    /// Why it is invalid.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            ErrorKind::WuId => "work-unit id",
            ErrorKind::Lane => "lane",
        };
        write!(f, "invalid {what} '{}': {}", self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// WuId
// ---------------------------------------------------------------------------

/// A validated work-unit identifier of shape `WU-<integer>`.
///
/// Ordered numerically, so `WU-9 < WU-10` (string ordering would invert
/// them, which matters for sequential ID generation and sorted projections).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WuId(u64);

impl WuId {
    /// Parse a `WU-<integer>` string.
    ///
    /// # Errors
    /// Returns an error if the input is not `WU-` followed by an integer.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        let err = |reason: &str| ValidationError {
            kind: ErrorKind::WuId,
            value: s.to_owned(),
            reason: reason.to_owned(),
        };
        let digits = s.strip_prefix("WU-").ok_or_else(|| err("must start with 'WU-'"))?;
        if digits.is_empty() {
            return Err(err("missing number after 'WU-'"));
        }
        let n: u64 = digits
            .parse()
            .map_err(|_| err("the part after 'WU-' must be an integer"))?;
        Ok(Self(n))
    }

    /// Construct from a raw sequence number.
    #[must_use]
    pub const fn from_number(n: u64) -> Self {
        Self(n)
    }

    /// The numeric part of the ID.
    #[must_use]
    pub const fn number(self) -> u64 {
        self.0
    }

    /// The lowercase rendering used in branch names (`wu-100`).
    #[must_use]
    pub fn lowercase(self) -> String {
        format!("wu-{}", self.0)
    }
}

impl fmt::Display for WuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WU-{}", self.0)
    }
}

impl FromStr for WuId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for WuId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<WuId> for String {
    fn from(id: WuId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// Lane
// ---------------------------------------------------------------------------

/// A named work stream: `"Parent"` or `"Parent: SubLane"` with exactly one
/// space after the colon. Lanes are WIP-1.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Lane(String);

impl Lane {
    /// Validate and construct a lane name.
    ///
    /// # Errors
    /// Returns an error for empty names, stray whitespace, or malformed
    /// `Parent: SubLane` separators.
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let err = |reason: String| ValidationError {
            kind: ErrorKind::Lane,
            value: s.to_owned(),
            reason,
        };
        if s.is_empty() {
            return Err(err("must not be empty".to_owned()));
        }
        if s.trim() != s {
            return Err(err("must not have leading or trailing whitespace".to_owned()));
        }
        match s.matches(':').count() {
            0 => Ok(()),
            1 => {
                let (parent, rest) = s.split_once(':').unwrap_or((s, ""));
                if parent.is_empty() {
                    return Err(err("parent part before ':' must not be empty".to_owned()));
                }
                let Some(sub) = rest.strip_prefix(' ') else {
                    return Err(err(
                        "expected exactly one space after ':' (e.g. 'Ops: Tooling')".to_owned(),
                    ));
                };
                if sub.is_empty() || sub.starts_with(' ') {
                    return Err(err(
                        "expected exactly one space after ':' (e.g. 'Ops: Tooling')".to_owned(),
                    ));
                }
                Ok(())
            }
            n => Err(err(format!("expected at most one ':', found {n}"))),
        }
    }

    /// The lane name as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kebab-case rendering used in lock-file and branch names:
    /// `"Ops: Tooling"` → `"ops-tooling"`.
    #[must_use]
    pub fn kebab(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut last_dash = true;
        for c in self.0.chars() {
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
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Lane {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Lane {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Lane> for String {
    fn from(lane: Lane) -> Self {
        lane.0
    }
}

/// The lane branch for a claimed WU: `lane/<kebab(lane)>/<lowercase(id)>`.
#[must_use]
pub fn lane_branch(lane: &Lane, id: WuId) -> String {
    format!("lane/{}/{}", lane.kebab(), id.lowercase())
}

// ---------------------------------------------------------------------------
// WuStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a work unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WuStatus {
    /// Specified, unclaimed, available for work.
    Ready,
    /// Claimed and actively worked.
    InProgress,
    /// Claimed but waiting on something; still occupies its lane.
    Blocked,
    /// Completed and locked.
    Done,
}

impl WuStatus {
    /// Map a legacy status string into the current alphabet.
    /// Unclaimed variants normalize to `Ready`, terminal variants to `Done`.
    #[must_use]
    pub fn from_legacy(s: &str) -> Option<Self> {
        match s {
            "ready" | "unclaimed" | "todo" | "backlog" => Some(Self::Ready),
            "in_progress" | "in-progress" | "claimed" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "done" | "completed" | "complete" | "shipped" | "closed" => Some(Self::Done),
            _ => None,
        }
    }

    /// `true` for statuses that occupy a lane's WIP slot.
    #[must_use]
    pub const fn occupies_lane(self) -> bool {
        matches!(self, Self::InProgress | Self::Blocked)
    }
}

impl fmt::Display for WuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Closed spec enums
// ---------------------------------------------------------------------------

/// The kind of work a WU represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WuType {
    Feature,
    Bug,
    Refactor,
    Tooling,
    Documentation,
    Process,
}

impl fmt::Display for WuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Refactor => "refactor",
            Self::Tooling => "tooling",
            Self::Documentation => "documentation",
            Self::Process => "process",
        };
        f.write_str(s)
    }
}

/// Priority band.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    #[default]
    P2,
    P3,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        };
        f.write_str(s)
    }
}

/// Where the work surfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Exposure {
    Ui,
    Api,
    BackendOnly,
    Documentation,
}

impl fmt::Display for Exposure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ui => "ui",
            Self::Api => "api",
            Self::BackendOnly => "backend-only",
            Self::Documentation => "documentation",
        };
        f.write_str(s)
    }
}

/// How a claim isolates its work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimMode {
    /// A dedicated worktree on the lane branch (the default).
    #[default]
    Worktree,
    /// Work happens on a pre-existing branch; no worktree is created.
    BranchPr,
}

impl fmt::Display for ClaimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Worktree => "worktree",
            Self::BranchPr => "branch-pr",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
