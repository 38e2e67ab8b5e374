//! Engine error types for LumenFlow.
//!
//! Defines [`LumenError`], the unified error type for all lifecycle
//! operations. Error messages are designed to be agent-friendly: each
//! variant includes a clear description of what went wrong and actionable
//! guidance on how to fix it.
//!
//! The variants group into the engine's error taxonomy: validation,
//! precondition, transient-infrastructure (surfaced as `RetryExhaustion`),
//! conflict, drift, and internal. The taxonomy drives the process exit code:
//! validation/precondition/conflict/drift exit 1, infrastructure exits 2.

use std::fmt;
use std::path::PathBuf;

use crate::model::{Lane, ValidationError, WuId, WuStatus};

// ---------------------------------------------------------------------------
// LumenError
// ---------------------------------------------------------------------------

/// Unified error type for work-unit lifecycle operations.
///
/// Each variant is designed to be self-contained: an agent receiving this
/// error should be able to understand what happened and what to do next
/// without additional context.
#[derive(Debug)]
pub enum LumenError {
    /// A WU spec failed the validation pipeline (schema, lint, placeholder,
    /// or reality check).
    SpecValidation {
        /// The WU being written, when known.
        wu_id: Option<WuId>,
        /// One line per problem found.
        problems: Vec<String>,
    },

    /// A value (id, lane) failed structural validation.
    InvalidValue(ValidationError),

    /// A verb was invoked against a WU in the wrong lifecycle status.
    WrongStatus {
        /// The WU.
        wu_id: WuId,
        /// The verb that was attempted.
        verb: &'static str,
        /// The status the verb requires.
        expected: &'static str,
        /// The status the WU is actually in.
        actual: WuStatus,
    },

    /// The lane's WIP slot is already taken.
    LaneOccupied {
        /// The contested lane.
        lane: Lane,
        /// The WU currently holding the lane.
        holder: WuId,
    },

    /// A WU with this ID already exists.
    DuplicateWu {
        /// The contested ID.
        wu_id: WuId,
    },

    /// The requested WU does not exist.
    WuNotFound {
        /// The ID that was looked up.
        wu_id: WuId,
    },

    /// Cloud mode was requested while checked out on the shared branch.
    CloudOnSharedBranch {
        /// The protected branch name.
        branch: String,
    },

    /// The main checkout is not in the state a transaction requires.
    DirtyCheckout {
        /// What precondition failed.
        detail: String,
    },

    /// A transient infrastructure failure persisted through every retry.
    RetryExhaustion {
        /// The operation that was being retried.
        op: String,
        /// How many attempts were made.
        attempts: u32,
        /// The last underlying error, stringified.
        last: String,
    },

    /// A true content conflict; never retried.
    MergeConflict {
        /// The operation that conflicted.
        op: String,
        /// Conflict detail from git.
        detail: String,
    },

    /// Drift detected that cannot be auto-repaired.
    Drift {
        /// One line per finding.
        findings: Vec<String>,
    },

    /// An internal invariant broke. State must be re-derived from the log.
    Internal {
        /// What broke.
        detail: String,
    },

    /// A git command failed (non-transient, non-conflict).
    Git(lumen_git::GitError),

    /// A configuration file could not be loaded or parsed.
    Config {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// An I/O error occurred during an engine operation.
    Io(std::io::Error),
}

impl LumenError {
    /// The process exit code for this error: 1 for validation-class
    /// failures, 2 for infrastructure failures.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::SpecValidation { .. }
            | Self::InvalidValue(_)
            | Self::WrongStatus { .. }
            | Self::LaneOccupied { .. }
            | Self::DuplicateWu { .. }
            | Self::WuNotFound { .. }
            | Self::CloudOnSharedBranch { .. }
            | Self::DirtyCheckout { .. }
            | Self::MergeConflict { .. }
            | Self::Drift { .. } => 1,
            Self::RetryExhaustion { .. }
            | Self::Internal { .. }
            | Self::Git(_)
            | Self::Config { .. }
            | Self::Io(_) => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Display — agent-friendly error messages
// ---------------------------------------------------------------------------

impl fmt::Display for LumenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpecValidation { wu_id, problems } => {
                match wu_id {
                    Some(id) => write!(f, "spec validation failed for {id}:")?,
                    None => write!(f, "spec validation failed:")?,
                }
                for p in problems {
                    write!(f, "\n  - {p}")?;
                }
                write!(f, "\n  To fix: correct the fields above and retry the same command.")
            }
            Self::InvalidValue(e) => write!(f, "{e}"),
            Self::WrongStatus {
                wu_id,
                verb,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "cannot {verb} {wu_id}: status is '{actual}', expected '{expected}'.\n  \
                     Check the current state:\n    wu status\n  \
                     Release a stuck claim:\n    wu release {wu_id}"
                )
            }
            Self::LaneOccupied { lane, holder } => {
                write!(
                    f,
                    "lane '{lane}' is occupied by {holder} (WIP limit is 1).\n  \
                     Complete or release the holder first:\n    wu complete {holder}\n    wu release {holder}"
                )
            }
            Self::DuplicateWu { wu_id } => {
                write!(
                    f,
                    "{wu_id} already exists.\n  \
                     Omit --id to auto-generate the next sequential ID, or edit the existing spec:\n    wu edit {wu_id}"
                )
            }
            Self::WuNotFound { wu_id } => {
                write!(
                    f,
                    "{wu_id} not found.\n  \
                     List known work units:\n    wu status\n  \
                     Create it:\n    wu create --id {wu_id}"
                )
            }
            Self::CloudOnSharedBranch { branch } => {
                write!(
                    f,
                    "cloud mode is forbidden on the shared branch '{branch}'.\n  \
                     Check out the WU's claimed branch first, or unset CLOUD to use a micro-worktree."
                )
            }
            Self::DirtyCheckout { detail } => {
                write!(
                    f,
                    "the main checkout is not ready for a transaction: {detail}\n  \
                     Commit or stash local changes, then retry. Run `git status` for details."
                )
            }
            Self::RetryExhaustion { op, attempts, last } => {
                write!(
                    f,
                    "{op} still failing after {attempts} attempt(s): {last}\n  \
                     This is an infrastructure failure, not a state problem. Check connectivity and retry;\n  \
                     if temp branches were left behind, clean up with:\n    wu prune"
                )
            }
            Self::MergeConflict { op, detail } => {
                write!(
                    f,
                    "{op} hit a content conflict: {detail}\n  \
                     Conflicts are never retried. Resolve manually in a checkout of the branch, then retry."
                )
            }
            Self::Drift { findings } => {
                write!(f, "consistency drift detected:")?;
                for line in findings {
                    write!(f, "\n  - {line}")?;
                }
                write!(
                    f,
                    "\n  Inspect and repair:\n    wu repair --dry-run\n    wu repair"
                )
            }
            Self::Internal { detail } => {
                write!(
                    f,
                    "internal invariant broken: {detail}\n  \
                     Refusing to continue. State will be re-derived from the event log on next load;\n  \
                     run:\n    wu repair --dry-run"
                )
            }
            Self::Git(e) => {
                write!(
                    f,
                    "git operation failed: {e}\n  To fix: check repository state with `git status` and retry."
                )
            }
            Self::Config { path, detail } => {
                write!(
                    f,
                    "configuration error in '{}': {detail}\n  To fix: edit the config file and correct the issue.",
                    path.display()
                )
            }
            Self::Io(e) => {
                write!(
                    f,
                    "I/O error: {e}\n  To fix: check file permissions and disk space."
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// std::error::Error
// ---------------------------------------------------------------------------

impl std::error::Error for LumenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Git(e) => Some(e),
            Self::InvalidValue(e) => Some(e),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// From impls
// ---------------------------------------------------------------------------

impl From<std::io::Error> for LumenError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<lumen_git::GitError> for LumenError {
    fn from(e: lumen_git::GitError) -> Self {
        Self::Git(e)
    }
}

impl From<ValidationError> for LumenError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidValue(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn wu(n: u64) -> WuId {
        WuId::from_number(n)
    }

    #[test]
    fn display_wrong_status_suggests_commands() {
        let err = LumenError::WrongStatus {
            wu_id: wu(100),
            verb: "complete",
            expected: "in_progress",
            actual: WuStatus::Blocked,
        };
        let msg = format!("{err}");
        assert!(msg.contains("WU-100"));
        assert!(msg.contains("blocked"));
        assert!(msg.contains("wu release WU-100"));
    }

    #[test]
    fn display_lane_occupied() {
        let err = LumenError::LaneOccupied {
            lane: Lane::new("Ops: Tooling").unwrap(),
            holder: wu(7),
        };
        let msg = format!("{err}");
        assert!(msg.contains("Ops: Tooling"));
        assert!(msg.contains("WU-7"));
        assert!(msg.contains("wu release WU-7"));
    }

    #[test]
    fn display_spec_validation_lists_problems() {
        let err = LumenError::SpecValidation {
            wu_id: Some(wu(3)),
            problems: vec![
                "description is empty".to_owned(),
                "no acceptance criteria".to_owned(),
            ],
        };
        let msg = format!("{err}");
        assert!(msg.contains("WU-3"));
        assert!(msg.contains("description is empty"));
        assert!(msg.contains("no acceptance criteria"));
    }

    #[test]
    fn display_retry_exhaustion() {
        let err = LumenError::RetryExhaustion {
            op: "push to origin".to_owned(),
            attempts: 6,
            last: "ECONNRESET".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("6 attempt(s)"));
        assert!(msg.contains("ECONNRESET"));
        assert!(msg.contains("wu prune"));
    }

    #[test]
    fn display_cloud_on_shared_branch() {
        let err = LumenError::CloudOnSharedBranch {
            branch: "main".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("forbidden"));
        assert!(msg.contains("main"));
    }

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(
            LumenError::WuNotFound { wu_id: wu(1) }.exit_code(),
            1,
            "precondition failures exit 1"
        );
        assert_eq!(
            LumenError::MergeConflict {
                op: "merge".to_owned(),
                detail: String::new()
            }
            .exit_code(),
            1,
            "conflicts are state problems, not infrastructure"
        );
        assert_eq!(
            LumenError::RetryExhaustion {
                op: "push".to_owned(),
                attempts: 6,
                last: String::new()
            }
            .exit_code(),
            2
        );
        assert_eq!(LumenError::Io(std::io::Error::other("x")).exit_code(), 2);
    }

    #[test]
    fn source_chain() {
        let err = LumenError::Io(std::io::Error::other("disk"));
        assert!(std::error::Error::source(&err).is_some());
        let err = LumenError::DuplicateWu { wu_id: wu(1) };
        assert!(std::error::Error::source(&err).is_none());
    }
}
