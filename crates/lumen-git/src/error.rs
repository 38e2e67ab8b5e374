//! Error type for git operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`GitClient`](crate::GitClient) implementations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A git command exited non-zero.
    #[error("`{command}` failed{}: {stderr}", exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
    Command {
        /// The full command line that was run (e.g. `"git worktree add …"`).
        command: String,
        /// Captured stderr, trimmed.
        stderr: String,
        /// Exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
    },

    /// The requested worktree is not registered with the repository.
    #[error("no worktree registered at {}", path.display())]
    WorktreeNotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// The process could not be spawned or its output read.
    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// The stderr text of a failed command, or an empty string for other
    /// variants. Retry classifiers match transient patterns against this.
    #[must_use]
    pub fn stderr(&self) -> &str {
        match self {
            Self::Command { stderr, .. } => stderr,
            _ => "",
        }
    }

    /// Whether this error is a true merge/rebase content conflict.
    /// Conflicts are never retried.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        let s = self.stderr();
        s.contains("CONFLICT") || s.contains("could not apply") || s.contains("Merge conflict")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_display_includes_exit_code_and_stderr() {
        let err = GitError::Command {
            command: "git push origin main".to_owned(),
            stderr: "remote hung up".to_owned(),
            exit_code: Some(128),
        };
        let msg = format!("{err}");
        assert!(msg.contains("git push origin main"));
        assert!(msg.contains("exit code 128"));
        assert!(msg.contains("remote hung up"));
    }

    #[test]
    fn command_display_without_exit_code() {
        let err = GitError::Command {
            command: "git fetch".to_owned(),
            stderr: "killed".to_owned(),
            exit_code: None,
        };
        let msg = format!("{err}");
        assert!(!msg.contains("exit code"));
    }

    #[test]
    fn stderr_accessor() {
        let err = GitError::Command {
            command: "git merge".to_owned(),
            stderr: "not possible to fast-forward".to_owned(),
            exit_code: Some(1),
        };
        assert_eq!(err.stderr(), "not possible to fast-forward");

        let io = GitError::Io(std::io::Error::other("boom"));
        assert_eq!(io.stderr(), "");
    }

    #[test]
    fn conflict_detection() {
        let conflict = GitError::Command {
            command: "git rebase origin/main".to_owned(),
            stderr: "CONFLICT (content): Merge conflict in tasks/backlog.md".to_owned(),
            exit_code: Some(1),
        };
        assert!(conflict.is_conflict());

        let transient = GitError::Command {
            command: "git push".to_owned(),
            stderr: "error: Cannot lock ref 'refs/heads/main'".to_owned(),
            exit_code: Some(1),
        };
        assert!(!transient.is_conflict());
    }
}
