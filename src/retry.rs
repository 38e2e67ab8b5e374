//! Retry policy for transient git/network failures.
//!
//! Exponential backoff with a jitter factor and a classifier that decides
//! whether an error is worth another attempt. Conflicts are never retried;
//! the enumerated transient patterns always are. Everything else is
//! permanent and aborts immediately.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::LumenError;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// A retry schedule: `delay(n) = min(base * multiplier^(n-1), max)` with a
/// `± jitter` random factor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for the first retry.
    pub base: Duration,
    /// Delay cap.
    pub max: Duration,
    /// Backoff multiplier per attempt.
    pub multiplier: f64,
    /// Jitter factor in `0.0..=1.0`; 0.15 means `delay * (0.85..1.15)`.
    pub jitter: f64,
}

impl RetryPolicy {
    /// The preset used by completion-style operations: 6 attempts, base 2s,
    /// cap 60s, 15% jitter.
    #[must_use]
    pub const fn wu_done() -> Self {
        Self {
            max_attempts: 6,
            base: Duration::from_secs(2),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.15,
        }
    }

    /// A policy that never sleeps; for tests and dry runs.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base: Duration::ZERO,
            max: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Build from the repository config.
    #[must_use]
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base: Duration::from_millis(cfg.base_ms),
            max: Duration::from_millis(cfg.max_ms),
            multiplier: cfg.multiplier,
            jitter: cfg.jitter.clamp(0.0, 1.0),
        }
    }

    /// The delay before retry number `attempt` (1-indexed), jittered.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = self.multiplier.max(1.0).powi(exponent as i32);
        let raw = self.base.as_millis() as f64 * factor;
        let capped = raw.min(self.max.as_millis() as f64);
        if self.jitter <= 0.0 {
            return Duration::from_millis(capped as u64);
        }
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        let jittered = (capped * (1.0 + spread)).max(0.0);
        Duration::from_millis(jittered as u64)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// What a failed attempt means for the retry loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt after backoff.
    Transient,
    /// A true content conflict; abort immediately, never retry.
    Conflict,
    /// Abort immediately.
    Permanent,
}

/// Patterns that mark a git failure as transient infrastructure trouble.
const TRANSIENT_PATTERNS: [&str; 8] = [
    "Cannot lock ref",
    "cannot lock ref",
    "not possible to fast-forward",
    "ETIMEDOUT",
    "ECONNRESET",
    "fetch first",
    "failed to push some refs",
    "Could not read from remote",
];

/// Classify a git error by kind tag and stringified form.
#[must_use]
pub fn classify_git(err: &lumen_git::GitError) -> ErrorClass {
    if err.is_conflict() {
        return ErrorClass::Conflict;
    }
    let stderr = err.stderr();
    if TRANSIENT_PATTERNS.iter().any(|p| stderr.contains(p)) {
        return ErrorClass::Transient;
    }
    // Spawn-level I/O (e.g. interrupted) is not retryable state damage
    // either way; treat as permanent so the caller cleans up.
    ErrorClass::Permanent
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Run `op` under `policy`, classifying each failure.
///
/// Transient failures sleep and retry until the attempt budget runs out,
/// then surface as [`LumenError::RetryExhaustion`]. Conflicts surface as
/// [`LumenError::MergeConflict`]; permanent failures pass through as git
/// errors.
///
/// # Errors
/// See above.
pub fn run_with_retry<T>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: impl FnMut(u32) -> Result<T, lumen_git::GitError>,
) -> Result<T, LumenError> {
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(e) => match classify_git(&e) {
                ErrorClass::Conflict => {
                    return Err(LumenError::MergeConflict {
                        op: op_name.to_owned(),
                        detail: e.to_string(),
                    });
                }
                ErrorClass::Permanent => return Err(e.into()),
                ErrorClass::Transient => {
                    if attempt >= policy.max_attempts {
                        return Err(LumenError::RetryExhaustion {
                            op: op_name.to_owned(),
                            attempts: attempt,
                            last: e.to_string(),
                        });
                    }
                    let delay = policy.delay_for(attempt);
                    warn!(
                        op = op_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure; backing off"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
