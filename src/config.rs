//! LumenFlow repository configuration (`.lumenflow.toml`).
//!
//! Defines the typed configuration for the engine: shared-branch selection,
//! lock staleness windows, and the transactor retry schedule. Missing file →
//! all defaults (no error); parse errors carry line numbers.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Well-known config file name at the repository root.
pub const CONFIG_FILE: &str = ".lumenflow.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level LumenFlow repository configuration.
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LumenConfig {
    /// Repository-level settings.
    #[serde(default)]
    pub repo: RepoConfig,

    /// Lock staleness settings.
    #[serde(default)]
    pub locks: LockConfig,

    /// Transactor retry schedule.
    #[serde(default)]
    pub retry: RetryConfig,
}

// ---------------------------------------------------------------------------
// RepoConfig
// ---------------------------------------------------------------------------

/// Repository-level settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// The shared branch all transactions target (default: `"main"`).
    #[serde(default = "default_branch")]
    pub branch: String,

    /// The remote transactions push to (default: `"origin"`).
    #[serde(default = "default_remote")]
    pub remote: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            remote: default_remote(),
        }
    }
}

fn default_branch() -> String {
    "main".to_owned()
}

fn default_remote() -> String {
    "origin".to_owned()
}

// ---------------------------------------------------------------------------
// LockConfig
// ---------------------------------------------------------------------------

/// Staleness windows for filesystem locks.
///
/// Same-host locks are additionally checked for process liveness; these
/// wall-clock windows are the only staleness signal for locks held by
/// another host.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// Hours before a lane lock from another host is considered stale
    /// (default: 24).
    #[serde(default = "default_lane_stale_hours")]
    pub lane_stale_hours: u64,

    /// Minutes before the event-log append lock is considered stale
    /// (default: 5).
    #[serde(default = "default_log_stale_minutes")]
    pub log_stale_minutes: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lane_stale_hours: default_lane_stale_hours(),
            log_stale_minutes: default_log_stale_minutes(),
        }
    }
}

const fn default_lane_stale_hours() -> u64 {
    24
}

const fn default_log_stale_minutes() -> u64 {
    5
}

impl LockConfig {
    /// The lane-lock staleness window as a [`Duration`].
    #[must_use]
    pub const fn lane_stale(&self) -> Duration {
        Duration::from_secs(self.lane_stale_hours * 60 * 60)
    }

    /// The event-log lock staleness window as a [`Duration`].
    #[must_use]
    pub const fn log_stale(&self) -> Duration {
        Duration::from_secs(self.log_stale_minutes * 60)
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

/// Transactor retry schedule: exponential backoff with jitter.
///
/// The defaults mirror the `wu_done` preset: 6 attempts, 2s base, 60s cap,
/// 15% jitter.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Maximum number of attempts (default: 6).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds (default: 2000).
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,

    /// Delay cap in milliseconds (default: 60000).
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,

    /// Backoff multiplier per attempt (default: 2.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor, 0.0–1.0 (default: 0.15).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_ms: default_base_ms(),
            max_ms: default_max_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

const fn default_max_attempts() -> u32 {
    6
}

const fn default_base_ms() -> u64 {
    2000
}

const fn default_max_ms() -> u64 {
    60_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter() -> f64 {
    0.15
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a LumenFlow configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<std::path::PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::LumenError {
    fn from(e: ConfigError) -> Self {
        Self::Config {
            path: e.path.unwrap_or_default(),
            detail: e.message,
        }
    }
}

impl LumenConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse
    /// errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
