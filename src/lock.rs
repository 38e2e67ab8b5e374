//! Create-exclusive filesystem locks.
//!
//! Two locks live here:
//!
//! - [`LaneLockManager`] — enforces WIP=1 per lane. One JSON record per lane
//!   under `state/locks/`, owned by the claiming process for the duration of
//!   the claim.
//! - [`FileLock`] — a short-lived guard for direct event-log appends and
//!   sequential ID generation.
//!
//! Acquisition is a create-exclusive open (fail if exists), which closes the
//! TOCTOU gap between two concurrent acquirers on the same host. Liveness:
//! a lock whose hostname matches ours and whose pid is dead is stale
//! immediately; a lock from another host is opaque and only goes stale after
//! the configured wall-clock window.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::LumenError;
use crate::layout::Layout;
use crate::model::{Lane, WuId};

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// Local hostname, used to decide whether a lock's pid can be probed.
#[must_use]
pub fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Signal-0 liveness probe. Only meaningful for pids on this host.
#[cfg(unix)]
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

/// On non-unix targets pids cannot be probed; assume alive and rely on the
/// wall-clock window.
#[cfg(not(unix))]
#[must_use]
pub fn process_alive(_pid: u32) -> bool {
    true
}

fn is_stale(pid: u32, hostname: &str, started_at: DateTime<Utc>, window: Duration) -> bool {
    if hostname == local_hostname() && !process_alive(pid) {
        return true;
    }
    let age = Utc::now().signed_duration_since(started_at);
    age.to_std().is_ok_and(|age| age > window)
}

// ---------------------------------------------------------------------------
// LaneLockManager
// ---------------------------------------------------------------------------

/// The on-disk record of a held lane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneLockRecord {
    /// The WU holding the lane.
    #[serde(rename = "wuId")]
    pub wu_id: WuId,
    /// The claiming process.
    pub pid: u32,
    /// The claiming host.
    pub hostname: String,
    /// When the lock was taken.
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
}

/// Result of a non-mutating lane lock probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LaneLockStatus {
    /// No lock record exists.
    Free,
    /// A live lock is held.
    Held(LaneLockRecord),
    /// A lock record exists but its holder is stale.
    Stale(LaneLockRecord),
}

/// Enforces WIP=1 per lane via create-exclusive lock files.
#[derive(Clone, Debug)]
pub struct LaneLockManager {
    layout: Layout,
    stale_after: Duration,
}

impl LaneLockManager {
    /// Create a manager over `layout`'s lock directory with the given
    /// staleness window for cross-host locks.
    #[must_use]
    pub fn new(layout: Layout, stale_after: Duration) -> Self {
        Self {
            layout,
            stale_after,
        }
    }

    /// Acquire the lane for `wu_id`.
    ///
    /// Succeeds if the lane is free, already held by this WU, or held by a
    /// stale owner (takeover, with a warning).
    ///
    /// # Errors
    /// [`LumenError::LaneOccupied`] if a live lock for another WU exists.
    pub fn acquire(&self, lane: &Lane, wu_id: WuId) -> Result<(), LumenError> {
        let path = self.layout.lane_lock_file(lane);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = LaneLockRecord {
            wu_id,
            pid: std::process::id(),
            hostname: local_hostname(),
            started_at: Utc::now(),
        };

        // One takeover pass at most: free → write, stale → reclaim → write.
        for _ in 0..2 {
            match write_exclusive(&path, &serde_json::to_vec(&record).map_err(to_internal)?) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match self.check(lane)? {
                        LaneLockStatus::Free => continue,
                        LaneLockStatus::Held(existing) => {
                            if existing.wu_id == wu_id {
                                return Ok(());
                            }
                            return Err(LumenError::LaneOccupied {
                                lane: lane.clone(),
                                holder: existing.wu_id,
                            });
                        }
                        LaneLockStatus::Stale(existing) => {
                            warn!(
                                lane = %lane,
                                holder = %existing.wu_id,
                                pid = existing.pid,
                                host = %existing.hostname,
                                "taking over stale lane lock"
                            );
                            std::fs::remove_file(&path)?;
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LumenError::Internal {
            detail: format!("lane lock for '{lane}' kept reappearing during takeover"),
        })
    }

    /// Release the lane if held by `wu_id`. Returns `true` if a record was
    /// removed.
    ///
    /// # Errors
    /// Propagates filesystem errors; releasing a free lane is not an error.
    pub fn release(&self, lane: &Lane, wu_id: WuId) -> Result<bool, LumenError> {
        let path = self.layout.lane_lock_file(lane);
        match read_record(&path)? {
            None => Ok(false),
            Some(record) if record.wu_id == wu_id => {
                std::fs::remove_file(&path)?;
                Ok(true)
            }
            Some(record) => {
                warn!(
                    lane = %lane,
                    holder = %record.wu_id,
                    requested = %wu_id,
                    "refusing to release lane lock held by another WU"
                );
                Ok(false)
            }
        }
    }

    /// Report the lane's lock state without modifying it.
    ///
    /// # Errors
    /// Propagates filesystem errors.
    pub fn check(&self, lane: &Lane) -> Result<LaneLockStatus, LumenError> {
        let path = self.layout.lane_lock_file(lane);
        match read_record(&path)? {
            None => Ok(LaneLockStatus::Free),
            Some(record) => {
                if is_stale(record.pid, &record.hostname, record.started_at, self.stale_after) {
                    Ok(LaneLockStatus::Stale(record))
                } else {
                    Ok(LaneLockStatus::Held(record))
                }
            }
        }
    }
}

fn read_record(path: &Path) -> Result<Option<LaneLockRecord>, LumenError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(record) => Ok(Some(record)),
        Err(e) => {
            // An unreadable record cannot prove liveness; treat as stale.
            warn!(path = %path.display(), error = %e, "unparseable lane lock record");
            Ok(Some(LaneLockRecord {
                wu_id: WuId::from_number(0),
                pid: 0,
                hostname: String::new(),
                started_at: DateTime::<Utc>::MIN_UTC,
            }))
        }
    }
}

fn write_exclusive(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut f = OpenOptions::new().write(true).create_new(true).open(path)?;
    f.write_all(bytes)?;
    f.flush()
}

fn to_internal(e: serde_json::Error) -> LumenError {
    LumenError::Internal {
        detail: format!("lock record serialization failed: {e}"),
    }
}

// ---------------------------------------------------------------------------
// FileLock
// ---------------------------------------------------------------------------

/// The on-disk record of a short-lived file lock.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct FileLockRecord {
    pid: u32,
    hostname: String,
    #[serde(rename = "startedAt")]
    started_at: DateTime<Utc>,
}

/// A held file lock. Dropping the guard releases it.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Acquire `path` as a create-exclusive lock, reclaiming stale holders.
    ///
    /// Contention is brief by design (appends are small), so acquisition
    /// spins a few times before giving up.
    ///
    /// # Errors
    /// Fails if the lock stays contended through every attempt.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self, LumenError> {
        const ATTEMPTS: u32 = 5;
        const SPIN: Duration = Duration::from_millis(100);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = FileLockRecord {
            pid: std::process::id(),
            hostname: local_hostname(),
            started_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&record).map_err(to_internal)?;

        for attempt in 1..=ATTEMPTS {
            match write_exclusive(path, &bytes) {
                Ok(()) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if holder_is_stale(path, stale_after) {
                        warn!(path = %path.display(), "reclaiming stale file lock");
                        let _ = std::fs::remove_file(path);
                        continue;
                    }
                    if attempt < ATTEMPTS {
                        std::thread::sleep(SPIN);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(LumenError::RetryExhaustion {
            op: format!("acquire file lock {}", path.display()),
            attempts: ATTEMPTS,
            last: "lock is held by a live process".to_owned(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn holder_is_stale(path: &Path, window: Duration) -> bool {
    let Ok(bytes) = std::fs::read(path) else {
        // Racing holder already released it.
        return false;
    };
    match serde_json::from_slice::<FileLockRecord>(&bytes) {
        Ok(r) => is_stale(r.pid, &r.hostname, r.started_at, window),
        // An unreadable record cannot prove liveness.
        Err(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn fixture() -> (tempfile::TempDir, LaneLockManager) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure_dirs().unwrap();
        let mgr = LaneLockManager::new(layout, DAY);
        (dir, mgr)
    }

    fn lane() -> Lane {
        Lane::new("Ops: Tooling").unwrap()
    }

    fn wu(n: u64) -> WuId {
        WuId::from_number(n)
    }

    #[test]
    fn acquire_then_check_reports_held() {
        let (_dir, mgr) = fixture();
        mgr.acquire(&lane(), wu(100)).unwrap();
        match mgr.check(&lane()).unwrap() {
            LaneLockStatus::Held(r) => {
                assert_eq!(r.wu_id, wu(100));
                assert_eq!(r.pid, std::process::id());
            }
            other => panic!("expected Held, got {other:?}"),
        }
    }

    #[test]
    fn second_wu_is_rejected_while_held() {
        let (_dir, mgr) = fixture();
        mgr.acquire(&lane(), wu(100)).unwrap();
        match mgr.acquire(&lane(), wu(200)) {
            Err(LumenError::LaneOccupied { holder, .. }) => assert_eq!(holder, wu(100)),
            other => panic!("expected LaneOccupied, got {other:?}"),
        }
    }

    #[test]
    fn reacquire_by_same_wu_is_idempotent() {
        let (_dir, mgr) = fixture();
        mgr.acquire(&lane(), wu(100)).unwrap();
        mgr.acquire(&lane(), wu(100)).unwrap();
    }

    #[test]
    fn release_frees_the_lane() {
        let (_dir, mgr) = fixture();
        mgr.acquire(&lane(), wu(100)).unwrap();
        assert!(mgr.release(&lane(), wu(100)).unwrap());
        assert_eq!(mgr.check(&lane()).unwrap(), LaneLockStatus::Free);
        mgr.acquire(&lane(), wu(200)).unwrap();
    }

    #[test]
    fn release_by_non_holder_is_refused() {
        let (_dir, mgr) = fixture();
        mgr.acquire(&lane(), wu(100)).unwrap();
        assert!(!mgr.release(&lane(), wu(200)).unwrap());
        assert!(matches!(
            mgr.check(&lane()).unwrap(),
            LaneLockStatus::Held(_)
        ));
    }

    #[test]
    fn release_of_free_lane_is_not_an_error() {
        let (_dir, mgr) = fixture();
        assert!(!mgr.release(&lane(), wu(100)).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn dead_pid_on_this_host_is_stale_and_taken_over() {
        let (dir, mgr) = fixture();
        let path = Layout::new(dir.path()).lane_lock_file(&lane());
        let dead = LaneLockRecord {
            wu_id: wu(1),
            pid: u32::MAX, // not a valid live pid
            hostname: local_hostname(),
            started_at: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&dead).unwrap()).unwrap();

        assert!(matches!(
            mgr.check(&lane()).unwrap(),
            LaneLockStatus::Stale(_)
        ));
        mgr.acquire(&lane(), wu(2)).unwrap();
        match mgr.check(&lane()).unwrap() {
            LaneLockStatus::Held(r) => assert_eq!(r.wu_id, wu(2)),
            other => panic!("expected Held after takeover, got {other:?}"),
        }
    }

    #[test]
    fn fresh_cross_host_lock_is_live() {
        let (dir, mgr) = fixture();
        let path = Layout::new(dir.path()).lane_lock_file(&lane());
        let remote = LaneLockRecord {
            wu_id: wu(1),
            pid: 1,
            hostname: "some-other-host".to_owned(),
            started_at: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec(&remote).unwrap()).unwrap();

        assert!(matches!(
            mgr.check(&lane()).unwrap(),
            LaneLockStatus::Held(_)
        ));
        assert!(mgr.acquire(&lane(), wu(2)).is_err());
    }

    #[test]
    fn aged_cross_host_lock_is_stale() {
        let (dir, mgr) = fixture();
        let path = Layout::new(dir.path()).lane_lock_file(&lane());
        let remote = LaneLockRecord {
            wu_id: wu(1),
            pid: 1,
            hostname: "some-other-host".to_owned(),
            started_at: Utc::now() - chrono::Duration::hours(25),
        };
        std::fs::write(&path, serde_json::to_vec(&remote).unwrap()).unwrap();

        assert!(matches!(
            mgr.check(&lane()).unwrap(),
            LaneLockStatus::Stale(_)
        ));
        mgr.acquire(&lane(), wu(2)).unwrap();
    }

    #[test]
    fn unparseable_record_is_reclaimable() {
        let (dir, mgr) = fixture();
        let path = Layout::new(dir.path()).lane_lock_file(&lane());
        std::fs::write(&path, b"<<<<<<< not json").unwrap();
        mgr.acquire(&lane(), wu(5)).unwrap();
    }

    // -- FileLock --

    #[test]
    fn file_lock_acquire_and_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.lock");
        {
            let _guard = FileLock::acquire(&path, Duration::from_secs(300)).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists(), "drop must release the lock");
    }

    #[test]
    fn file_lock_contention_fails_after_spinning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.lock");
        let _held = FileLock::acquire(&path, Duration::from_secs(300)).unwrap();
        // Same pid is alive, record is fresh: second acquire must fail.
        let err = FileLock::acquire(&path, Duration::from_secs(300)).unwrap_err();
        assert!(matches!(err, LumenError::RetryExhaustion { .. }));
    }

    #[test]
    fn file_lock_reclaims_stale_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.lock");
        let stale = FileLockRecord {
            pid: std::process::id(),
            hostname: local_hostname(),
            started_at: Utc::now() - chrono::Duration::minutes(10),
        };
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();
        let _guard = FileLock::acquire(&path, Duration::from_secs(300)).unwrap();
    }
}
