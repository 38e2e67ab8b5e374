//! The consistency checker/repairer.
//!
//! Three truths can drift apart: the event log, the per-WU YAML (plus its
//! stamp), and the git worktrees/branches, with the markdown projections
//! derived on top. The doctor detects five repairable drift classes and one
//! report-only class:
//!
//! | code | repair |
//! |---|---|
//! | `YamlDoneNoStamp` | create the stamp |
//! | `StampExistsYamlNotDone` | set YAML done+locked, append synthetic events |
//! | `YamlDoneStatusInProgress` | regenerate projections |
//! | `BacklogDualSection` | regenerate projections |
//! | `OrphanWorktreeDone` | remove worktree/branch, after safety guards |
//! | `MissingWorktreeClaimed` | reported, never auto-repaired |
//!
//! File-level repairs go through the micro-worktree transactor; git-only
//! repairs run directly. Dry-run reports without mutating. Repair is a
//! fixed point: a second run from a repaired state reports zero findings.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};

use lumen_git::GitClient;

use crate::error::LumenError;
use crate::event::{EventPayload, WuEvent};
use crate::lifecycle::Engine;
use crate::model::{lane_branch, Lane, WuId, WuStatus};
use crate::projection;
use crate::spec_store::WriteMode;
use crate::transact::TxWrite;
use crate::wu::WuSpec;

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// A drift class the doctor can detect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DriftCode {
    /// YAML says done but the stamp is absent.
    YamlDoneNoStamp,
    /// A stamp exists but the YAML is not done.
    StampExistsYamlNotDone,
    /// The backlog still lists a done WU under In Progress.
    YamlDoneStatusInProgress,
    /// A WU appears in more than one backlog section.
    BacklogDualSection,
    /// A done WU still has a worktree or lane branch.
    OrphanWorktreeDone,
    /// A claimed WU's recorded worktree is missing on disk.
    MissingWorktreeClaimed,
}

impl fmt::Display for DriftCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::YamlDoneNoStamp => "YAML_DONE_NO_STAMP",
            Self::StampExistsYamlNotDone => "STAMP_EXISTS_YAML_NOT_DONE",
            Self::YamlDoneStatusInProgress => "YAML_DONE_STATUS_IN_PROGRESS",
            Self::BacklogDualSection => "BACKLOG_DUAL_SECTION",
            Self::OrphanWorktreeDone => "ORPHAN_WORKTREE_DONE",
            Self::MissingWorktreeClaimed => "MISSING_WORKTREE_CLAIMED",
        };
        f.write_str(s)
    }
}

/// One detected drift.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finding {
    /// The drift class.
    pub code: DriftCode,
    /// The affected WU.
    pub wu_id: WuId,
    /// Human-readable specifics.
    pub detail: String,
    /// Whether the doctor can close this drift itself.
    pub repairable: bool,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.wu_id, self.detail)
    }
}

/// Outcome of one doctor pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DoctorReport {
    /// Everything detected, in scan order.
    pub findings: Vec<Finding>,
    /// How many findings were repaired (0 in dry-run).
    pub repaired: usize,
    /// Whether this was a dry run.
    pub dry_run: bool,
}

impl DoctorReport {
    /// `true` if nothing drifted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Doctor
// ---------------------------------------------------------------------------

/// Detects and (where safe) repairs drift for one repository.
pub struct Doctor<'a, G: GitClient> {
    engine: &'a Engine<G>,
}

impl<'a, G: GitClient> Doctor<'a, G> {
    /// Build a doctor over `engine`.
    #[must_use]
    pub fn new(engine: &'a Engine<G>) -> Self {
        Self { engine }
    }

    /// Scan, and unless `dry_run`, repair what is safely repairable.
    ///
    /// # Errors
    /// Scan errors propagate; per-finding repair failures demote the
    /// finding to unrepaired with a warning.
    pub fn run(&self, dry_run: bool) -> Result<DoctorReport, LumenError> {
        let findings = self.scan()?;
        let mut report = DoctorReport {
            findings,
            repaired: 0,
            dry_run,
        };
        if dry_run {
            return Ok(report);
        }

        let mut regenerate_projections = false;
        let findings = report.findings.clone();
        for finding in &findings {
            if !finding.repairable {
                continue;
            }
            let outcome = match finding.code {
                DriftCode::YamlDoneNoStamp => self.repair_missing_stamp(finding.wu_id),
                DriftCode::StampExistsYamlNotDone => self.repair_stranded_stamp(finding.wu_id),
                DriftCode::YamlDoneStatusInProgress | DriftCode::BacklogDualSection => {
                    // Both close with one projection rebuild; batch it.
                    regenerate_projections = true;
                    Ok(())
                }
                DriftCode::OrphanWorktreeDone => self.repair_orphan_worktree(finding.wu_id),
                DriftCode::MissingWorktreeClaimed => continue,
            };
            match outcome {
                Ok(()) => report.repaired += 1,
                Err(e) => warn!(finding = %finding, error = %e, "repair failed"),
            }
        }
        if regenerate_projections {
            self.rebuild_projections()?;
        }
        info!(
            findings = report.findings.len(),
            repaired = report.repaired,
            "doctor pass finished"
        );
        Ok(report)
    }

    /// Claim pre-flight: refuse lanes containing orphan done-WU worktrees.
    ///
    /// # Errors
    /// [`LumenError::Drift`] listing the offending WUs.
    pub fn check_lane(&self, lane: &Lane) -> Result<(), LumenError> {
        let findings: Vec<String> = self
            .scan()?
            .into_iter()
            .filter(|f| f.code == DriftCode::OrphanWorktreeDone)
            .filter(|f| {
                self.engine
                    .specs()
                    .read(f.wu_id)
                    .map(|s| s.lane == *lane)
                    .unwrap_or(false)
            })
            .map(|f| f.to_string())
            .collect();
        if findings.is_empty() {
            Ok(())
        } else {
            Err(LumenError::Drift { findings })
        }
    }

    // -----------------------------------------------------------------------
    // Scan
    // -----------------------------------------------------------------------

    /// Detect all drift, mutating nothing.
    ///
    /// # Errors
    /// Propagates spec/stamp/log read errors.
    pub fn scan(&self) -> Result<Vec<Finding>, LumenError> {
        let specs = self.engine.specs().read_all()?;
        let stamps = self.engine.stamps();
        let root = self.engine.layout().root();
        let mut findings = Vec::new();

        for spec in &specs {
            let id = spec.id;
            match spec.status {
                WuStatus::Done => {
                    if !stamps.exists(id) {
                        findings.push(Finding {
                            code: DriftCode::YamlDoneNoStamp,
                            wu_id: id,
                            detail: "status is done but the stamp is missing".to_owned(),
                            repairable: true,
                        });
                    }
                    let branch = lane_branch(&spec.lane, id);
                    let wt = self.engine.layout().claim_worktree(&spec.lane, id);
                    let branch_left = self.engine.git().branch_exists(root, &branch)?;
                    if branch_left || wt.exists() {
                        findings.push(Finding {
                            code: DriftCode::OrphanWorktreeDone,
                            wu_id: id,
                            detail: format!(
                                "done WU still has {}",
                                if branch_left && wt.exists() {
                                    "a worktree and a lane branch"
                                } else if branch_left {
                                    "a lane branch"
                                } else {
                                    "a worktree"
                                }
                            ),
                            repairable: true,
                        });
                    }
                }
                WuStatus::InProgress | WuStatus::Blocked => {
                    if stamps.exists(id) {
                        findings.push(stranded_stamp(id));
                    }
                    if let Some(wt) = self.engine.worktree_abs(spec)
                        && !wt.exists()
                    {
                        findings.push(Finding {
                            code: DriftCode::MissingWorktreeClaimed,
                            wu_id: id,
                            detail: format!(
                                "claimed worktree {} is missing on disk",
                                wt.display()
                            ),
                            repairable: false,
                        });
                    }
                }
                WuStatus::Ready => {
                    if stamps.exists(id) {
                        findings.push(stranded_stamp(id));
                    }
                }
            }
        }

        findings.extend(self.scan_backlog(&specs)?);
        Ok(findings)
    }

    fn scan_backlog(&self, specs: &[WuSpec]) -> Result<Vec<Finding>, LumenError> {
        let path = self.engine.layout().backlog_file();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let entries = projection::backlog_entries(&content);
        let status_of: BTreeMap<WuId, WuStatus> =
            specs.iter().map(|s| (s.id, s.status)).collect();

        let mut findings = Vec::new();
        let mut sections_by_id: BTreeMap<WuId, Vec<String>> = BTreeMap::new();
        for (section, id) in &entries {
            sections_by_id.entry(*id).or_default().push(section.clone());
        }
        for (id, sections) in &sections_by_id {
            if sections.len() > 1 {
                findings.push(Finding {
                    code: DriftCode::BacklogDualSection,
                    wu_id: *id,
                    detail: format!("listed under {}", sections.join(" and ")),
                    repairable: true,
                });
                // The dual-section rebuild also fixes the stale entry; no
                // second finding for the same line.
                continue;
            }
            if status_of.get(id) == Some(&WuStatus::Done)
                && sections.iter().any(|s| s == "In Progress")
            {
                findings.push(Finding {
                    code: DriftCode::YamlDoneStatusInProgress,
                    wu_id: *id,
                    detail: "done but still listed under In Progress".to_owned(),
                    repairable: true,
                });
            }
        }
        Ok(findings)
    }

    // -----------------------------------------------------------------------
    // Repairs
    // -----------------------------------------------------------------------

    fn repair_missing_stamp(&self, id: WuId) -> Result<(), LumenError> {
        let specs = self.engine.projected_specs(None, None)?;
        self.engine
            .transactor()
            .with_micro_worktree("repair", &id.lowercase(), |wt| {
                let mut files = vec![self.engine.stamps().stage_write(wt, id)?];
                files.extend(projection::stage_projections(wt, &specs)?);
                Ok(TxWrite {
                    commit_message: format!("fix: restore stamp for {}", id.lowercase()),
                    files,
                })
            })
    }

    /// The stamp is the completion artifact; trust it and pull the YAML and
    /// event log forward to match.
    fn repair_stranded_stamp(&self, id: WuId) -> Result<(), LumenError> {
        let mut spec = self.engine.specs().read(id)?;
        spec.status = WuStatus::Done;
        spec.locked = true;
        if spec.completed_at.is_none() {
            spec.completed_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        spec.clear_claim();
        let prepared = self.engine.specs().prepare(&spec, WriteMode::Relaxed)?;

        let events = self.engine.events().read_all()?;
        let has_claim = events.iter().any(|e| {
            e.wu_id == id
                && matches!(
                    e.payload,
                    EventPayload::Claim { .. } | EventPayload::Create { .. }
                )
        });
        let mut synthetic = Vec::new();
        if !has_claim {
            synthetic.push(WuEvent::now(
                id,
                EventPayload::Claim {
                    lane: prepared.lane.clone(),
                    title: prepared.title.clone(),
                },
            ));
        }
        synthetic.push(WuEvent::now(id, EventPayload::Complete));

        let projected = self.engine.projected_specs(Some(&prepared), None)?;
        self.engine
            .transactor()
            .with_micro_worktree("repair", &id.lowercase(), |wt| {
                let mut files = vec![self.engine.specs().stage_write(wt, &prepared)?];
                for event in &synthetic {
                    // Each append layers onto the staged copy in the
                    // worktree; they all resolve to the same file.
                    files.push(stage_append_layered(self.engine, wt, event)?);
                }
                files.dedup();
                files.extend(projection::stage_projections(wt, &projected)?);
                Ok(TxWrite {
                    commit_message: format!(
                        "fix: reconcile {} with its completion stamp",
                        id.lowercase()
                    ),
                    files,
                })
            })
    }

    fn rebuild_projections(&self) -> Result<(), LumenError> {
        let specs = self.engine.projected_specs(None, None)?;
        self.engine
            .transactor()
            .with_micro_worktree("repair", "projections", |wt| {
                let files = projection::stage_projections(wt, &specs)?;
                Ok(TxWrite {
                    commit_message: "fix: regenerate backlog and status projections".to_owned(),
                    files,
                })
            })
    }

    /// Git-only repair, guarded: never remove a worktree we are standing
    /// in, never one with uncommitted changes, and treat a missing stamp as
    /// a mid-rollback signal to leave everything alone.
    fn repair_orphan_worktree(&self, id: WuId) -> Result<(), LumenError> {
        let spec = self.engine.specs().read(id)?;
        let root = self.engine.layout().root();
        let wt = self.engine.layout().claim_worktree(&spec.lane, id);
        let branch = lane_branch(&spec.lane, id);

        if !self.engine.stamps().exists(id) {
            return Err(LumenError::Drift {
                findings: vec![format!(
                    "{id}: refusing worktree removal, stamp missing (mid-rollback?)"
                )],
            });
        }
        if wt.exists() {
            if let Ok(cwd) = std::env::current_dir()
                && cwd.starts_with(&wt)
            {
                return Err(LumenError::Drift {
                    findings: vec![format!(
                        "{id}: refusing to remove the worktree we are standing in"
                    )],
                });
            }
            if !self.engine.git().is_clean(&wt)? {
                return Err(LumenError::Drift {
                    findings: vec![format!(
                        "{id}: worktree {} has uncommitted changes",
                        wt.display()
                    )],
                });
            }
            self.engine.git().worktree_remove(root, &wt, false)?;
        }
        if self.engine.git().branch_exists(root, &branch)? {
            self.engine.git().branch_delete(root, &branch, true)?;
            let _ = self
                .engine
                .git()
                .push_delete(root, &self.engine.config().repo.remote, &branch);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Invariant verification (used by the lifecycle harness)
    // -----------------------------------------------------------------------

    /// Check the cross-truth invariants: log-fold agreement, lane WIP ≤ 1,
    /// and stamp/done parity. Returns one line per violation.
    ///
    /// # Errors
    /// Propagates read errors (an unreadable log is itself a violation of
    /// a different kind, surfaced as an error).
    pub fn invariant_problems(&self) -> Result<Vec<String>, LumenError> {
        let specs = self.engine.specs().read_all()?;
        let index = self.engine.load_index()?;
        let stamps = self.engine.stamps();
        let mut problems = Vec::new();

        let root = self.engine.layout().root();
        if self.engine.git().config_get(root, "user.email")?.is_none() {
            problems.push(
                "git user.email is not configured; transaction commits will fail".to_owned(),
            );
        }

        for spec in &specs {
            // Log-fold agreement: WUs with history must fold to the YAML
            // status. A ready WU with no events is a fresh create.
            match index.status_of(spec.id) {
                Some(folded) if folded != spec.status => problems.push(format!(
                    "{}: event fold says {folded}, YAML says {}",
                    spec.id, spec.status
                )),
                None if spec.status != WuStatus::Ready => problems.push(format!(
                    "{}: YAML says {} but the event log has no history",
                    spec.id, spec.status
                )),
                _ => {}
            }

            // Stamp/done parity, both directions.
            let done = spec.status == WuStatus::Done && spec.locked;
            if done != stamps.exists(spec.id) {
                problems.push(format!(
                    "{}: stamp presence disagrees with done+locked",
                    spec.id
                ));
            }
        }

        // Lane WIP.
        let mut wip: BTreeMap<&Lane, Vec<WuId>> = BTreeMap::new();
        for spec in &specs {
            if spec.status.occupies_lane() {
                wip.entry(&spec.lane).or_default().push(spec.id);
            }
        }
        for (lane, ids) in wip {
            if ids.len() > 1 {
                problems.push(format!(
                    "lane '{lane}' holds {} claimed WUs (WIP limit is 1)",
                    ids.len()
                ));
            }
        }
        Ok(problems)
    }
}

fn stranded_stamp(id: WuId) -> Finding {
    Finding {
        code: DriftCode::StampExistsYamlNotDone,
        wu_id: id,
        detail: "a completion stamp exists but the YAML is not done".to_owned(),
        repairable: true,
    }
}

/// Like [`EventLog::stage_append`], but layering onto an already-staged
/// copy in the worktree when one exists (for multi-event repairs).
fn stage_append_layered<G: GitClient>(
    engine: &Engine<G>,
    worktree: &std::path::Path,
    event: &WuEvent,
) -> Result<std::path::PathBuf, LumenError> {
    let rel = crate::layout::Layout::events_rel();
    let staged = worktree.join(&rel);
    if staged.exists() {
        let mut contents = std::fs::read_to_string(&staged)?;
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&event.to_json_line().map_err(|e| LumenError::Internal {
            detail: format!("event serialization failed: {e}"),
        })?);
        contents.push('\n');
        std::fs::write(&staged, contents)?;
        Ok(rel)
    } else {
        engine.events().stage_append(worktree, event)
    }
}
