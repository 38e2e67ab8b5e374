//! `wu lifecycle-harness` — drive a throwaway WU through the whole state
//! machine and verify the core invariants after every step.
//!
//! The harness exercises create → claim → block → unblock → complete →
//! delete on a reserved lane, checking log-fold agreement, lane WIP, and
//! stamp/done parity between steps. Meant for scratch checkouts and CI
//! smoke runs, not for production repositories with unrelated in-flight
//! work on the harness lane.

use lumen_git::GitClient;

use crate::doctor::Doctor;
use crate::error::LumenError;
use crate::model::{ClaimMode, Exposure, Lane, Priority, WuStatus, WuType};
use crate::spec_store::WriteMode;

use super::{BlockRequest, CreateRequest, Engine, UnblockRequest};

/// One line per verified step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HarnessReport {
    /// Human-readable `✓ step` lines.
    pub steps: Vec<String>,
}

impl<G: GitClient> Engine<G> {
    /// Run the lifecycle self-check.
    ///
    /// # Errors
    /// The first failing verb or invariant aborts the run; the WU is left
    /// behind for inspection in that case.
    pub fn lifecycle_harness(&self) -> Result<HarnessReport, LumenError> {
        let lane = Lane::new("Harness: Selfcheck").map_err(LumenError::InvalidValue)?;
        let mut report = HarnessReport::default();

        let id = self.create(&CreateRequest {
            id: None,
            lane: lane.clone(),
            title: "Lifecycle harness probe".to_owned(),
            wu_type: WuType::Process,
            priority: Priority::P3,
            exposure: Exposure::BackendOnly,
            description: "Round-trips the full WU state machine.".to_owned(),
            acceptance: vec!["every lifecycle verb succeeds in order".to_owned()],
            code_paths: vec![],
            spec_refs: vec![],
            initiative: None,
            phase: None,
            sizing: None,
            mode: WriteMode::Strict,
        })?;
        self.check_step(&mut report, &format!("create {id}"), id, WuStatus::Ready)?;

        self.claim(id, ClaimMode::Worktree)?;
        self.check_step(&mut report, &format!("claim {id}"), id, WuStatus::InProgress)?;

        self.block(&BlockRequest {
            id,
            reason: "harness pause".to_owned(),
        })?;
        self.check_step(&mut report, &format!("block {id}"), id, WuStatus::Blocked)?;

        self.unblock(&UnblockRequest { id })?;
        self.check_step(&mut report, &format!("unblock {id}"), id, WuStatus::InProgress)?;

        self.complete(id)?;
        self.check_step(&mut report, &format!("complete {id}"), id, WuStatus::Done)?;

        self.delete(id, false)?;
        if self.specs().exists(id) {
            return Err(LumenError::Internal {
                detail: format!("harness: {id} still exists after delete"),
            });
        }
        report.steps.push(format!("✓ delete {id}"));
        Ok(report)
    }

    fn check_step(
        &self,
        report: &mut HarnessReport,
        step: &str,
        id: crate::model::WuId,
        expected: WuStatus,
    ) -> Result<(), LumenError> {
        let actual = self.specs().read(id)?.status;
        if actual != expected {
            return Err(LumenError::Internal {
                detail: format!("harness: after {step}, status is {actual}, expected {expected}"),
            });
        }
        let problems = Doctor::new(self).invariant_problems()?;
        if !problems.is_empty() {
            return Err(LumenError::Drift { findings: problems });
        }
        report.steps.push(format!("✓ {step}"));
        Ok(())
    }
}
