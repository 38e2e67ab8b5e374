//! Consistency checker scenarios: drift detection, safe repair, and the
//! fixed-point property.

mod common;

use common::{create_request, engine};

use lumen_git::fake::FakeGit;
use lumen_git::GitClient;
use lumenflow::doctor::{Doctor, DriftCode};
use lumenflow::error::LumenError;
use lumenflow::event::{EventPayload, WuEvent};
use lumenflow::lifecycle::Engine;
use lumenflow::model::{ClaimMode, Lane, WuId, WuStatus};
use lumenflow::projection;

fn wu(n: u64) -> WuId {
    WuId::from_number(n)
}

/// A done WU written directly to disk (with stamp), bypassing the verbs,
/// as drift fixtures need.
fn seed_done_spec(engine: &Engine<FakeGit>, n: u64, with_stamp: bool) {
    let req = create_request(Some(n), "Ops: Tooling", "seed");
    let id = engine.create(&req).unwrap();
    engine.claim(id, ClaimMode::Worktree).unwrap();
    engine.complete(id).unwrap();
    if !with_stamp {
        std::fs::remove_file(engine.layout().stamp_file(id)).unwrap();
    }
}

// ---------------------------------------------------------------------------
// S5: duplicate backlog entry
// ---------------------------------------------------------------------------

#[test]
fn repair_fixes_duplicate_backlog_entry() {
    let (dir, engine) = engine();
    seed_done_spec(&engine, 300, true);

    // Hand-corrupt the backlog: WU-300 under both In Progress and Done.
    let backlog = "---\nsections: []\n---\n\n# Backlog\n\n## In Progress\n\n\
                   - [WU-300](wu/WU-300.yaml) seed (Ops: Tooling)\n\n## Done\n\n\
                   - [WU-300](wu/WU-300.yaml) seed (Ops: Tooling)\n";
    std::fs::write(dir.path().join("tasks/backlog.md"), backlog).unwrap();

    let report = Doctor::new(&engine).run(false).unwrap();
    assert!(
        report
            .findings
            .iter()
            .any(|f| f.code == DriftCode::BacklogDualSection && f.wu_id == wu(300))
    );

    let fixed = std::fs::read_to_string(dir.path().join("tasks/backlog.md")).unwrap();
    let referencing: Vec<&str> = fixed
        .lines()
        .filter(|l| l.contains("wu/WU-300.yaml"))
        .collect();
    assert_eq!(referencing.len(), 1, "exactly one line references the spec");
    let entries = projection::backlog_entries(&fixed);
    assert_eq!(entries, vec![("Done".to_owned(), wu(300))]);
}

#[test]
fn repair_removes_done_wu_from_in_progress_section() {
    let (dir, engine) = engine();
    seed_done_spec(&engine, 301, true);

    let backlog = "---\nsections: []\n---\n\n# Backlog\n\n## In Progress\n\n\
                   - [WU-301](wu/WU-301.yaml) seed (Ops: Tooling)\n\n## Done\n\n(none)\n";
    std::fs::write(dir.path().join("tasks/backlog.md"), backlog).unwrap();

    let report = Doctor::new(&engine).run(false).unwrap();
    assert!(
        report
            .findings
            .iter()
            .any(|f| f.code == DriftCode::YamlDoneStatusInProgress)
    );
    let fixed = std::fs::read_to_string(dir.path().join("tasks/backlog.md")).unwrap();
    let entries = projection::backlog_entries(&fixed);
    assert_eq!(entries, vec![("Done".to_owned(), wu(301))]);
}

// ---------------------------------------------------------------------------
// S6: event log corruption
// ---------------------------------------------------------------------------

#[test]
fn log_repair_restores_replayability() {
    let (_dir, engine) = engine();
    let log = engine.events();
    let claim = |n: u64| {
        WuEvent::now(
            wu(n),
            EventPayload::Claim {
                lane: Lane::new("Ops: Tooling").unwrap(),
                title: format!("work {n}"),
            },
        )
    };
    log.append(&claim(1)).unwrap();
    log.append(&claim(2)).unwrap();

    // Wedge a malformed line between the two claims.
    let text = std::fs::read_to_string(log.path()).unwrap();
    let mut lines: Vec<&str> = text.lines().collect();
    lines.insert(1, "{half a record");
    std::fs::write(log.path(), format!("{}\n", lines.join("\n"))).unwrap();
    assert!(engine.load_index().is_err(), "corrupt log must not load");

    let report = log.repair(false).unwrap();
    assert_eq!(report.kept, 2);
    assert_eq!(report.removed.len(), 1);
    assert!(report.backup.as_ref().unwrap().exists());

    let index = engine.load_index().unwrap();
    let in_progress = index.by_status(WuStatus::InProgress);
    assert_eq!(
        in_progress.into_iter().collect::<Vec<_>>(),
        vec![wu(1), wu(2)]
    );
}

// ---------------------------------------------------------------------------
// Stamp drift, both directions
// ---------------------------------------------------------------------------

#[test]
fn missing_stamp_is_recreated() {
    let (_dir, engine) = engine();
    seed_done_spec(&engine, 10, false);
    assert!(!engine.stamps().exists(wu(10)));

    let report = Doctor::new(&engine).run(false).unwrap();
    assert!(
        report
            .findings
            .iter()
            .any(|f| f.code == DriftCode::YamlDoneNoStamp)
    );
    assert!(engine.stamps().exists(wu(10)));
}

#[test]
fn stranded_stamp_pulls_yaml_and_log_forward() {
    let (dir, engine) = engine();
    let id = engine
        .create(&create_request(Some(11), "Ops: Tooling", "x"))
        .unwrap();
    // A stamp appears while the YAML still says ready.
    std::fs::write(dir.path().join("stamps/WU-11.done"), b"").unwrap();

    Doctor::new(&engine).run(false).unwrap();

    let spec = engine.specs().read(id).unwrap();
    assert_eq!(spec.status, WuStatus::Done);
    assert!(spec.locked);
    assert!(spec.completed_at.is_some());

    // Synthetic claim + complete fold to done.
    let index = engine.load_index().unwrap();
    assert_eq!(index.status_of(id), Some(WuStatus::Done));
    assert!(Doctor::new(&engine).invariant_problems().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Worktree drift
// ---------------------------------------------------------------------------

#[test]
fn orphan_worktree_of_done_wu_is_removed() {
    let (dir, engine) = engine();
    seed_done_spec(&engine, 12, true);

    // Recreate leftovers as if completion had crashed mid-teardown.
    let root = dir.path();
    engine
        .git()
        .branch_create(root, "lane/ops-tooling/wu-12", "main")
        .unwrap();
    let wt = root.join("worktrees/ops-tooling-wu-12");
    engine
        .git()
        .worktree_add(root, &wt, "lane/ops-tooling/wu-12")
        .unwrap();

    let report = Doctor::new(&engine).run(false).unwrap();
    assert!(
        report
            .findings
            .iter()
            .any(|f| f.code == DriftCode::OrphanWorktreeDone)
    );
    assert!(!wt.exists());
    assert!(
        !engine
            .git()
            .local_branches()
            .contains(&"lane/ops-tooling/wu-12".to_owned())
    );
}

#[test]
fn orphan_worktree_with_uncommitted_changes_is_left_alone() {
    let (dir, engine) = engine();
    seed_done_spec(&engine, 13, true);
    let root = dir.path();
    engine
        .git()
        .branch_create(root, "lane/ops-tooling/wu-13", "main")
        .unwrap();
    let wt = root.join("worktrees/ops-tooling-wu-13");
    engine
        .git()
        .worktree_add(root, &wt, "lane/ops-tooling/wu-13")
        .unwrap();
    engine.git().mark_dirty(&wt);

    let report = Doctor::new(&engine).run(false).unwrap();
    assert!(wt.exists(), "dirty worktrees survive repair");
    assert_eq!(report.repaired, 0);
}

#[test]
fn missing_claimed_worktree_is_reported_not_repaired() {
    let (dir, engine) = engine();
    let id = engine
        .create(&create_request(Some(14), "Ops: Tooling", "x"))
        .unwrap();
    engine.claim(id, ClaimMode::Worktree).unwrap();
    std::fs::remove_dir_all(dir.path().join("worktrees/ops-tooling-wu-14")).unwrap();

    let report = Doctor::new(&engine).run(false).unwrap();
    let finding = report
        .findings
        .iter()
        .find(|f| f.code == DriftCode::MissingWorktreeClaimed)
        .expect("missing worktree reported");
    assert!(!finding.repairable);
}

// ---------------------------------------------------------------------------
// Fixed point, dry run, claim pre-flight
// ---------------------------------------------------------------------------

#[test]
fn repair_reaches_fixed_point_in_one_pass() {
    let (_dir, engine) = engine();
    seed_done_spec(&engine, 20, false);

    let first = Doctor::new(&engine).run(false).unwrap();
    assert!(!first.is_clean());

    let second = Doctor::new(&engine).run(false).unwrap();
    assert!(
        second.is_clean(),
        "second run must report zero findings, got {:?}",
        second.findings
    );
}

#[test]
fn dry_run_reports_without_mutating() {
    let (_dir, engine) = engine();
    seed_done_spec(&engine, 21, false);

    let report = Doctor::new(&engine).run(true).unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.repaired, 0);
    assert!(
        !engine.stamps().exists(wu(21)),
        "dry run must not create the stamp"
    );
}

#[test]
fn claim_preflight_refuses_lane_with_orphan_done_worktree() {
    let (dir, engine) = engine();
    seed_done_spec(&engine, 22, true);
    let root = dir.path();
    engine
        .git()
        .branch_create(root, "lane/ops-tooling/wu-22", "main")
        .unwrap();

    let fresh = engine
        .create(&create_request(Some(23), "Ops: Tooling", "y"))
        .unwrap();
    let err = engine.claim(fresh, ClaimMode::Worktree).unwrap_err();
    assert!(matches!(err, LumenError::Drift { .. }));

    // Repair closes the drift; the claim then goes through.
    Doctor::new(&engine).run(false).unwrap();
    engine.claim(fresh, ClaimMode::Worktree).unwrap();
}
