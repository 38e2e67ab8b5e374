//! Property checks over the pure layers: projection determinism, retry
//! delay bounds, and identifier round-trips.

use std::time::Duration;

use proptest::prelude::*;

use lumenflow::model::{Exposure, Lane, Priority, WuId, WuStatus, WuType};
use lumenflow::projection::generate_backlog;
use lumenflow::retry::RetryPolicy;
use lumenflow::wu::{TestPlan, WuSpec};

fn spec(n: u64, status: WuStatus) -> WuSpec {
    WuSpec {
        id: WuId::from_number(n),
        title: format!("work {n}"),
        lane: Lane::new("Ops: Tooling").expect("valid lane"),
        wu_type: WuType::Tooling,
        priority: Priority::P2,
        status,
        created: "2026-07-01".to_owned(),
        exposure: Exposure::BackendOnly,
        description: "d".to_owned(),
        acceptance: vec!["a".to_owned()],
        code_paths: vec![],
        tests: TestPlan::default(),
        dependencies: vec![],
        blocked_by: vec![],
        blocks: vec![],
        labels: vec![],
        assigned_to: None,
        initiative: None,
        phase: None,
        spec_refs: vec![],
        notes: None,
        risks: vec![],
        sizing: None,
        worktree_path: None,
        claimed_mode: None,
        claimed_branch: None,
        completed_at: None,
        locked: status == WuStatus::Done,
    }
}

fn arb_status() -> impl Strategy<Value = WuStatus> {
    prop_oneof![
        Just(WuStatus::Ready),
        Just(WuStatus::InProgress),
        Just(WuStatus::Blocked),
        Just(WuStatus::Done),
    ]
}

proptest! {
    /// Generating the backlog twice from equal state is byte-identical,
    /// and input order never matters.
    #[test]
    fn backlog_generation_is_deterministic(
        statuses in proptest::collection::vec(arb_status(), 0..20)
    ) {
        let specs: Vec<WuSpec> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| spec(i as u64 + 1, *s))
            .collect();
        let mut shuffled = specs.clone();
        shuffled.reverse();

        let a = generate_backlog(&specs);
        let b = generate_backlog(&specs);
        let c = generate_backlog(&shuffled);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(&a, &c);
    }

    /// Every WU appears exactly once in the backlog.
    #[test]
    fn backlog_lists_each_wu_once(
        statuses in proptest::collection::vec(arb_status(), 1..20)
    ) {
        let specs: Vec<WuSpec> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| spec(i as u64 + 1, *s))
            .collect();
        let backlog = generate_backlog(&specs);
        for s in &specs {
            let link = format!("wu/{}.yaml", s.id);
            prop_assert_eq!(
                backlog.matches(&link).count(),
                1,
                "{} should appear exactly once",
                s.id
            );
        }
    }

    /// Jittered delays stay inside the configured band and under the cap.
    #[test]
    fn retry_delays_respect_cap_and_jitter(
        attempt in 1u32..20,
        base_ms in 1u64..5_000,
        jitter in 0.0f64..0.5,
    ) {
        let policy = RetryPolicy {
            max_attempts: 20,
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(60_000),
            multiplier: 2.0,
            jitter,
        };
        let delay = policy.delay_for(attempt).as_millis() as f64;
        let ceiling = 60_000.0 * (1.0 + jitter) + 1.0;
        prop_assert!(delay <= ceiling, "delay {delay}ms above jittered cap");
    }

    /// WU identifiers round-trip through their display form.
    #[test]
    fn wu_id_display_round_trips(n in 0u64..u64::MAX) {
        let id = WuId::from_number(n);
        prop_assert_eq!(WuId::new(&id.to_string()).unwrap(), id);
    }

    /// Kebab rendering is a fixed point: kebabbing a kebabbed lane changes
    /// nothing.
    #[test]
    fn lane_kebab_is_a_fixed_point(parent in "[A-Za-z][A-Za-z0-9 ]{0,10}[A-Za-z0-9]") {
        let Ok(lane) = Lane::new(&parent) else {
            return Ok(());
        };
        let kebab = lane.kebab();
        if let Ok(rekebabbed) = Lane::new(&kebab) {
            prop_assert_eq!(rekebabbed.kebab(), kebab);
        }
    }
}
