//! The state indexer — a pure fold from the event stream into O(1) views.
//!
//! Four maps are maintained: WU→state, status→{WU}, lane→{WU}, and
//! parent→{children} (via delegation events). The fold is lenient about
//! out-of-order transitions (disallowed verb sequences are the
//! coordinator's job to reject) but strict about event shape, which the
//! wire types already enforce at parse time.

use std::collections::{BTreeSet, HashMap};

use crate::event::types::{EventPayload, WuEvent};
use crate::model::{Lane, WuId, WuStatus};

// ---------------------------------------------------------------------------
// WuView
// ---------------------------------------------------------------------------

/// The folded state of one work unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WuView {
    /// Current lifecycle status.
    pub status: WuStatus,
    /// The lane recorded by the last create/claim.
    pub lane: Lane,
    /// The title recorded by the last create/claim.
    pub title: String,
    /// Set when the WU completed.
    pub completed_at: Option<String>,
    /// The most recent checkpoint note, if any.
    pub last_checkpoint: Option<String>,
}

// ---------------------------------------------------------------------------
// StateIndex
// ---------------------------------------------------------------------------

/// O(1) lookups over the folded event stream.
#[derive(Debug, Default)]
pub struct StateIndex {
    wu_state: HashMap<WuId, WuView>,
    by_status: HashMap<WuStatus, BTreeSet<WuId>>,
    by_lane: HashMap<Lane, BTreeSet<WuId>>,
    by_parent: HashMap<WuId, BTreeSet<WuId>>,
}

impl StateIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear and rebuild from an event stream, in order.
    pub fn load<'a>(&mut self, events: impl IntoIterator<Item = &'a WuEvent>) {
        self.wu_state.clear();
        self.by_status.clear();
        self.by_lane.clear();
        self.by_parent.clear();
        for event in events {
            self.apply(event);
        }
    }

    /// Fold one event into the index.
    ///
    /// `create`/`claim` set the WU `in_progress` with the supplied lane and
    /// title. `release` returns it to `ready` but keeps the lane index
    /// entry so history queries still answer. `checkpoint` records the note
    /// without changing status. `delegation` records the parent→child edge
    /// only. Transitions from an unexpected status are no-ops.
    pub fn apply(&mut self, event: &WuEvent) {
        let id = event.wu_id;
        match &event.payload {
            EventPayload::Create { lane, title } | EventPayload::Claim { lane, title } => {
                let previous = self.wu_state.insert(
                    id,
                    WuView {
                        status: WuStatus::InProgress,
                        lane: lane.clone(),
                        title: title.clone(),
                        completed_at: None,
                        last_checkpoint: None,
                    },
                );
                if let Some(prev) = previous {
                    self.unindex_status(prev.status, id);
                    if prev.lane != *lane {
                        self.by_lane.entry(prev.lane).or_default().remove(&id);
                    }
                }
                self.by_status.entry(WuStatus::InProgress).or_default().insert(id);
                self.by_lane.entry(lane.clone()).or_default().insert(id);
            }
            EventPayload::Release { .. } => {
                self.transition(id, WuStatus::InProgress, WuStatus::Ready);
            }
            EventPayload::Block { .. } => {
                self.transition(id, WuStatus::InProgress, WuStatus::Blocked);
            }
            EventPayload::Unblock => {
                self.transition(id, WuStatus::Blocked, WuStatus::InProgress);
            }
            EventPayload::Complete => {
                if self.transition(id, WuStatus::InProgress, WuStatus::Done)
                    && let Some(view) = self.wu_state.get_mut(&id)
                {
                    view.completed_at = Some(event.timestamp.clone());
                }
            }
            EventPayload::Checkpoint { note, .. } => {
                if let Some(view) = self.wu_state.get_mut(&id) {
                    view.last_checkpoint =
                        Some(note.clone().unwrap_or_else(|| event.timestamp.clone()));
                }
            }
            EventPayload::Delegation { parent_wu_id, .. } => {
                self.by_parent.entry(*parent_wu_id).or_default().insert(id);
            }
        }
    }

    /// Move `id` from `from` to `to` if it is currently in `from`.
    /// Returns `true` if the transition happened.
    fn transition(&mut self, id: WuId, from: WuStatus, to: WuStatus) -> bool {
        let Some(view) = self.wu_state.get_mut(&id) else {
            return false;
        };
        if view.status != from {
            return false;
        }
        view.status = to;
        self.unindex_status(from, id);
        self.by_status.entry(to).or_default().insert(id);
        true
    }

    fn unindex_status(&mut self, status: WuStatus, id: WuId) {
        if let Some(set) = self.by_status.get_mut(&status) {
            set.remove(&id);
        }
    }

    // -- Lookups --

    /// The folded view of one WU, if any event mentioned it.
    #[must_use]
    pub fn get(&self, id: WuId) -> Option<&WuView> {
        self.wu_state.get(&id)
    }

    /// The folded status of one WU.
    #[must_use]
    pub fn status_of(&self, id: WuId) -> Option<WuStatus> {
        self.wu_state.get(&id).map(|v| v.status)
    }

    /// The WUs currently in `status`, ordered by ID.
    #[must_use]
    pub fn by_status(&self, status: WuStatus) -> BTreeSet<WuId> {
        self.by_status.get(&status).cloned().unwrap_or_default()
    }

    /// Every WU that has ever occupied `lane` (history included).
    #[must_use]
    pub fn in_lane(&self, lane: &Lane) -> BTreeSet<WuId> {
        self.by_lane.get(lane).cloned().unwrap_or_default()
    }

    /// The WU occupying `lane`'s WIP slot right now, if any.
    #[must_use]
    pub fn lane_occupant(&self, lane: &Lane) -> Option<WuId> {
        self.by_lane.get(lane)?.iter().copied().find(|id| {
            self.status_of(*id)
                .is_some_and(WuStatus::occupies_lane)
        })
    }

    /// The children delegated from `parent`, ordered by ID.
    #[must_use]
    pub fn children_of(&self, parent: WuId) -> BTreeSet<WuId> {
        self.by_parent.get(&parent).cloned().unwrap_or_default()
    }

    /// Every lane the index has seen.
    #[must_use]
    pub fn lanes(&self) -> Vec<&Lane> {
        let mut lanes: Vec<_> = self.by_lane.keys().collect();
        lanes.sort();
        lanes
    }

    /// Number of WUs with any folded state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wu_state.len()
    }

    /// `true` if no events have been folded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wu_state.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::types::EventPayload;

    fn wu(n: u64) -> WuId {
        WuId::from_number(n)
    }

    fn lane(s: &str) -> Lane {
        Lane::new(s).unwrap()
    }

    fn ev(n: u64, payload: EventPayload) -> WuEvent {
        WuEvent {
            wu_id: wu(n),
            timestamp: "2026-02-07T10:00:00.000Z".to_owned(),
            payload,
        }
    }

    fn claim(n: u64, lane_name: &str) -> WuEvent {
        ev(
            n,
            EventPayload::Claim {
                lane: lane(lane_name),
                title: format!("work {n}"),
            },
        )
    }

    #[test]
    fn claim_sets_in_progress_with_lane_and_title() {
        let mut idx = StateIndex::new();
        idx.apply(&claim(100, "Ops: Tooling"));

        let view = idx.get(wu(100)).unwrap();
        assert_eq!(view.status, WuStatus::InProgress);
        assert_eq!(view.lane, lane("Ops: Tooling"));
        assert_eq!(view.title, "work 100");
        assert!(idx.by_status(WuStatus::InProgress).contains(&wu(100)));
        assert!(idx.in_lane(&lane("Ops: Tooling")).contains(&wu(100)));
    }

    #[test]
    fn block_then_unblock_round_trips_status() {
        let mut idx = StateIndex::new();
        idx.apply(&claim(1, "L"));
        idx.apply(&ev(1, EventPayload::Block { reason: "waiting".to_owned() }));
        assert_eq!(idx.status_of(wu(1)), Some(WuStatus::Blocked));
        idx.apply(&ev(1, EventPayload::Unblock));
        assert_eq!(idx.status_of(wu(1)), Some(WuStatus::InProgress));
    }

    #[test]
    fn block_on_absent_state_is_a_no_op() {
        let mut idx = StateIndex::new();
        idx.apply(&ev(9, EventPayload::Block { reason: "x".to_owned() }));
        assert!(idx.get(wu(9)).is_none());
        assert!(idx.is_empty());
    }

    #[test]
    fn complete_records_timestamp() {
        let mut idx = StateIndex::new();
        idx.apply(&claim(1, "L"));
        idx.apply(&ev(1, EventPayload::Complete));
        let view = idx.get(wu(1)).unwrap();
        assert_eq!(view.status, WuStatus::Done);
        assert_eq!(
            view.completed_at.as_deref(),
            Some("2026-02-07T10:00:00.000Z")
        );
        assert!(idx.by_status(WuStatus::Done).contains(&wu(1)));
        assert!(!idx.by_status(WuStatus::InProgress).contains(&wu(1)));
    }

    #[test]
    fn complete_from_blocked_is_a_no_op() {
        let mut idx = StateIndex::new();
        idx.apply(&claim(1, "L"));
        idx.apply(&ev(1, EventPayload::Block { reason: "x".to_owned() }));
        idx.apply(&ev(1, EventPayload::Complete));
        assert_eq!(idx.status_of(wu(1)), Some(WuStatus::Blocked));
    }

    #[test]
    fn release_returns_to_ready_but_keeps_lane_history() {
        let mut idx = StateIndex::new();
        idx.apply(&claim(200, "L"));
        idx.apply(&ev(200, EventPayload::Release { reason: "Agent interrupted".to_owned() }));

        assert!(idx.by_status(WuStatus::Ready).contains(&wu(200)));
        assert!(!idx.by_status(WuStatus::InProgress).contains(&wu(200)));
        // History query still answers.
        assert!(idx.in_lane(&lane("L")).contains(&wu(200)));
        // But the WIP slot is free.
        assert_eq!(idx.lane_occupant(&lane("L")), None);
    }

    #[test]
    fn reclaim_after_release_reoccupies_the_lane() {
        let mut idx = StateIndex::new();
        idx.apply(&claim(200, "L"));
        idx.apply(&ev(200, EventPayload::Release { reason: "x".to_owned() }));
        idx.apply(&claim(200, "L"));
        assert_eq!(idx.status_of(wu(200)), Some(WuStatus::InProgress));
        assert_eq!(idx.lane_occupant(&lane("L")), Some(wu(200)));
    }

    #[test]
    fn checkpoint_updates_note_without_status_change() {
        let mut idx = StateIndex::new();
        idx.apply(&claim(1, "L"));
        idx.apply(&ev(
            1,
            EventPayload::Checkpoint {
                note: Some("halfway".to_owned()),
                session_id: None,
                progress: None,
            },
        ));
        let view = idx.get(wu(1)).unwrap();
        assert_eq!(view.status, WuStatus::InProgress);
        assert_eq!(view.last_checkpoint.as_deref(), Some("halfway"));
    }

    #[test]
    fn delegation_records_parent_child_edge_only() {
        let mut idx = StateIndex::new();
        idx.apply(&ev(
            13,
            EventPayload::Delegation {
                parent_wu_id: wu(12),
                spawn_id: "spawn-1".to_owned(),
            },
        ));
        assert!(idx.children_of(wu(12)).contains(&wu(13)));
        // No status state is created by a delegation edge.
        assert!(idx.get(wu(13)).is_none());
    }

    #[test]
    fn blocked_wu_occupies_the_lane() {
        let mut idx = StateIndex::new();
        idx.apply(&claim(1, "L"));
        idx.apply(&ev(1, EventPayload::Block { reason: "x".to_owned() }));
        assert_eq!(idx.lane_occupant(&lane("L")), Some(wu(1)));
    }

    #[test]
    fn reclaim_into_a_different_lane_moves_the_index_entry() {
        let mut idx = StateIndex::new();
        idx.apply(&claim(1, "A"));
        idx.apply(&ev(1, EventPayload::Release { reason: "x".to_owned() }));
        idx.apply(&claim(1, "B"));
        assert!(!idx.in_lane(&lane("A")).contains(&wu(1)));
        assert!(idx.in_lane(&lane("B")).contains(&wu(1)));
    }

    #[test]
    fn load_clears_and_rebuilds() {
        let mut idx = StateIndex::new();
        idx.apply(&claim(1, "L"));
        let fresh = vec![claim(2, "M")];
        idx.load(&fresh);
        assert!(idx.get(wu(1)).is_none());
        assert_eq!(idx.status_of(wu(2)), Some(WuStatus::InProgress));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn fold_matches_s4_scenario() {
        // claim → release → queries → reclaim succeeds
        let events = vec![
            claim(200, "L"),
            ev(200, EventPayload::Release { reason: "Agent interrupted".to_owned() }),
        ];
        let mut idx = StateIndex::new();
        idx.load(&events);
        assert!(idx.by_status(WuStatus::Ready).contains(&wu(200)));
        assert!(!idx.by_status(WuStatus::InProgress).contains(&wu(200)));
    }
}
