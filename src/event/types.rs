//! Lifecycle event wire types — strict JSON keyed by `type`.
//!
//! Each event records a single lifecycle transition for one WU. The wire
//! format is one JSON object per line:
//!
//! ```text
//! {"type":"claim","wuId":"WU-1570","lane":"Parent: Sub","title":"...","timestamp":"2026-02-07T10:00:00.000Z"}
//! ```
//!
//! The payload is a tagged sum type keyed by `type`; unknown tags fail
//! validation before any indexer state is touched.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Lane, WuId};

// ---------------------------------------------------------------------------
// WuEvent
// ---------------------------------------------------------------------------

/// A single lifecycle event for one work unit.
///
/// Events are totally ordered within a WU by `timestamp`, tie-broken by
/// position in the log file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WuEvent {
    /// The work unit this event belongs to.
    #[serde(rename = "wuId")]
    pub wu_id: WuId,

    /// ISO 8601 timestamp (UTC, millisecond precision) written by the
    /// coordinator.
    pub timestamp: String,

    /// The transition this event records.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl WuEvent {
    /// Build an event stamped with the current wall-clock time.
    #[must_use]
    pub fn now(wu_id: WuId, payload: EventPayload) -> Self {
        Self {
            wu_id,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            payload,
        }
    }

    /// Serialize to a single JSON line (no trailing newline).
    ///
    /// # Errors
    /// Returns an error if serialization fails (shouldn't happen for valid
    /// events).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse one JSON line. Unknown `type` tags are a hard error.
    ///
    /// # Errors
    /// Returns an error for malformed JSON or schema-invalid events.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// The transition recorded by a [`WuEvent`].
///
/// Serialized with a `"type"` tag spliced into the event object. The
/// validator dispatches on the tag and fails closed on unknown tags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventPayload {
    /// WU was created directly into work (rare; `claim` is the usual entry).
    Create {
        /// The lane the WU occupies.
        lane: Lane,
        /// The WU title at creation time.
        title: String,
    },

    /// WU was claimed into `in_progress`.
    Claim {
        /// The lane the WU occupies.
        lane: Lane,
        /// The WU title at claim time.
        title: String,
    },

    /// WU was released back to `ready` without completing.
    Release {
        /// Why the claim was given up.
        reason: String,
    },

    /// WU is blocked; it keeps its lane slot.
    Block {
        /// What it is waiting on.
        reason: String,
    },

    /// WU is unblocked back to `in_progress`.
    Unblock,

    /// WU is done.
    Complete,

    /// Mid-flight progress marker; does not change status.
    Checkpoint {
        /// Free-form progress note.
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
        /// The agent session that wrote the checkpoint.
        #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Coarse progress indicator (e.g. `"3/5"`).
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<String>,
    },

    /// A sub-agent was spawned for a child WU.
    Delegation {
        /// The delegating parent.
        #[serde(rename = "parentWuId")]
        parent_wu_id: WuId,
        /// Identifier of the spawn operation.
        #[serde(rename = "spawnId")]
        spawn_id: String,
    },
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

    fn lane() -> Lane {
        Lane::new("Parent: Sub").unwrap()
    }

    fn ts() -> String {
        "2026-02-07T10:00:00.000Z".to_owned()
    }

    fn event(payload: EventPayload) -> WuEvent {
        WuEvent {
            wu_id: wu(1570),
            timestamp: ts(),
            payload,
        }
    }

    // -----------------------------------------------------------------------
    // Round trips per variant
    // -----------------------------------------------------------------------

    #[test]
    fn claim_round_trip_matches_wire_format() {
        let e = event(EventPayload::Claim {
            lane: lane(),
            title: "x".to_owned(),
        });
        let line = e.to_json_line().unwrap();
        assert!(line.contains("\"type\":\"claim\""));
        assert!(line.contains("\"wuId\":\"WU-1570\""));
        assert!(line.contains("\"lane\":\"Parent: Sub\""));
        assert!(line.contains("\"timestamp\":\"2026-02-07T10:00:00.000Z\""));
        let back = WuEvent::from_json_line(&line).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn create_round_trip() {
        let e = event(EventPayload::Create {
            lane: lane(),
            title: "seed".to_owned(),
        });
        let back = WuEvent::from_json_line(&e.to_json_line().unwrap()).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn release_round_trip() {
        let e = event(EventPayload::Release {
            reason: "Agent interrupted".to_owned(),
        });
        let back = WuEvent::from_json_line(&e.to_json_line().unwrap()).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn block_unblock_round_trip() {
        let b = event(EventPayload::Block {
            reason: "waiting on review".to_owned(),
        });
        let u = event(EventPayload::Unblock);
        for e in [b, u] {
            let back = WuEvent::from_json_line(&e.to_json_line().unwrap()).unwrap();
            assert_eq!(back, e);
        }
    }

    #[test]
    fn complete_round_trip() {
        let e = event(EventPayload::Complete);
        let line = e.to_json_line().unwrap();
        assert!(line.contains("\"type\":\"complete\""));
        assert_eq!(WuEvent::from_json_line(&line).unwrap(), e);
    }

    #[test]
    fn checkpoint_omits_absent_fields() {
        let e = event(EventPayload::Checkpoint {
            note: Some("halfway".to_owned()),
            session_id: None,
            progress: None,
        });
        let line = e.to_json_line().unwrap();
        assert!(line.contains("\"note\":\"halfway\""));
        assert!(!line.contains("sessionId"));
        assert!(!line.contains("progress"));
        assert_eq!(WuEvent::from_json_line(&line).unwrap(), e);
    }

    #[test]
    fn checkpoint_full_round_trip() {
        let e = event(EventPayload::Checkpoint {
            note: Some("tests passing".to_owned()),
            session_id: Some("sess-9".to_owned()),
            progress: Some("4/5".to_owned()),
        });
        let line = e.to_json_line().unwrap();
        assert!(line.contains("\"sessionId\":\"sess-9\""));
        assert_eq!(WuEvent::from_json_line(&line).unwrap(), e);
    }

    #[test]
    fn delegation_uses_camel_case_keys() {
        let e = event(EventPayload::Delegation {
            parent_wu_id: wu(12),
            spawn_id: "spawn-ab12".to_owned(),
        });
        let line = e.to_json_line().unwrap();
        assert!(line.contains("\"parentWuId\":\"WU-12\""));
        assert!(line.contains("\"spawnId\":\"spawn-ab12\""));
        assert_eq!(WuEvent::from_json_line(&line).unwrap(), e);
    }

    // -----------------------------------------------------------------------
    // Fail-closed validation
    // -----------------------------------------------------------------------

    #[test]
    fn unknown_type_is_a_hard_error() {
        let line = r#"{"type":"teleport","wuId":"WU-1","timestamp":"2026-02-07T10:00:00.000Z"}"#;
        assert!(WuEvent::from_json_line(line).is_err());
    }

    #[test]
    fn missing_type_is_a_hard_error() {
        let line = r#"{"wuId":"WU-1","timestamp":"2026-02-07T10:00:00.000Z"}"#;
        assert!(WuEvent::from_json_line(line).is_err());
    }

    #[test]
    fn invalid_wu_id_is_rejected() {
        let line = r#"{"type":"complete","wuId":"TICKET-9","timestamp":"2026-02-07T10:00:00.000Z"}"#;
        assert!(WuEvent::from_json_line(line).is_err());
    }

    #[test]
    fn malformed_lane_is_rejected() {
        let line = r#"{"type":"claim","wuId":"WU-1","lane":"Bad:NoSpace","title":"t","timestamp":"2026-02-07T10:00:00.000Z"}"#;
        assert!(WuEvent::from_json_line(line).is_err());
    }

    #[test]
    fn now_stamps_iso_millis() {
        let e = WuEvent::now(wu(1), EventPayload::Complete);
        // 2026-08-01T12:34:56.789Z
        assert!(e.timestamp.ends_with('Z'));
        assert_eq!(e.timestamp.len(), 24);
    }
}
