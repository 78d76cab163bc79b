//! Event types crossing the engine boundary.
//!
//! `SwitchEvent` is the protocol's own notification; the status and fault
//! events are the observability surface, broadcast to non-real-time
//! subscribers. All types serialize with camelCase fields and lowercase
//! enum tags so downstream tooling sees one consistent shape.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Switch events
// ---------------------------------------------------------------------------

/// Emitted once per period when the buffer-half roles swap.
///
/// Direction-independent: both directions always switch together at a period
/// boundary, so one event covers the pair. `generation` is the output grant
/// epoch for `index`; hosts echo it back in
/// [`signal_output_ready_at`](crate::session::StreamSession::signal_output_ready_at).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchEvent {
    /// Slot index being granted: strictly alternates 0, 1, 0, 1, …
    pub index: usize,
    /// Stream position in frames, supplied by the driver clock.
    pub position_frames: u64,
    /// Ownership epoch of the output grant carried by this switch.
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// Status events
// ---------------------------------------------------------------------------

/// Lifecycle state of a stream session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session active; slots unowned.
    Stopped,
    /// Startup sequence in progress: silence fill and priming switches.
    Priming,
    /// Steady state: switches driven by the driver clock.
    Streaming,
    /// An ownership violation force-stopped the session.
    Faulted,
}

/// Broadcast when the session lifecycle changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. violation message).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Fault events
// ---------------------------------------------------------------------------

/// Classification of a reported protocol fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultKind {
    /// Fatal: a party acted on a slot it does not own.
    OwnershipViolation,
    /// Non-fatal: acknowledgment superseded by two or more switches.
    StaleAcknowledgment,
    /// Non-fatal: a switch dispatch missed the period deadline.
    CallbackOverrun,
    /// `start()` rejected: the required pre-fill was missing or malformed.
    PrimingPrecondition,
}

/// Broadcast for every counted fault, fatal or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolFaultEvent {
    /// Monotonically increasing fault sequence number.
    pub seq: u64,
    pub kind: FaultKind,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_event_serializes_with_camel_case_fields() {
        let event = SwitchEvent {
            index: 1,
            position_frames: 1024,
            generation: 7,
        };

        let json = serde_json::to_value(&event).expect("serialize switch event");
        assert_eq!(json["index"], 1);
        assert_eq!(json["positionFrames"], 1024);
        assert_eq!(json["generation"], 7);

        let round_trip: SwitchEvent =
            serde_json::from_value(json).expect("deserialize switch event");
        assert_eq!(round_trip, event);
    }

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = SessionStatusEvent {
            status: SessionStatus::Priming,
            detail: None,
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "priming");
        assert_eq!(json["detail"], serde_json::Value::Null);

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, SessionStatus::Priming);
    }

    #[test]
    fn fault_event_serializes_with_lowercase_kind() {
        let event = ProtocolFaultEvent {
            seq: 3,
            kind: FaultKind::StaleAcknowledgment,
            detail: "slot 0 superseded".into(),
        };

        let json = serde_json::to_value(&event).expect("serialize fault event");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["kind"], "staleacknowledgment");
        assert_eq!(json["detail"], "slot 0 superseded");
    }

    #[test]
    fn fault_kind_rejects_non_lowercase_values() {
        let invalid = r#""CallbackOverrun""#;
        assert!(serde_json::from_str::<FaultKind>(invalid).is_err());
    }
}
