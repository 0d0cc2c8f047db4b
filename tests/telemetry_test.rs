//! Integration tests for telemetry initialization and span helpers.

use frontierq::model::{ItemId, ItemState};
use frontierq::telemetry::{TelemetryConfig, init_telemetry, metrics, queue};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "frontierq-test".to_string(),
        log_level: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    if let Ok(guard) = init_telemetry(config) {
        guard.force_flush();
    }
}

#[test]
fn operation_span_records_item_and_transition() {
    let id = ItemId::new();
    let span = queue::start_operation_span("memory", "dequeue", "frontier");
    queue::record_item(&span, id);
    queue::record_state_transition(&span, id, ItemState::Pending, ItemState::Claimed);
    queue::record_state_transition(&span, id, ItemState::Claimed, ItemState::Done);
}

#[test]
fn instruments_accept_records_without_a_provider() {
    use opentelemetry::KeyValue;

    metrics::items_enqueued().add(1, &[KeyValue::new("outcome", "accepted")]);
    metrics::items_dropped().add(1, &[KeyValue::new("via", "reaper")]);
    metrics::operation_duration_ms().record(
        1.5,
        &[
            KeyValue::new("backend", "memory"),
            KeyValue::new("operation", "enqueue"),
        ],
    );
}

#[test]
fn item_state_transitions_follow_the_lifecycle() {
    use ItemState::*;

    assert!(Pending.can_transition_to(Claimed));
    assert!(Pending.can_transition_to(Expired));
    assert!(Claimed.can_transition_to(Pending));
    assert!(Claimed.can_transition_to(Done));
    assert!(Claimed.can_transition_to(Dropped));

    assert!(!Pending.can_transition_to(Done));
    assert!(!Done.can_transition_to(Pending));
    assert!(!Expired.can_transition_to(Claimed));

    for state in [Done, Dropped, Expired] {
        assert!(state.is_terminal());
    }
    assert!(!Claimed.is_terminal());
}
