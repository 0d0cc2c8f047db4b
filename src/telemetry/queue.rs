//! Queue operation span helpers.
//!
//! Every backend operation runs inside an `frontierq.<operation>` span so
//! traces show which namespace and backend served it. Item transitions are
//! recorded as events on the active span.

use tracing::Span;

use crate::model::{ItemId, ItemState};

/// Start a span for one queue operation.
///
/// `item.id` is declared empty and filled once the operation knows which
/// item it touched.
pub fn start_operation_span(backend: &str, operation: &str, namespace: &str) -> Span {
    tracing::debug_span!(
        "frontierq.operation",
        "queue.backend" = backend,
        "queue.operation" = operation,
        "queue.namespace" = namespace,
        "item.id" = tracing::field::Empty,
    )
}

/// Record which item the operation touched.
pub fn record_item(span: &Span, id: ItemId) {
    span.record("item.id", tracing::field::display(id));
}

/// Record an item state transition on the given span.
pub fn record_state_transition(span: &Span, id: ItemId, from: ItemState, to: ItemState) {
    debug_assert!(
        from.can_transition_to(to),
        "illegal item transition {from} -> {to}"
    );
    span.in_scope(|| {
        tracing::debug!(item = %id, %from, %to, "state_transition");
    });
}
