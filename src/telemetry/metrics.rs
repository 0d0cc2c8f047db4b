//! Metric instrument factories for frontierq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"frontierq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("frontierq")
}

/// Counter: enqueue attempts.
/// Labels: `namespace`, `outcome` ("accepted" | "duplicate" | "deduped_updated"
/// | "capacity_exceeded" | "closed").
pub fn items_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("frontierq.items.enqueued")
        .with_description("Number of enqueue attempts by outcome")
        .build()
}

/// Counter: items handed to workers.
/// Labels: `namespace`.
pub fn items_dequeued() -> Counter<u64> {
    meter()
        .u64_counter("frontierq.items.dequeued")
        .with_description("Number of items claimed by workers")
        .build()
}

/// Counter: acknowledgements.
/// Labels: `namespace`, `result` ("acked" | "stale").
pub fn items_acked() -> Counter<u64> {
    meter()
        .u64_counter("frontierq.items.acked")
        .with_description("Number of acknowledged claims")
        .build()
}

/// Counter: negative acknowledgements.
/// Labels: `namespace`, `result` ("requeued" | "dropped" | "stale").
pub fn items_nacked() -> Counter<u64> {
    meter()
        .u64_counter("frontierq.items.nacked")
        .with_description("Number of negatively acknowledged claims")
        .build()
}

/// Counter: expired claims returned to pending by the reaper.
/// Labels: `namespace`.
pub fn items_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("frontierq.items.reclaimed")
        .with_description("Number of orphaned claims recovered")
        .build()
}

/// Counter: items dropped after exceeding their orphan retries.
/// Labels: `namespace`, `via` ("nack" | "reaper").
pub fn items_dropped() -> Counter<u64> {
    meter()
        .u64_counter("frontierq.items.dropped")
        .with_description("Number of items dropped after max retries")
        .build()
}

/// Counter: pending items that outlived their TTL.
/// Labels: `namespace`.
pub fn items_expired() -> Counter<u64> {
    meter()
        .u64_counter("frontierq.items.expired")
        .with_description("Number of pending items expired unclaimed")
        .build()
}

/// Histogram: queue operation duration in milliseconds.
/// Labels: `backend`, `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("frontierq.operation.duration_ms")
        .with_description("Queue operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
