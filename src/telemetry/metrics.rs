//! Metric instrument factories for clipboard-tts.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"clipboard-tts"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for clipboard-tts instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("clipboard-tts")
}

/// Counter: notifications received by a listener.
/// Labels: `channel`.
pub fn events_received() -> Counter<u64> {
    meter()
        .u64_counter("pipeline.events.received")
        .with_description("Number of store notifications received")
        .build()
}

/// Counter: terminal outcome of each stage invocation.
/// Labels: `stage`, `outcome`.
pub fn stage_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("pipeline.stage.outcomes")
        .with_description("Stage processor outcomes")
        .build()
}

/// Counter: capability calls, including retries.
/// Labels: `stage`, `result` ("ok" | "transient" | "fatal").
pub fn capability_attempts() -> Counter<u64> {
    meter()
        .u64_counter("pipeline.capability.attempts")
        .with_description("Capability invocations, including retries")
        .build()
}

/// Counter: store mutations.
/// Labels: `operation`, `result`.
pub fn store_writes() -> Counter<u64> {
    meter()
        .u64_counter("pipeline.store.writes")
        .with_description("Work store mutations")
        .build()
}

/// Counter: successful reconnects after a lost connection.
pub fn reconnects() -> Counter<u64> {
    meter()
        .u64_counter("pipeline.connection.reconnects")
        .with_description("Store reconnects after a dropped notification stream")
        .build()
}

/// Histogram: stage invocation duration in milliseconds.
/// Labels: `stage`.
pub fn stage_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("pipeline.stage.duration_ms")
        .with_description("Stage processor duration in milliseconds")
        .with_unit("ms")
        .build()
}
