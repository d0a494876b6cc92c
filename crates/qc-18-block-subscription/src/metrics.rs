//! # Block Subscription Metrics
//!
//! Prometheus metrics for the subscription server.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! qc-18-block-subscription = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `subscription_connections_accepted_total` - Counter of accepted sockets
//! - `subscription_connections_active` - Gauge of open connections
//! - `subscription_subscribes_total` - Counter of new subscriptions (by kind)
//! - `subscription_frames_sent_total` - Counter of frames queued (by stream)
//! - `subscription_send_failures_total` - Counter of frames that could not be queued (by stream)
//! - `subscription_encode_failures_total` - Counter of blocks the encoder rejected
//! - `subscription_catch_up_ticks_total` - Counter of scheduler ticks
//! - `subscription_irreversible_cursor_min` - Gauge of the lowest irreversible cursor

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Total sockets accepted
    pub static ref CONNECTIONS_ACCEPTED: IntCounter = register_int_counter!(
        "subscription_connections_accepted_total",
        "Total number of subscriber connections accepted"
    )
    .expect("Failed to create CONNECTIONS_ACCEPTED metric");

    /// Currently open connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "subscription_connections_active",
        "Number of currently open subscriber connections"
    )
    .expect("Failed to create CONNECTIONS_ACTIVE metric");

    /// New subscriptions, labeled by kind
    pub static ref SUBSCRIBES: IntCounterVec = register_int_counter_vec!(
        "subscription_subscribes_total",
        "Total number of subscriptions registered",
        &["kind"]
    )
    .expect("Failed to create SUBSCRIBES metric");

    /// Frames queued, labeled by stream
    pub static ref FRAMES_SENT: IntCounterVec = register_int_counter_vec!(
        "subscription_frames_sent_total",
        "Total number of block frames queued to subscribers",
        &["stream"]
    )
    .expect("Failed to create FRAMES_SENT metric");

    /// Frames that could not be queued, labeled by stream
    pub static ref SEND_FAILURES: IntCounterVec = register_int_counter_vec!(
        "subscription_send_failures_total",
        "Total number of frames dropped because the subscriber was gone or too slow",
        &["stream"]
    )
    .expect("Failed to create SEND_FAILURES metric");

    /// Blocks the encoder could not serialize
    pub static ref ENCODE_FAILURES: IntCounter = register_int_counter!(
        "subscription_encode_failures_total",
        "Total number of blocks that failed to encode"
    )
    .expect("Failed to create ENCODE_FAILURES metric");

    /// Catch-up scheduler ticks
    pub static ref CATCH_UP_TICKS: IntCounter = register_int_counter!(
        "subscription_catch_up_ticks_total",
        "Total number of catch-up scheduler ticks"
    )
    .expect("Failed to create CATCH_UP_TICKS metric");

    /// Lowest irreversible cursor across subscribers
    pub static ref IRREVERSIBLE_CURSOR_MIN: IntGauge = register_int_gauge!(
        "subscription_irreversible_cursor_min",
        "Lowest irreversible cursor held by any subscriber"
    )
    .expect("Failed to create IRREVERSIBLE_CURSOR_MIN metric");
}

// =============================================================================
// METRIC RECORDING FUNCTIONS
// =============================================================================

/// Record an accepted socket
#[cfg(feature = "metrics")]
pub fn record_connection_opened() {
    CONNECTIONS_ACCEPTED.inc();
    CONNECTIONS_ACTIVE.inc();
}

/// Record a finished session
#[cfg(feature = "metrics")]
pub fn record_connection_closed() {
    CONNECTIONS_ACTIVE.dec();
}

/// Record a new subscription of `kind` ("accepted" or "irreversible")
#[cfg(feature = "metrics")]
pub fn record_subscribe(kind: &str) {
    SUBSCRIBES.with_label_values(&[kind]).inc();
}

/// Record frames queued on `stream`
#[cfg(feature = "metrics")]
pub fn record_frames_sent(stream: &str, count: u64) {
    FRAMES_SENT.with_label_values(&[stream]).inc_by(count);
}

/// Record frames that could not be queued on `stream`
#[cfg(feature = "metrics")]
pub fn record_send_failures(stream: &str, count: u64) {
    SEND_FAILURES.with_label_values(&[stream]).inc_by(count);
}

/// Record a block the encoder rejected
#[cfg(feature = "metrics")]
pub fn record_encode_failure() {
    ENCODE_FAILURES.inc();
}

/// Record one scheduler tick
#[cfg(feature = "metrics")]
pub fn record_catch_up_tick() {
    CATCH_UP_TICKS.inc();
}

/// Update the lowest irreversible cursor gauge
#[cfg(feature = "metrics")]
pub fn set_irreversible_cursor_min(cursor: u64) {
    IRREVERSIBLE_CURSOR_MIN.set(i64::try_from(cursor).unwrap_or(i64::MAX));
}

// =============================================================================
// NO-OP IMPLEMENTATIONS (when metrics feature disabled)
// =============================================================================

#[cfg(not(feature = "metrics"))]
pub fn record_connection_opened() {}

#[cfg(not(feature = "metrics"))]
pub fn record_connection_closed() {}

#[cfg(not(feature = "metrics"))]
pub fn record_subscribe(_kind: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_frames_sent(_stream: &str, _count: u64) {}

#[cfg(not(feature = "metrics"))]
pub fn record_send_failures(_stream: &str, _count: u64) {}

#[cfg(not(feature = "metrics"))]
pub fn record_encode_failure() {}

#[cfg(not(feature = "metrics"))]
pub fn record_catch_up_tick() {}

#[cfg(not(feature = "metrics"))]
pub fn set_irreversible_cursor_min(_cursor: u64) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_callable() {
        record_connection_opened();
        record_subscribe("accepted");
        record_subscribe("irreversible");
        record_frames_sent("accepted", 3);
        record_send_failures("irreversible", 1);
        record_encode_failure();
        record_catch_up_tick();
        set_irreversible_cursor_min(42);
        record_connection_closed();
    }
}
