//! The transport seam and event delivery.
//!
//! The store owns no connections; it holds one [`Socket`] handle per
//! session and writes JSON frames through it when the gateway asks.
//! Delivery is synchronous on the caller's thread — callers that cannot
//! tolerate a failing or slow peer use [`try_send_event`] on the store,
//! which records the incident and moves on.
//!
//! ## Metrics
//!
//! - `liveq_dropped_events_total` — events swallowed by
//!   `try_send_event` after a send failure.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// A writable transport handle bound to one session.
///
/// Implementations write one complete frame per call. The store never
/// retries; error handling policy belongs to the caller.
pub trait Socket: Send + Sync {
    /// Write one JSON text frame.
    fn send_frame(&self, frame: &str) -> std::io::Result<()>;
}

static LIVEQ_DROPPED_EVENTS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Snapshot of event-delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DroppedEventsSnapshot {
    pub liveq_dropped_events_total: u64,
}

/// Read a point-in-time snapshot of the delivery counters.
#[must_use]
pub fn dropped_events_snapshot() -> DroppedEventsSnapshot {
    DroppedEventsSnapshot {
        liveq_dropped_events_total: LIVEQ_DROPPED_EVENTS_TOTAL.load(Ordering::Relaxed),
    }
}

/// Reset the delivery counters (for tests).
pub fn reset_dropped_events() {
    LIVEQ_DROPPED_EVENTS_TOTAL.store(0, Ordering::Relaxed);
}

pub(crate) fn record_dropped_event() {
    LIVEQ_DROPPED_EVENTS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_snapshot() {
        reset_dropped_events();
        record_dropped_event();
        record_dropped_event();
        assert_eq!(dropped_events_snapshot().liveq_dropped_events_total, 2);
        reset_dropped_events();
        assert_eq!(dropped_events_snapshot().liveq_dropped_events_total, 0);
    }
}
