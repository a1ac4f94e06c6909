//! Deterministic event ordering.

use braid_core::EventPriority;
use std::time::Duration;

/// Total order over simulated events.
///
/// Events sort by time, then priority (internal before timer before
/// network before client), then insertion sequence. The sequence number
/// makes the order total, so two runs with the same seed process events
/// identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    /// Simulated delivery time.
    pub time: Duration,
    /// Priority class within the same instant.
    pub priority: EventPriority,
    /// Insertion sequence, breaking all remaining ties.
    pub seq: u64,
}
