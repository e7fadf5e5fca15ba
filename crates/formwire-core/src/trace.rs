#![forbid(unsafe_code)]

//! Recorded bus activity for debugging and golden comparison.
//!
//! When [`BusConfig::record_trace`](crate::bus::BusConfig) is set, the bus
//! appends a [`BusEvent`] for every admitted, delivered, failed, or dropped
//! announcement. Sequence numbers are assigned at enqueue time, so the trace
//! also shows the breadth-first order in which re-entrant publishes were
//! processed.
//!
//! Traces can be checksummed; identical sessions produce identical checksums.

use std::hash::{DefaultHasher, Hash, Hasher};

use crate::announcement::AnnouncementKind;
use crate::bus::SubId;
use crate::scope::ScopeId;

// ---------------------------------------------------------------------------
// BusEvent
// ---------------------------------------------------------------------------

/// Why an announcement was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DropReason {
    /// `Change` or `Unmount` for a field that is not mounted (removed already).
    NotMounted,
}

/// One step of bus activity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "event", rename_all = "snake_case")
)]
pub enum BusEvent {
    /// Announcement admitted for delivery.
    Published {
        seq: u64,
        name: String,
        kind: AnnouncementKind,
        scope: ScopeId,
        depth: usize,
    },
    /// Handler accepted the announcement.
    Delivered { seq: u64, subscriber: SubId },
    /// Handler returned an error; delivery continued.
    HandlerFailed {
        seq: u64,
        subscriber: SubId,
        message: String,
    },
    /// Announcement discarded before delivery.
    Dropped {
        seq: u64,
        name: String,
        reason: DropReason,
    },
    /// Same name mounted twice within one scope.
    DuplicateMount {
        seq: u64,
        name: String,
        scope: ScopeId,
    },
    /// Depth or delivery guard aborted the drain.
    GuardTripped {
        seq: u64,
        name: String,
        depth: usize,
        deliveries: usize,
    },
}

impl BusEvent {
    /// Sequence number of the announcement this event is about.
    #[must_use]
    pub fn seq(&self) -> u64 {
        match self {
            Self::Published { seq, .. }
            | Self::Delivered { seq, .. }
            | Self::HandlerFailed { seq, .. }
            | Self::Dropped { seq, .. }
            | Self::DuplicateMount { seq, .. }
            | Self::GuardTripped { seq, .. } => *seq,
        }
    }

    /// Event type name for logging.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Published { .. } => "published",
            Self::Delivered { .. } => "delivered",
            Self::HandlerFailed { .. } => "handler_failed",
            Self::Dropped { .. } => "dropped",
            Self::DuplicateMount { .. } => "duplicate_mount",
            Self::GuardTripped { .. } => "guard_tripped",
        }
    }
}

// ---------------------------------------------------------------------------
// BusTrace
// ---------------------------------------------------------------------------

/// Ordered log of bus events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusTrace {
    events: Vec<BusEvent>,
}

impl BusTrace {
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, event: BusEvent) {
        self.events.push(event);
    }

    #[must_use]
    pub fn events(&self) -> &[BusEvent] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Names of admitted announcements, in delivery order.
    #[must_use]
    pub fn published_names(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                BusEvent::Published { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Check if the trace contains an event of `event_type` for `seq`.
    #[must_use]
    pub fn contains_event_type(&self, seq: u64, event_type: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.seq() == seq && e.event_type() == event_type)
    }

    /// Count events of one type.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    /// Checksum over all events and their order.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for event in &self.events {
            event.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Verify trace invariants.
    ///
    /// Returns a list of violations if any invariants are broken.
    #[must_use]
    pub fn verify_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();

        // Invariant 1: admitted announcements are processed in enqueue order.
        let mut last_published = None;
        for event in &self.events {
            if let BusEvent::Published { seq, .. } = event {
                if let Some(last) = last_published
                    && *seq <= last
                {
                    violations.push(format!("Non-monotonic publish seq: {seq} after {last}"));
                }
                last_published = Some(*seq);
            }
        }

        // Invariant 2: deliveries only happen for the announcement in flight.
        let mut in_flight = None;
        for event in &self.events {
            match event {
                BusEvent::Published { seq, .. } => in_flight = Some(*seq),
                BusEvent::Delivered { seq, .. } | BusEvent::HandlerFailed { seq, .. }
                    if in_flight != Some(*seq) =>
                {
                    violations.push(format!("Delivery for seq {seq} outside its publish"));
                }
                _ => {}
            }
        }

        violations
    }

    /// Serialize the trace as JSON lines, one event per line.
    #[cfg(feature = "serde")]
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}
