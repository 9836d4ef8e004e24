//! Collapses bursts of classifier labels into single confirmed detections.
//!
//! The sensor reports one real-world sound (a knock, the doorbell) as a run
//! of repeated or overlapping labels.  Every non-noise label is shown and
//! alerted on immediately, but only the last label of a burst is confirmed,
//! once the line has been quiet for the debounce window.
//!
//! # State Machine
//!
//! ```text
//!                 label (≠ noise)             window elapsed
//!   Quiet ─────────────────────────► Pending ─────────────────► Quiet
//!     ▲                               │   ▲                  (emits DetectionEvent)
//!     │          noise / cancel()     │   │ label (≠ noise):
//!     └───────────────────────────────┘   └─ replace, re-arm
//! ```
//!
//! There is at most one pending reset.  Each one carries a fresh id, and
//! arming a new one drops the old, so a stale deadline can never fire.
//!
//! The debouncer itself performs no I/O and owns no timer task: the session
//! polls [`Debouncer::deadline`] from its event loop and calls
//! [`Debouncer::fire`] when it passes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::protocol::is_noise;
use crate::types::DetectionEvent;

/// What the caller should do after [`Debouncer::on_label`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelOutcome {
    /// Background noise: show the idle label.  `cancelled` is `true` if a
    /// pending detection was discarded.
    Noise { cancelled: bool },
    /// Show the label and alert.  A reset timer is now armed.
    Detected { replaced: bool },
}

#[derive(Debug)]
struct PendingReset {
    id: u64,
    label: String,
    detected_at: DateTime<Utc>,
    deadline: Instant,
}

/// Debounce policy for one session.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    noise_label: String,
    pending: Option<PendingReset>,
    next_id: u64,
}

impl Debouncer {
    pub fn new(window: Duration, noise_label: impl Into<String>) -> Self {
        Self {
            window,
            noise_label: noise_label.into(),
            pending: None,
            next_id: 0,
        }
    }

    /// Feed one decoded label.
    ///
    /// `now` drives the reset deadline; `wall` is recorded as the
    /// detection time.
    pub fn on_label(&mut self, label: &str, now: Instant, wall: DateTime<Utc>) -> LabelOutcome {
        let cancelled = self.pending.take().is_some();

        if is_noise(label, &self.noise_label) {
            return LabelOutcome::Noise { cancelled };
        }

        self.next_id += 1;
        self.pending = Some(PendingReset {
            id: self.next_id,
            label: label.to_owned(),
            detected_at: wall,
            deadline: now + self.window,
        });
        LabelOutcome::Detected { replaced: cancelled }
    }

    /// Deadline of the pending reset, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Label waiting for confirmation, if any.
    pub fn pending_label(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.label.as_str())
    }

    /// Id of the pending reset.  Changes every time a reset is armed.
    pub fn pending_id(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.id)
    }

    /// Confirm the pending detection if its deadline has passed.
    ///
    /// Returns `None` (and keeps the reset armed) when called early, so a
    /// spurious wake-up cannot confirm anything.
    pub fn fire(&mut self, now: Instant, wall: DateTime<Utc>) -> Option<DetectionEvent> {
        if self.pending.as_ref()?.deadline > now {
            return None;
        }
        let p = self.pending.take()?;
        Some(DetectionEvent {
            label: p.label,
            detected_at: p.detected_at,
            confirmed_at: wall,
        })
    }

    /// Drop the pending reset without confirming it.
    ///
    /// Returns the discarded label.
    pub fn cancel(&mut self) -> Option<String> {
        self.pending.take().map(|p| p.label)
    }
}
