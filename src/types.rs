use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;

/// Lifecycle of the single sensor connection.
///
/// The forward path is strictly `Idle → Scanning → Connecting → Subscribed`;
/// any state may fall back to `Idle` on stop or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Not scanning and not connected.
    Idle,
    /// Radio scan running, waiting for the first matching advertisement.
    Scanning,
    /// Peripheral found; connecting, discovering, or enabling notifications.
    ///
    /// A session whose discovery found nothing stays here until stopped.
    Connecting,
    /// Notifications enabled; labels are flowing into the debouncer.
    Subscribed,
}

impl SessionState {
    /// `true` if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Scanning) | (Scanning, Connecting) | (Connecting, Subscribed) | (_, Idle)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Scanning => "scanning",
            SessionState::Connecting => "connecting",
            SessionState::Subscribed => "subscribed",
        };
        f.write_str(s)
    }
}

/// A detection that survived the debounce window.
///
/// Only [`crate::debounce::Debouncer::fire`] creates these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Label reported by the sensor, exactly as decoded.
    pub label: String,
    /// Wall-clock time the label that armed the window arrived.
    pub detected_at: DateTime<Utc>,
    /// Wall-clock time the window elapsed without a newer label.
    pub confirmed_at: DateTime<Utc>,
}

/// One row of the detection history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub label: String,
    /// Confirmation time of the detection.
    pub timestamp: DateTime<Utc>,
}

impl From<&DetectionEvent> for HistoryEntry {
    fn from(event: &DetectionEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: event.label.clone(),
            timestamp: event.confirmed_at,
        }
    }
}

/// Snapshot of everything a UI needs to draw the live view.
///
/// Published through a `tokio::sync::watch` channel; see
/// [`crate::session::SessionHandle::watch_display`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayState {
    pub session: SessionState,
    /// Current display text: a detected label, the idle label, or the
    /// not-listening label.
    pub label: String,
    /// `true` between a successful `start()` and the next stop or failure.
    pub service_running: bool,
    /// Advertised name (or platform id) of the peripheral currently held.
    pub peripheral: Option<String>,
    /// Notifications dropped because they did not decode to a label.
    pub dropped_payloads: u64,
}

/// Everything broadcast by a running session.
///
/// Receivers that fall behind lose the oldest events (`broadcast` semantics);
/// the `watch` channels always hold the latest state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session moved to a new [`SessionState`].
    StateChanged(SessionState),
    /// A non-noise label arrived and was shown immediately.  Not yet
    /// confirmed; a newer label within the window replaces it.
    Detected(String),
    /// The debounce window elapsed; the detection is now in the history.
    Confirmed(DetectionEvent),
    /// A non-fatal failure.  The session has already degraded (usually to
    /// `Idle`); call `start()` again to recover.
    Error(SessionError),
}
