//! # alerto-rs
//!
//! Async Rust client for a Bluetooth Low Energy sound-classification sensor
//! (e.g. an Arduino Nano 33 BLE Sense running a sound classifier).  The
//! sensor notifies one label per detected sound; this crate turns that
//! stream into alerts, a live display state, and a history of confirmed
//! detections.
//!
//! ## Pipeline
//!
//! ```text
//! Transport ──bytes──► Session ──label──► Debouncer ─┬─► AlertSink (vibrate + notify)
//!  (btleplug │          (state               │       ├─► DisplayState (watch)
//!   or sim)  │           machine)            │       └─► History (after W quiet)
//!            └── link events ─────────┘
//! ```
//!
//! * Background noise (`"rauschen"`) is never alerted or recorded.
//! * Every other label is shown and alerted on immediately.
//! * A burst of labels is recorded once, after a quiet window (10 s by
//!   default) following its last label.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use alerto::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = BleTransport::new().await?;
//!     let session = SessionHandle::spawn(
//!         transport,
//!         SessionConfig::default(),
//!         Arc::new(LogAlertSink::new()),
//!     );
//!     session.start().await?;
//!
//!     let mut events = session.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         if let SessionEvent::Confirmed(d) = event {
//!             println!("{} at {}", d.label, d.confirmed_at);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the commonly needed types |
//! | [`session`] | The state machine actor and its [`session::SessionHandle`] |
//! | [`debounce`] | Burst collapsing and the reset-deadline policy |
//! | [`transport`] | The capability trait the session drives |
//! | [`ble_transport`] | `btleplug` implementation of the transport |
//! | [`simulate`] | Scripted transport for running without hardware |
//! | [`alert`] | Alert sink trait and notification content |
//! | [`history`] | In-memory detection history |
//! | [`protocol`] | GATT UUIDs, reserved labels, payload decoding |
//! | [`types`] | Session state, events, and display snapshot types |
//! | [`error`] | Session and transport errors |

pub mod alert;
pub mod ble_transport;
pub mod debounce;
pub mod error;
pub mod history;
pub mod protocol;
pub mod session;
pub mod simulate;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Session ───────────────────────────────────────────────────────────────
    pub use crate::session::{SessionConfig, SessionHandle};

    // ── Transports ────────────────────────────────────────────────────────────
    pub use crate::ble_transport::BleTransport;
    pub use crate::simulate::SimulatedTransport;
    pub use crate::transport::{LinkEvent, PeripheralHandle, Transport};

    // ── Alerts and history ────────────────────────────────────────────────────
    pub use crate::alert::{AlertSink, LogAlertSink, Notification};
    pub use crate::history::HistoryView;

    // ── Events, state, and errors ─────────────────────────────────────────────
    pub use crate::error::{SessionError, TransportError};
    pub use crate::types::{DetectionEvent, DisplayState, HistoryEntry, SessionEvent, SessionState};

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{
        DEBOUNCE_WINDOW, IDLE_LABEL, NOISE_LABEL, NOT_LISTENING_LABEL, SOUND_CHARACTERISTIC_UUID,
        SOUND_SERVICE_UUID,
    };
}
