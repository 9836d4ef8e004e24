//! Side-effect sink for new detections.
//!
//! The session calls the sink synchronously from its event loop and never
//! waits on delivery, so implementations must return quickly: hand the
//! work to a channel or spawn it.

use std::io::Write as _;

use log::{info, warn};

/// Receives one `vibrate` + `notify` pair per non-noise label.
pub trait AlertSink: Send + Sync {
    /// Haptic feedback.  Called before [`AlertSink::notify`].
    fn vibrate(&self);
    /// Deliver a user-visible notification for `label`.
    fn notify(&self, label: &str);
}

/// Content of a detection notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Deliver with the critical alert sound (breaks through do-not-disturb
    /// where the platform allows it).
    pub critical: bool,
}

impl Notification {
    pub fn for_label(label: &str) -> Self {
        Self {
            title: format!("🔊 {label} 🔊"),
            body: "Es wurde ein neues Geräusch erkannt.".into(),
            critical: true,
        }
    }
}

/// Sink for headless use: logs every alert and can ring the terminal bell
/// in place of vibration.
#[derive(Debug, Default, Clone)]
pub struct LogAlertSink {
    bell: bool,
}

impl LogAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write BEL to stderr on every `vibrate`.
    pub fn with_bell(mut self, bell: bool) -> Self {
        self.bell = bell;
        self
    }
}

impl AlertSink for LogAlertSink {
    fn vibrate(&self) {
        if self.bell {
            let mut err = std::io::stderr();
            let _ = err.write_all(b"\x07");
            let _ = err.flush();
        }
    }

    fn notify(&self, label: &str) {
        let n = Notification::for_label(label);
        if n.critical {
            warn!("{}  {}", n.title, n.body);
        } else {
            info!("{}  {}", n.title, n.body);
        }
    }
}
