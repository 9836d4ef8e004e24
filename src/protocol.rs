//! GATT UUIDs, reserved labels, timing constants, and the notification
//! wire format of the sound-classification sensor.
//!
//! The sensor exposes one primary service with one notify characteristic.
//! Each notification carries a single classification label as UTF-8 text,
//! with no length prefix or framing.

use std::time::Duration;

use uuid::Uuid;

// ── Service ──────────────────────────────────────────────────────────────────

/// Primary GATT service UUID advertised by the sensor.
///
/// Used as the scan filter; a peripheral advertising anything else is never
/// connected to.
pub const SOUND_SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef0);

// ── Characteristic ────────────────────────────────────────────────────────────

/// Notify characteristic carrying classification labels.
pub const SOUND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x87654321_4321_6789_4321_0fedcba98765);

// ── Reserved labels ───────────────────────────────────────────────────────────

/// Label the classifier emits for background noise.
///
/// Compared case-insensitively; never alerts and never reaches the history.
pub const NOISE_LABEL: &str = "rauschen";

/// Display text while listening with no active detection.
pub const IDLE_LABEL: &str = "Kein Signal";

/// Display text while the session is stopped.
pub const NOT_LISTENING_LABEL: &str = "Erkennung gestoppt";

// ── Timing ────────────────────────────────────────────────────────────────────

/// Quiet period after the last detection before it is confirmed into history.
///
/// The classifier reports a single knock or doorbell as a burst of repeated
/// labels; ten seconds comfortably covers one burst.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(10);

// ── Payload decoding ──────────────────────────────────────────────────────────

/// Decode one notification payload into a label.
///
/// Surrounding whitespace and NUL padding (some firmware sends fixed-size
/// C buffers) are stripped.  Returns `None` for invalid UTF-8 or a payload
/// that is empty after trimming; both are expected under radio noise and
/// are dropped by the caller.
///
/// ```
/// # use alerto::protocol::decode_label;
/// assert_eq!(decode_label(b"Klopfen\0\0").as_deref(), Some("Klopfen"));
/// assert_eq!(decode_label(&[0xff, 0xfe]), None);
/// ```
pub fn decode_label(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    let label = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if label.is_empty() {
        None
    } else {
        Some(label.to_owned())
    }
}

/// `true` when `label` equals `noise_label`, ignoring case.
pub fn is_noise(label: &str, noise_label: &str) -> bool {
    label.to_lowercase() == noise_label.to_lowercase()
}
