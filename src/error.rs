//! Error types for the session and the transport layer.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Which discovery step came back empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStep {
    Service,
    Characteristic,
}

impl fmt::Display for DiscoveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryStep::Service => f.write_str("service"),
            DiscoveryStep::Characteristic => f.write_str("characteristic"),
        }
    }
}

/// Failures reported by the session.
///
/// None of these are fatal: the session degrades to `Idle` (or, for
/// [`SessionError::DiscoveryIncomplete`], stays connected but unsubscribed)
/// and `start()` may be called again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Bluetooth is off, unauthorised, or missing.
    #[error("Bluetooth radio is not powered on or not available")]
    RadioUnavailable,
    /// Connecting, discovering, or subscribing failed at the platform level.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Connected, but the sensor's service or characteristic is missing.
    #[error("connected, but the sound {0} was not found")]
    DiscoveryIncomplete(DiscoveryStep),
    /// The configured scan timeout elapsed without finding the sensor.
    #[error("no sensor found before the scan timeout")]
    ScanTimedOut,
    /// The session task has exited.
    #[error("session is closed")]
    SessionClosed,
}

/// Failures raised by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error(transparent)]
    Ble(#[from] btleplug::Error),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("{0}")]
    Other(String),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::ConnectionFailed(e.to_string())
    }
}
