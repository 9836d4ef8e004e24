//! The capability interface the session drives.
//!
//! Platform BLE APIs are callback-heavy; this trait flattens them into
//! async calls and streams so the session can run against a real radio
//! ([`crate::ble_transport::BleTransport`]), the built-in simulator
//! ([`crate::simulate::SimulatedTransport`]), or a test fake.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::TransportError;

/// A peripheral found by [`Transport::scan`].
///
/// `raw` is the transport's own connection reference (a btleplug
/// `Peripheral`, a simulator token, …).  The session owns the handle for as
/// long as it holds the connection.
#[derive(Debug, Clone)]
pub struct PeripheralHandle<P> {
    /// Platform identifier.
    /// • macOS / Windows: a UUID string
    /// • Linux: a Bluetooth MAC address (`AA:BB:CC:DD:EE:FF`)
    pub id: String,
    /// Advertised local name, if the advertisement carried one.
    pub name: Option<String>,
    raw: P,
}

impl<P> PeripheralHandle<P> {
    pub fn new(id: impl Into<String>, name: Option<String>, raw: P) -> Self {
        Self {
            id: id.into(),
            name,
            raw,
        }
    }

    pub fn raw(&self) -> &P {
        &self.raw
    }

    /// Name for logs and the display: the advertised name, else the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Adapter-level events that end a connection without the session asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The local radio was switched off.
    RadioPoweredOff,
    /// The peripheral with this id dropped the link.
    Disconnected(String),
}

/// BLE central capabilities needed to reach one sensor.
///
/// Implementations may do their I/O on any task; the session calls these
/// from spawned tasks and hands the results back to its own task.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection reference carried inside [`PeripheralHandle`].
    type Peripheral: Clone + Send + Sync + 'static;

    /// `true` when the radio is powered on and able to scan.
    async fn is_radio_ready(&self) -> bool;

    /// Start scanning for peripherals advertising `service`.
    ///
    /// The stream yields each matching peripheral as it is discovered.
    async fn scan(
        &self,
        service: Uuid,
    ) -> Result<BoxStream<'static, PeripheralHandle<Self::Peripheral>>, TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(
        &self,
        peripheral: &PeripheralHandle<Self::Peripheral>,
    ) -> Result<(), TransportError>;

    /// Discover services; `Ok(false)` if `service` is not among them.
    async fn discover_service(
        &self,
        peripheral: &PeripheralHandle<Self::Peripheral>,
        service: Uuid,
    ) -> Result<bool, TransportError>;

    /// `Ok(false)` if `service` has no `characteristic`.
    async fn discover_characteristic(
        &self,
        peripheral: &PeripheralHandle<Self::Peripheral>,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<bool, TransportError>;

    /// Enable notifications on `characteristic` and return its payloads.
    ///
    /// The stream ends when the link drops.
    async fn subscribe(
        &self,
        peripheral: &PeripheralHandle<Self::Peripheral>,
        characteristic: Uuid,
    ) -> Result<BoxStream<'static, Vec<u8>>, TransportError>;

    async fn disconnect(
        &self,
        peripheral: &PeripheralHandle<Self::Peripheral>,
    ) -> Result<(), TransportError>;

    /// Adapter-wide link events for the lifetime of the transport.
    async fn link_events(&self) -> Result<BoxStream<'static, LinkEvent>, TransportError>;
}
