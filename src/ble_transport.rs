use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{LinkEvent, PeripheralHandle, Transport};

/// How long `is_radio_ready` waits for the adapter to report `PoweredOn`.
///
/// CoreBluetooth starts in an "unknown" state for a moment after the
/// process launches (or after Bluetooth is toggled).
const RADIO_READY_TIMEOUT: Duration = Duration::from_secs(3);

/// Hard limit on `Peripheral::connect`.  BlueZ's `Device1.Connect` can block
/// forever when the device is out of range; a BLE connect normally takes <2 s.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

// ── BleTransport ──────────────────────────────────────────────────────────────

/// [`Transport`] over the platform Bluetooth stack via `btleplug`.
///
/// Uses the first adapter the platform reports.
pub struct BleTransport {
    adapter: Adapter,
}

impl BleTransport {
    /// Open the first Bluetooth adapter.
    ///
    /// # Errors
    /// [`TransportError::NoAdapter`] when the machine has no adapter, or a
    /// [`TransportError::Ble`] if the platform manager cannot be created.
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;
        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter: {info}"),
            Err(e) => debug!("adapter_info() failed: {e}"),
        }
        Ok(Self { adapter })
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        characteristic: Uuid,
    ) -> Result<btleplug::api::Characteristic, TransportError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(TransportError::CharacteristicNotFound(characteristic))
    }
}

/// Peripheral id of an adapter event that reports a sighting.
///
/// CoreBluetooth and WinRT send `DeviceDiscovered` only the first time a
/// device is seen by the adapter; later sightings, including every one
/// after a reconnect, arrive as `DeviceUpdated`.
fn sighted(event: CentralEvent) -> Option<PeripheralId> {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => Some(id),
        _ => None,
    }
}

/// Whether a peripheral's advertised service list admits it.
///
/// Live sightings already passed the scan filter, so an empty list is
/// accepted there.  Peripherals cached by the adapter must list `service`.
fn admits(advertised: &[Uuid], service: Uuid, cached: bool) -> bool {
    if advertised.is_empty() {
        !cached
    } else {
        advertised.contains(&service)
    }
}

async fn matching(
    peripheral: Peripheral,
    service: Uuid,
    cached: bool,
) -> Option<PeripheralHandle<Peripheral>> {
    let id = peripheral.id();
    let props = peripheral.properties().await.ok().flatten();
    let advertised = props.as_ref().map(|p| p.services.as_slice()).unwrap_or_default();
    if !admits(advertised, service, cached) {
        debug!("scan: skipping {id:?}, service not advertised");
        return None;
    }
    let name = props.and_then(|p| p.local_name);
    debug!("scan: matched {name:?} id={id} (cached: {cached})");
    Some(PeripheralHandle::new(id.to_string(), name, peripheral))
}

#[async_trait]
impl Transport for BleTransport {
    type Peripheral = Peripheral;

    async fn is_radio_ready(&self) -> bool {
        let deadline = tokio::time::Instant::now() + RADIO_READY_TIMEOUT;
        loop {
            match self.adapter.adapter_state().await {
                Ok(CentralState::PoweredOn) => return true,
                Ok(CentralState::PoweredOff) => return false,
                Ok(state) => {
                    if tokio::time::Instant::now() >= deadline {
                        warn!("adapter still in state {state:?} after {RADIO_READY_TIMEOUT:?}");
                        return false;
                    }
                    debug!("adapter state = {state:?}, waiting…");
                }
                Err(e) => {
                    // Some backends cannot report power state at all.
                    warn!("adapter_state() error: {e}; assuming the radio is on");
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn scan(
        &self,
        service: Uuid,
    ) -> Result<BoxStream<'static, PeripheralHandle<Peripheral>>, TransportError> {
        // Subscribe before starting the scan so no discovery event is missed.
        let events = self.adapter.events().await?;
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;

        // Devices the adapter already knows are not announced as discovered
        // again, so offer them before waiting on live sightings.
        let mut known = Vec::new();
        for p in self.adapter.peripherals().await.unwrap_or_default() {
            if let Some(handle) = matching(p, service, true).await {
                known.push(handle);
            }
        }

        let adapter = self.adapter.clone();
        let live = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let id = sighted(event)?;
                let peripheral = adapter.peripheral(&id).await.ok()?;
                matching(peripheral, service, false).await
            }
        });
        Ok(stream::iter(known).chain(live).boxed())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralHandle<Peripheral>) -> Result<(), TransportError> {
        let p = peripheral.raw();
        if p.is_connected().await.unwrap_or(false) {
            return Ok(());
        }
        tokio::time::timeout(CONNECT_TIMEOUT, p.connect())
            .await
            .map_err(|_| TransportError::Timeout("BLE connect()"))??;
        Ok(())
    }

    async fn discover_service(
        &self,
        peripheral: &PeripheralHandle<Peripheral>,
        service: Uuid,
    ) -> Result<bool, TransportError> {
        let p = peripheral.raw();

        // On Linux (BlueZ over D-Bus) the connection completes before the
        // remote GATT cache is populated; discovering too early returns an
        // empty service set.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(DISCOVERY_TIMEOUT, p.discover_services())
            .await
            .map_err(|_| TransportError::Timeout("discover_services()"))??;

        let services = p.services();
        debug!(
            "{}: services discovered: {:?}",
            peripheral.label(),
            services.iter().map(|s| s.uuid).collect::<Vec<_>>()
        );
        Ok(services.iter().any(|s| s.uuid == service))
    }

    async fn discover_characteristic(
        &self,
        peripheral: &PeripheralHandle<Peripheral>,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<bool, TransportError> {
        Ok(peripheral
            .raw()
            .services()
            .iter()
            .filter(|s| s.uuid == service)
            .any(|s| s.characteristics.iter().any(|c| c.uuid == characteristic)))
    }

    async fn subscribe(
        &self,
        peripheral: &PeripheralHandle<Peripheral>,
        characteristic: Uuid,
    ) -> Result<BoxStream<'static, Vec<u8>>, TransportError> {
        let p = peripheral.raw();
        let chr = Self::find_characteristic(p, characteristic)?;
        p.subscribe(&chr).await?;

        let notifications = p.notifications().await?;
        let payloads = notifications.filter_map(move |n| {
            future::ready((n.uuid == characteristic).then_some(n.value))
        });
        Ok(payloads.boxed())
    }

    async fn disconnect(&self, peripheral: &PeripheralHandle<Peripheral>) -> Result<(), TransportError> {
        peripheral.raw().disconnect().await?;
        Ok(())
    }

    async fn link_events(&self) -> Result<BoxStream<'static, LinkEvent>, TransportError> {
        let events = self.adapter.events().await?;
        let links = events.filter_map(|event| {
            future::ready(match event {
                CentralEvent::DeviceDisconnected(id) => Some(LinkEvent::Disconnected(id.to_string())),
                CentralEvent::StateUpdate(CentralState::PoweredOff) => {
                    Some(LinkEvent::RadioPoweredOff)
                }
                _ => None,
            })
        });
        Ok(links.boxed())
    }
}
