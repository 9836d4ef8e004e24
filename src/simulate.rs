//! A built-in stand-in for the sensor, so the client runs without hardware.
//!
//! The simulated radio is always on, "discovers" one peripheral shortly
//! after scanning starts, and then notifies a fixed script of labels in a
//! loop: noise, a knock burst, a doorbell, a corrupted packet, and so on.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::debug;
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{LinkEvent, PeripheralHandle, Transport};

/// Delay before the simulated sensor shows up in a scan.
const DISCOVERY_DELAY: Duration = Duration::from_millis(800);

const CONNECT_DELAY: Duration = Duration::from_millis(300);

/// One scripted notification: wait, then send.
#[derive(Debug, Clone)]
pub struct ScriptStep {
    pub delay: Duration,
    pub payload: Vec<u8>,
}

impl ScriptStep {
    pub fn label(delay_ms: u64, label: &str) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            payload: label.as_bytes().to_vec(),
        }
    }

    pub fn raw(delay_ms: u64, payload: &[u8]) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            payload: payload.to_vec(),
        }
    }
}

/// The script used by `--simulate`.  Gaps longer than the default 10 s
/// window let each burst confirm into the history.
pub fn default_script() -> Vec<ScriptStep> {
    vec![
        ScriptStep::label(1_500, "rauschen"),
        ScriptStep::label(2_000, "Klopfen"),
        ScriptStep::label(400, "Klopfen"),
        ScriptStep::label(600, "Klopfen"),
        ScriptStep::label(11_000, "rauschen"),
        ScriptStep::label(3_000, "Klingel"),
        ScriptStep::raw(200, &[0xc3, 0x28]),
        ScriptStep::label(700, "Klingel"),
        ScriptStep::label(12_000, "Hundebellen"),
        ScriptStep::label(1_000, "rauschen"),
        ScriptStep::label(4_000, "Rauschen"),
        ScriptStep::label(2_500, "Rauchmelder"),
        ScriptStep::label(12_000, "rauschen"),
    ]
}

/// [`Transport`] that plays a script instead of talking to a radio.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    name: String,
    script: Vec<ScriptStep>,
}

impl SimulatedTransport {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            name: "Alerto-Sim".into(),
            script,
        }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new(default_script())
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    type Peripheral = ();

    async fn is_radio_ready(&self) -> bool {
        true
    }

    async fn scan(
        &self,
        _service: Uuid,
    ) -> Result<BoxStream<'static, PeripheralHandle<()>>, TransportError> {
        let handle = PeripheralHandle::new("00:00:00:00:00:00", Some(self.name.clone()), ());
        let found = stream::once(async move {
            tokio::time::sleep(DISCOVERY_DELAY).await;
            handle
        });
        // Keep the scan open after the hit, like a real radio.
        Ok(found.chain(stream::pending::<PeripheralHandle<()>>()).boxed())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn connect(&self, _peripheral: &PeripheralHandle<()>) -> Result<(), TransportError> {
        tokio::time::sleep(CONNECT_DELAY).await;
        Ok(())
    }

    async fn discover_service(
        &self,
        _peripheral: &PeripheralHandle<()>,
        _service: Uuid,
    ) -> Result<bool, TransportError> {
        Ok(true)
    }

    async fn discover_characteristic(
        &self,
        _peripheral: &PeripheralHandle<()>,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<bool, TransportError> {
        Ok(true)
    }

    async fn subscribe(
        &self,
        _peripheral: &PeripheralHandle<()>,
        _characteristic: Uuid,
    ) -> Result<BoxStream<'static, Vec<u8>>, TransportError> {
        if self.script.is_empty() {
            return Ok(stream::pending::<Vec<u8>>().boxed());
        }
        let script = self.script.clone();
        let payloads = stream::unfold(0usize, move |i| {
            let step = script[i % script.len()].clone();
            async move {
                tokio::time::sleep(step.delay).await;
                Some((step.payload, i + 1))
            }
        });
        Ok(payloads.boxed())
    }

    async fn disconnect(&self, _peripheral: &PeripheralHandle<()>) -> Result<(), TransportError> {
        debug!("simulated sensor disconnected");
        Ok(())
    }

    async fn link_events(&self) -> Result<BoxStream<'static, LinkEvent>, TransportError> {
        Ok(stream::pending::<LinkEvent>().boxed())
    }
}
