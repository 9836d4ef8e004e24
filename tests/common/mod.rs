//! Scripted transport and recording sink shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use uuid::Uuid;

use alerto::alert::AlertSink;
use alerto::error::TransportError;
use alerto::session::{SessionConfig, SessionHandle};
use alerto::transport::{LinkEvent, PeripheralHandle, Transport};
use alerto::types::{SessionEvent, SessionState};

// ── FakeTransport ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Scan,
    StopScan,
    Connect(String),
    DiscoverService,
    DiscoverCharacteristic,
    Subscribe,
    Disconnect(String),
}

struct Shared {
    radio_ready: bool,
    radio_delay: Option<Duration>,
    fail_connect: bool,
    connect_delay: Option<Duration>,
    disconnect_delay: Option<Duration>,
    service_present: bool,
    characteristic_present: bool,
    scan_tx: Option<UnboundedSender<PeripheralHandle<()>>>,
    payload_tx: Option<UnboundedSender<Vec<u8>>>,
    link_tx: Option<UnboundedSender<LinkEvent>>,
    calls: Vec<Call>,
}

/// The transport side, handed to the session.
pub struct FakeTransport {
    shared: Arc<Mutex<Shared>>,
}

/// The test side: plays the sensor and the radio.
#[derive(Clone)]
pub struct FakeRadio {
    shared: Arc<Mutex<Shared>>,
}

/// A powered radio next to a sensor that exposes the expected GATT layout.
pub fn fake() -> (FakeTransport, FakeRadio) {
    let shared = Arc::new(Mutex::new(Shared {
        radio_ready: true,
        radio_delay: None,
        fail_connect: false,
        connect_delay: None,
        disconnect_delay: None,
        service_present: true,
        characteristic_present: true,
        scan_tx: None,
        payload_tx: None,
        link_tx: None,
        calls: Vec::new(),
    }));
    (
        FakeTransport {
            shared: Arc::clone(&shared),
        },
        FakeRadio { shared },
    )
}

impl FakeTransport {
    fn record(&self, call: Call) {
        self.shared.lock().unwrap().calls.push(call);
    }
}

impl FakeRadio {
    pub fn set_radio_ready(&self, ready: bool) {
        self.shared.lock().unwrap().radio_ready = ready;
    }

    /// Make `is_radio_ready` take this long, like an adapter still powering up.
    pub fn set_radio_delay(&self, delay: Duration) {
        self.shared.lock().unwrap().radio_delay = Some(delay);
    }

    pub fn set_disconnect_delay(&self, delay: Duration) {
        self.shared.lock().unwrap().disconnect_delay = Some(delay);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.shared.lock().unwrap().fail_connect = fail;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.shared.lock().unwrap().connect_delay = Some(delay);
    }

    pub fn set_service_present(&self, present: bool) {
        self.shared.lock().unwrap().service_present = present;
    }

    pub fn set_characteristic_present(&self, present: bool) {
        self.shared.lock().unwrap().characteristic_present = present;
    }

    /// Make a sensor with this id show up in the running scan.
    /// Returns `false` if nobody is scanning.
    pub fn advertise(&self, id: &str) -> bool {
        let handle = PeripheralHandle::new(id, Some(format!("Sensor-{id}")), ());
        match &self.shared.lock().unwrap().scan_tx {
            Some(tx) => tx.unbounded_send(handle).is_ok(),
            None => false,
        }
    }

    /// Send one raw notification.  Returns `false` if nobody is subscribed.
    pub fn notify(&self, payload: &[u8]) -> bool {
        match &self.shared.lock().unwrap().payload_tx {
            Some(tx) => tx.unbounded_send(payload.to_vec()).is_ok(),
            None => false,
        }
    }

    pub fn notify_label(&self, label: &str) -> bool {
        self.notify(label.as_bytes())
    }

    /// End the notification stream, as a dropped BLE link does.
    pub fn drop_link(&self) {
        self.shared.lock().unwrap().payload_tx = None;
    }

    pub fn link_event(&self, event: LinkEvent) {
        if let Some(tx) = &self.shared.lock().unwrap().link_tx {
            let _ = tx.unbounded_send(event);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    type Peripheral = ();

    async fn is_radio_ready(&self) -> bool {
        let delay = self.shared.lock().unwrap().radio_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.shared.lock().unwrap().radio_ready
    }

    async fn scan(
        &self,
        _service: Uuid,
    ) -> Result<BoxStream<'static, PeripheralHandle<()>>, TransportError> {
        self.record(Call::Scan);
        let (tx, rx) = unbounded();
        self.shared.lock().unwrap().scan_tx = Some(tx);
        Ok(rx.boxed())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.record(Call::StopScan);
        self.shared.lock().unwrap().scan_tx = None;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralHandle<()>) -> Result<(), TransportError> {
        self.record(Call::Connect(peripheral.id.clone()));
        let (delay, fail) = {
            let s = self.shared.lock().unwrap();
            (s.connect_delay, s.fail_connect)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(TransportError::Other("connection refused".into()));
        }
        Ok(())
    }

    async fn discover_service(
        &self,
        _peripheral: &PeripheralHandle<()>,
        _service: Uuid,
    ) -> Result<bool, TransportError> {
        self.record(Call::DiscoverService);
        Ok(self.shared.lock().unwrap().service_present)
    }

    async fn discover_characteristic(
        &self,
        _peripheral: &PeripheralHandle<()>,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<bool, TransportError> {
        self.record(Call::DiscoverCharacteristic);
        Ok(self.shared.lock().unwrap().characteristic_present)
    }

    async fn subscribe(
        &self,
        _peripheral: &PeripheralHandle<()>,
        _characteristic: Uuid,
    ) -> Result<BoxStream<'static, Vec<u8>>, TransportError> {
        self.record(Call::Subscribe);
        let (tx, rx) = unbounded();
        self.shared.lock().unwrap().payload_tx = Some(tx);
        Ok(rx.boxed())
    }

    async fn disconnect(&self, peripheral: &PeripheralHandle<()>) -> Result<(), TransportError> {
        self.record(Call::Disconnect(peripheral.id.clone()));
        let delay = self.shared.lock().unwrap().disconnect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.shared.lock().unwrap().payload_tx = None;
        Ok(())
    }

    async fn link_events(&self) -> Result<BoxStream<'static, LinkEvent>, TransportError> {
        let (tx, rx) = unbounded();
        self.shared.lock().unwrap().link_tx = Some(tx);
        Ok(rx.boxed())
    }
}

// ── RecordingSink ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    Vibrate,
    Notify(String),
}

#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.alerts()
            .into_iter()
            .filter_map(|a| match a {
                Alert::Notify(label) => Some(label),
                Alert::Vibrate => None,
            })
            .collect()
    }

    pub fn vibrations(&self) -> usize {
        self.alerts().iter().filter(|a| **a == Alert::Vibrate).count()
    }
}

impl AlertSink for RecordingSink {
    fn vibrate(&self) {
        self.alerts.lock().unwrap().push(Alert::Vibrate);
    }

    fn notify(&self, label: &str) {
        self.alerts.lock().unwrap().push(Alert::Notify(label.to_owned()));
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct Harness {
    pub session: SessionHandle,
    pub radio: FakeRadio,
    pub sink: Arc<RecordingSink>,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let (transport, radio) = fake();
        let sink = Arc::new(RecordingSink::default());
        let session = SessionHandle::spawn(transport, config, sink.clone());
        let events = session.subscribe();
        Self {
            session,
            radio,
            sink,
            events,
        }
    }

    /// Start, let the sensor be found, and wait until notifications flow.
    pub async fn subscribed() -> Self {
        Self::subscribed_with(SessionConfig::default()).await
    }

    pub async fn subscribed_with(config: SessionConfig) -> Self {
        let h = Self::with_config(config);
        h.session.start().await.expect("radio is ready");
        settle().await;
        assert!(h.radio.advertise("AA:BB:CC:DD:EE:FF"));
        settle().await;
        assert_eq!(h.session.state(), SessionState::Subscribed);
        h
    }

    /// Every event broadcast since the last drain.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn history_labels(&self) -> Vec<String> {
        self.session
            .history()
            .entries()
            .into_iter()
            .map(|e| e.label)
            .collect()
    }
}

/// Let every spawned task run until idle.
///
/// Tests run with a paused clock, which only auto-advances once no task can
/// make progress, so a 1 ms sleep returns after the session has caught up.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
