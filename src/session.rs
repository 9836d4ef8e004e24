//! The session state machine: one sensor, one connection, one event loop.
//!
//! [`SessionHandle::spawn`] starts an actor task that owns everything
//! mutable: the [`SessionState`], the connected peripheral, the
//! [`Debouncer`] and the [`HistoryStore`].  Three things feed that task, and
//! it handles them one at a time:
//!
//! * commands from handles (`start`, `stop`);
//! * callbacks from transport I/O tasks (scan hit, connect and discovery
//!   results, notification payloads, link loss);
//! * the debounce reset deadline.
//!
//! Transport I/O never runs on the actor task.  Every I/O task is tagged
//! with the attempt number current when it was spawned; `stop()` and every
//! fall-back bump that number and abort the task, so a callback arriving
//! after the session went idle is dropped instead of reviving it.
//!
//! ```text
//!   Idle ──start()──► Scanning ──found──► Connecting ──subscribed──► Subscribed ─┐
//!    ▲                   │                    │                        ▲   payload│
//!    │                   │                    │ (discovery empty:      └──────────┘
//!    │                   │                    │  stays, reports error)
//!    └───── stop() / failure / link lost / radio off ◄─────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::alert::AlertSink;
use crate::debounce::{Debouncer, LabelOutcome};
use crate::error::{DiscoveryStep, SessionError, TransportError};
use crate::history::{HistoryStore, HistoryView};
use crate::protocol::{
    decode_label, DEBOUNCE_WINDOW, IDLE_LABEL, NOISE_LABEL, NOT_LISTENING_LABEL,
    SOUND_CHARACTERISTIC_UUID, SOUND_SERVICE_UUID,
};
use crate::transport::{LinkEvent, PeripheralHandle, Transport};
use crate::types::{DisplayState, SessionEvent, SessionState};

/// Upper bound on a best-effort disconnect during teardown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the [`SessionEvent`] broadcast channel.
const EVENT_CAPACITY: usize = 64;

// ── SessionConfig ─────────────────────────────────────────────────────────────

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Service the sensor advertises.  Default: [`SOUND_SERVICE_UUID`].
    pub service_uuid: Uuid,
    /// Notify characteristic carrying labels.
    /// Default: [`SOUND_CHARACTERISTIC_UUID`].
    pub characteristic_uuid: Uuid,
    /// Quiet period before a detection is confirmed.  Default: 10 s.
    pub debounce_window: Duration,
    /// Label treated as background noise (case-insensitive).
    /// Default: `"rauschen"`.
    pub noise_label: String,
    /// Display text while listening with nothing detected.
    pub idle_label: String,
    /// Display text while stopped.
    pub not_listening_label: String,
    /// Give up scanning after this long.  `None` scans until `stop()`.
    /// Default: `None`.
    pub scan_timeout: Option<Duration>,
    /// Keep at most this many history entries.  `None` keeps all.
    /// Default: `None`.
    pub history_capacity: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_uuid: SOUND_SERVICE_UUID,
            characteristic_uuid: SOUND_CHARACTERISTIC_UUID,
            debounce_window: DEBOUNCE_WINDOW,
            noise_label: NOISE_LABEL.into(),
            idle_label: IDLE_LABEL.into(),
            not_listening_label: NOT_LISTENING_LABEL.into(),
            scan_timeout: None,
            history_capacity: None,
        }
    }
}

// ── Messages into the actor ───────────────────────────────────────────────────

enum Command {
    Start(oneshot::Sender<Result<(), SessionError>>),
    Stop(oneshot::Sender<()>),
}

enum Callback<P> {
    RadioChecked {
        attempt: u64,
        ready: bool,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Discovered { attempt: u64, peripheral: PeripheralHandle<P> },
    ScanEnded { attempt: u64, error: SessionError },
    Connected { attempt: u64 },
    Stalled { attempt: u64, step: DiscoveryStep },
    Subscribed { attempt: u64 },
    Failed { attempt: u64, error: TransportError },
    Payload { attempt: u64, bytes: Vec<u8> },
    StreamEnded { attempt: u64 },
    Link(LinkEvent),
}

impl<P> Callback<P> {
    fn attempt(&self) -> Option<u64> {
        match self {
            Callback::RadioChecked { attempt, .. }
            | Callback::Discovered { attempt, .. }
            | Callback::ScanEnded { attempt, .. }
            | Callback::Connected { attempt }
            | Callback::Stalled { attempt, .. }
            | Callback::Subscribed { attempt }
            | Callback::Failed { attempt, .. }
            | Callback::Payload { attempt, .. }
            | Callback::StreamEnded { attempt } => Some(*attempt),
            Callback::Link(_) => None,
        }
    }
}

// ── SessionHandle ─────────────────────────────────────────────────────────────

/// Handle to a running session.
///
/// Cheap to clone.  The session task exits (stopping and disconnecting
/// first) once every handle has been dropped.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    display: watch::Receiver<DisplayState>,
    history: HistoryView,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Spawn the session task on the current tokio runtime.
    ///
    /// The session starts `Idle`; call [`SessionHandle::start`] to scan.
    pub fn spawn<T: Transport>(
        transport: T,
        config: SessionConfig,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (cb_tx, cb_rx) = mpsc::unbounded_channel();
        let (display_tx, display_rx) = watch::channel(DisplayState {
            session: SessionState::Idle,
            label: config.not_listening_label.clone(),
            service_running: false,
            peripheral: None,
            dropped_payloads: 0,
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let history = HistoryStore::new(config.history_capacity);
        let view = history.view();

        let actor = SessionActor {
            transport: Arc::new(transport),
            debouncer: Debouncer::new(config.debounce_window, config.noise_label.clone()),
            config,
            sink,
            history,
            display: display_tx,
            events: events.clone(),
            cb_tx,
            state: SessionState::Idle,
            attempt: 0,
            radio_check: false,
            peripheral: None,
            io_task: None,
            notif_count: 0,
        };
        tokio::spawn(actor.run(cmd_rx, cb_rx));

        Self {
            cmd_tx,
            display: display_rx,
            history: view,
            events,
        }
    }

    /// Start scanning for the sensor.
    ///
    /// Returns once scanning has begun; discovery, connection and
    /// subscription continue in the background and show up as
    /// [`SessionEvent::StateChanged`].  A no-op if the session is not idle.
    /// A `stop()` issued while the radio is still being checked wins: this
    /// call then returns `Ok` without scanning.
    ///
    /// # Errors
    /// [`SessionError::RadioUnavailable`] if Bluetooth is off; the session
    /// stays `Idle` and is not retried.
    pub async fn start(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Start(reply))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Cancel scanning/connecting, disconnect, drop any pending detection,
    /// and go `Idle`.  Idempotent.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stop(reply))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)
    }

    /// Latest display snapshot.
    pub fn display(&self) -> DisplayState {
        self.display.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.display.borrow().session
    }

    /// Receiver notified whenever the display snapshot changes.
    pub fn watch_display(&self) -> watch::Receiver<DisplayState> {
        self.display.clone()
    }

    /// Read-only view of the detection history.
    pub fn history(&self) -> &HistoryView {
        &self.history
    }

    /// Subscribe to state changes, detections, and errors from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

// ── SessionActor ──────────────────────────────────────────────────────────────

struct SessionActor<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    sink: Arc<dyn AlertSink>,
    debouncer: Debouncer,
    history: HistoryStore,
    display: watch::Sender<DisplayState>,
    events: broadcast::Sender<SessionEvent>,
    cb_tx: mpsc::UnboundedSender<Callback<T::Peripheral>>,
    state: SessionState,
    /// Bumped on every start and teardown; callbacks from older attempts are stale.
    attempt: u64,
    /// A radio readiness check for the current attempt is in flight.
    radio_check: bool,
    /// Held from discovery until teardown.
    peripheral: Option<PeripheralHandle<T::Peripheral>>,
    /// Scan task, or the connect/subscribe/forward task.
    io_task: Option<JoinHandle<()>>,
    notif_count: u64,
}

impl<T: Transport> SessionActor<T> {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut cb_rx: mpsc::UnboundedReceiver<Callback<T::Peripheral>>,
    ) {
        let link_watcher = self.spawn_link_watcher();

        loop {
            let deadline = self.debouncer.deadline();
            let reset_timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            // Commands are served before callbacks already queued beside them,
            // so those callbacks see the attempt number the command left behind.
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Start(reply)) => self.start(reply),
                    Some(Command::Stop(reply)) => {
                        self.stop().await;
                        let _ = reply.send(());
                    }
                    None => break,
                },
                Some(cb) = cb_rx.recv() => self.on_callback(cb).await,
                () = reset_timer => self.on_reset_timer(),
            }
        }

        debug!("all session handles dropped, shutting down");
        self.stop().await;
        link_watcher.abort();
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Check the radio off the actor task; `Callback::RadioChecked` carries
    /// `reply` back and either begins scanning or reports the radio missing.
    fn start(&mut self, reply: oneshot::Sender<Result<(), SessionError>>) {
        if self.state != SessionState::Idle || self.radio_check {
            debug!("start(): already {}", self.state);
            let _ = reply.send(Ok(()));
            return;
        }

        self.attempt += 1;
        self.radio_check = true;
        let transport = Arc::clone(&self.transport);
        let tx = self.cb_tx.clone();
        let attempt = self.attempt;
        tokio::spawn(async move {
            let ready = transport.is_radio_ready().await;
            let _ = tx.send(Callback::RadioChecked { attempt, ready, reply });
        });
    }

    fn on_radio_checked(&mut self, ready: bool) -> Result<(), SessionError> {
        self.radio_check = false;
        if !ready {
            warn!("start(): Bluetooth is not powered on or not available");
            return Err(SessionError::RadioUnavailable);
        }
        self.begin_scan();
        Ok(())
    }

    fn begin_scan(&mut self) {
        let idle_label = self.config.idle_label.clone();
        let keep_label = self.debouncer.pending_label().is_some();
        self.display.send_modify(|d| {
            d.service_running = true;
            if !keep_label {
                d.label = idle_label;
            }
        });
        self.transition(SessionState::Scanning);
        info!(
            "Scanning for sensor service {} (attempt {}) …",
            self.config.service_uuid, self.attempt
        );

        let transport = Arc::clone(&self.transport);
        let tx = self.cb_tx.clone();
        let attempt = self.attempt;
        let service = self.config.service_uuid;
        let scan_timeout = self.config.scan_timeout;
        self.io_task = Some(tokio::spawn(async move {
            let scan = async {
                let mut found = transport.scan(service).await?;
                Ok::<_, TransportError>(found.next().await)
            };
            let outcome = match scan_timeout {
                Some(limit) => match tokio::time::timeout(limit, scan).await {
                    Ok(result) => result.map_err(SessionError::from),
                    Err(_) => Err(SessionError::ScanTimedOut),
                },
                None => scan.await.map_err(SessionError::from),
            };
            let cb = match outcome {
                Ok(Some(peripheral)) => Callback::Discovered { attempt, peripheral },
                Ok(None) => Callback::ScanEnded {
                    attempt,
                    error: SessionError::ConnectionFailed(
                        "scan ended without finding the sensor".into(),
                    ),
                },
                Err(error) => Callback::ScanEnded { attempt, error },
            };
            let _ = tx.send(cb);
        }));
    }

    async fn stop(&mut self) {
        let discarded = self.debouncer.cancel();
        let busy = self.state != SessionState::Idle
            || self.radio_check
            || self.peripheral.is_some()
            || self.io_task.is_some();
        if !busy && discarded.is_none() {
            return;
        }
        if let Some(label) = discarded {
            debug!("stop(): discarding pending detection {label:?}");
        }

        self.teardown().await;
        let label = self.config.not_listening_label.clone();
        self.display.send_modify(|d| {
            d.service_running = false;
            d.peripheral = None;
            d.label = label;
        });
        self.transition(SessionState::Idle);
        info!("Session stopped.");
    }

    // ── Transport callbacks ───────────────────────────────────────────────────

    async fn on_callback(&mut self, cb: Callback<T::Peripheral>) {
        if let Some(attempt) = cb.attempt() {
            if attempt != self.attempt {
                debug!("dropping late callback from attempt {attempt} (now {})", self.attempt);
                if let Callback::RadioChecked { reply, .. } = cb {
                    // stop() overtook this start(); it completes without scanning.
                    let _ = reply.send(Ok(()));
                }
                return;
            }
        }

        match cb {
            Callback::RadioChecked { ready, reply, .. } => {
                let result = self.on_radio_checked(ready);
                let _ = reply.send(result);
            }
            Callback::Link(event) => self.on_link_event(event).await,
            Callback::Discovered { peripheral, .. } => self.on_discovered(peripheral).await,
            Callback::ScanEnded { error, .. } => self.fall_back(Some(error)).await,
            Callback::Connected { .. } => {
                if let Some(p) = &self.peripheral {
                    info!("Connected to {}; discovering services …", p.label());
                }
            }
            Callback::Stalled { step, .. } => {
                // Left connected: the user decides whether to stop and retry.
                self.io_task = None;
                warn!("Discovery incomplete: sound {step} not found; waiting for stop()");
                let _ = self
                    .events
                    .send(SessionEvent::Error(SessionError::DiscoveryIncomplete(step)));
            }
            Callback::Subscribed { .. } => {
                if self.state == SessionState::Connecting {
                    info!("Notifications enabled; listening for sounds.");
                    self.notif_count = 0;
                    self.transition(SessionState::Subscribed);
                }
            }
            Callback::Failed { error, .. } => self.fall_back(Some(error.into())).await,
            Callback::Payload { bytes, .. } => self.on_payload(&bytes),
            Callback::StreamEnded { .. } => {
                info!("Notification stream ended – sensor disconnected.");
                self.fall_back(Some(SessionError::ConnectionFailed(
                    "notification stream ended".into(),
                )))
                .await;
            }
        }
    }

    async fn on_discovered(&mut self, peripheral: PeripheralHandle<T::Peripheral>) {
        if self.state != SessionState::Scanning {
            return;
        }
        info!("Found sensor: {}  id={}", peripheral.label(), peripheral.id);

        if let Err(e) = self.transport.stop_scan().await {
            warn!("stop_scan() failed: {e}");
        }
        let name = peripheral.label().to_owned();
        self.display.send_modify(|d| d.peripheral = Some(name));
        self.peripheral = Some(peripheral.clone());
        self.transition(SessionState::Connecting);

        let transport = Arc::clone(&self.transport);
        let tx = self.cb_tx.clone();
        let attempt = self.attempt;
        let service = self.config.service_uuid;
        let characteristic = self.config.characteristic_uuid;
        self.io_task = Some(tokio::spawn(establish(
            transport,
            peripheral,
            service,
            characteristic,
            attempt,
            tx,
        )));
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::RadioPoweredOff => {
                if self.state != SessionState::Idle {
                    warn!("Bluetooth radio powered off.");
                    self.fall_back(Some(SessionError::RadioUnavailable)).await;
                }
            }
            LinkEvent::Disconnected(id) => {
                let ours = self.peripheral.as_ref().is_some_and(|p| p.id == id);
                if ours {
                    info!("Link watcher: sensor {id} disconnected.");
                    self.fall_back(Some(SessionError::ConnectionFailed(
                        "sensor disconnected".into(),
                    )))
                    .await;
                }
            }
        }
    }

    fn on_payload(&mut self, bytes: &[u8]) {
        if self.state != SessionState::Subscribed {
            return;
        }
        self.notif_count += 1;

        let Some(label) = decode_label(bytes) else {
            debug!("Dropping undecodable payload ({} bytes): {bytes:02x?}", bytes.len());
            self.display.send_modify(|d| d.dropped_payloads += 1);
            return;
        };

        if self.notif_count <= 5 || self.notif_count % 500 == 0 {
            info!("notif #{} label={label:?}", self.notif_count);
        } else {
            debug!("notif #{} label={label:?}", self.notif_count);
        }
        self.on_label(label);
    }

    // ── Debounce ──────────────────────────────────────────────────────────────

    fn on_label(&mut self, label: String) {
        match self.debouncer.on_label(&label, Instant::now(), Utc::now()) {
            LabelOutcome::Noise { cancelled } => {
                if cancelled {
                    debug!("noise cancelled the pending detection");
                }
                self.set_label(self.config.idle_label.clone());
            }
            LabelOutcome::Detected { replaced } => {
                let id = self.debouncer.pending_id().unwrap_or_default();
                if replaced {
                    debug!("{label:?} replaced the pending detection (reset #{id})");
                } else {
                    debug!("{label:?} armed reset #{id}");
                }
                self.set_label(label.clone());
                self.sink.vibrate();
                self.sink.notify(&label);
                let _ = self.events.send(SessionEvent::Detected(label));
            }
        }
    }

    fn on_reset_timer(&mut self) {
        let id = self.debouncer.pending_id().unwrap_or_default();
        let Some(event) = self.debouncer.fire(Instant::now(), Utc::now()) else {
            return;
        };
        self.history.append(&event);
        info!(
            "Confirmed {:?} (reset #{id}, history: {} entries)",
            event.label,
            self.history.len()
        );

        let label = if self.display.borrow().service_running {
            self.config.idle_label.clone()
        } else {
            self.config.not_listening_label.clone()
        };
        self.set_label(label);
        let _ = self.events.send(SessionEvent::Confirmed(event));
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Fall back to `Idle` after a failure or link loss.
    ///
    /// Unlike `stop()`, a pending detection survives and is still confirmed
    /// when its window elapses.
    async fn fall_back(&mut self, error: Option<SessionError>) {
        if self.state == SessionState::Idle {
            return;
        }
        if let Some(e) = &error {
            warn!("Session falling back to idle: {e}");
        }

        self.teardown().await;
        let label = self.config.not_listening_label.clone();
        let keep_label = self.debouncer.pending_label().is_some();
        self.display.send_modify(|d| {
            d.service_running = false;
            d.peripheral = None;
            if !keep_label {
                d.label = label;
            }
        });
        self.transition(SessionState::Idle);
        if let Some(e) = error {
            let _ = self.events.send(SessionEvent::Error(e));
        }
    }

    /// Invalidate the current attempt, abort its I/O, stop scanning and
    /// release the peripheral.  The disconnect itself runs on its own task.
    async fn teardown(&mut self) {
        self.attempt += 1;
        self.radio_check = false;
        if let Some(task) = self.io_task.take() {
            task.abort();
        }
        if self.state == SessionState::Scanning {
            if let Err(e) = self.transport.stop_scan().await {
                warn!("stop_scan() failed: {e}");
            }
        }
        if let Some(p) = self.peripheral.take() {
            let transport = Arc::clone(&self.transport);
            tokio::spawn(async move {
                match tokio::time::timeout(DISCONNECT_TIMEOUT, transport.disconnect(&p)).await {
                    Ok(Ok(())) => info!("Disconnected from {}.", p.label()),
                    Ok(Err(e)) => warn!("disconnect() from {} failed: {e}", p.label()),
                    Err(_) => warn!("disconnect() from {} timed out", p.label()),
                }
            });
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!("ignoring illegal transition {} -> {next}", self.state);
            return;
        }
        debug!("session {} -> {next}", self.state);
        self.state = next;
        self.display.send_modify(|d| d.session = next);
        let _ = self.events.send(SessionEvent::StateChanged(next));
    }

    fn set_label(&self, label: String) {
        self.display.send_if_modified(|d| {
            if d.label == label {
                false
            } else {
                d.label = label;
                true
            }
        });
    }

    fn spawn_link_watcher(&self) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let tx = self.cb_tx.clone();
        tokio::spawn(async move {
            match transport.link_events().await {
                Ok(mut events) => {
                    while let Some(event) = events.next().await {
                        if tx.send(Callback::Link(event)).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => warn!("Link watcher: could not subscribe to adapter events: {e}"),
            }
        })
    }
}

/// Connect, discover, subscribe, then forward payloads until the stream ends.
///
/// Runs on its own task; every result goes back to the actor tagged with
/// `attempt`.
async fn establish<T: Transport>(
    transport: Arc<T>,
    peripheral: PeripheralHandle<T::Peripheral>,
    service: Uuid,
    characteristic: Uuid,
    attempt: u64,
    tx: mpsc::UnboundedSender<Callback<T::Peripheral>>,
) {
    let fail = |error| Callback::Failed { attempt, error };

    if let Err(e) = transport.connect(&peripheral).await {
        let _ = tx.send(fail(e));
        return;
    }
    let _ = tx.send(Callback::Connected { attempt });

    match transport.discover_service(&peripheral, service).await {
        Ok(true) => {}
        Ok(false) => {
            let _ = tx.send(Callback::Stalled { attempt, step: DiscoveryStep::Service });
            return;
        }
        Err(e) => {
            let _ = tx.send(fail(e));
            return;
        }
    }

    match transport
        .discover_characteristic(&peripheral, service, characteristic)
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            let _ = tx.send(Callback::Stalled {
                attempt,
                step: DiscoveryStep::Characteristic,
            });
            return;
        }
        Err(e) => {
            let _ = tx.send(fail(e));
            return;
        }
    }

    let mut payloads = match transport.subscribe(&peripheral, characteristic).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = tx.send(fail(e));
            return;
        }
    };
    let _ = tx.send(Callback::Subscribed { attempt });

    while let Some(bytes) = payloads.next().await {
        if tx.send(Callback::Payload { attempt, bytes }).is_err() {
            return;
        }
    }
    let _ = tx.send(Callback::StreamEnded { attempt });
}
