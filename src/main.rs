use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::{error, info, warn};
use tokio::sync::broadcast::error::RecvError;

use alerto::alert::{AlertSink, LogAlertSink};
use alerto::ble_transport::BleTransport;
use alerto::protocol::NOISE_LABEL;
use alerto::session::{SessionConfig, SessionHandle};
use alerto::simulate::SimulatedTransport;
use alerto::transport::Transport;
use alerto::types::SessionEvent;

/// Listen to a BLE sound sensor and alert on detected sounds.
#[derive(Parser, Debug)]
#[command(name = "alerto", version)]
struct Args {
    /// Use the built-in sensor simulator instead of Bluetooth.
    #[arg(long)]
    simulate: bool,

    /// Quiet seconds after a detection before it is recorded in the history.
    #[arg(long, env = "ALERTO_DEBOUNCE_SECS", default_value_t = 10)]
    debounce_secs: u64,

    /// Label the sensor sends for background noise (case-insensitive).
    #[arg(long, env = "ALERTO_NOISE_LABEL", default_value = NOISE_LABEL)]
    noise_label: String,

    /// Stop scanning after this many seconds without finding the sensor.
    #[arg(long, env = "ALERTO_SCAN_TIMEOUT_SECS")]
    scan_timeout_secs: Option<u64>,

    /// Keep only the newest N history entries.
    #[arg(long, env = "ALERTO_HISTORY_CAPACITY")]
    history_capacity: Option<usize>,

    /// Ring the terminal bell on every detection.
    #[arg(long)]
    bell: bool,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            debounce_window: Duration::from_secs(self.debounce_secs),
            noise_label: self.noise_label.clone(),
            scan_timeout: self.scan_timeout_secs.map(Duration::from_secs),
            history_capacity: self.history_capacity,
            ..SessionConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=alerto=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.session_config();
    let sink: Arc<dyn AlertSink> = Arc::new(LogAlertSink::new().with_bell(args.bell));

    if args.simulate {
        info!("Using the built-in sensor simulator.");
        run(SimulatedTransport::default(), config, sink).await
    } else {
        let transport = BleTransport::new().await?;
        run(transport, config, sink).await
    }
}

async fn run<T: Transport>(
    transport: T,
    config: SessionConfig,
    sink: Arc<dyn AlertSink>,
) -> Result<()> {
    let session = SessionHandle::spawn(transport, config, sink);
    let mut events = session.subscribe();

    // ── Start listening ───────────────────────────────────────────────────────
    if let Err(e) = session.start().await {
        error!("Could not start: {e}. Type 's' + Enter to retry.");
    }
    info!("Commands (type + Enter):");
    info!("  s  – start listening");
    info!("  x  – stop listening");
    info!("  h  – show history (newest first)");
    info!("  j  – dump history as JSON");
    info!("  q  – quit\n");

    // ── Stdin command reader ──────────────────────────────────────────────────
    // Lines are read on a dedicated OS thread (StdinLock is not Send across
    // await points) and relayed to the async loop below.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if line_tx.send(l.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    // ── Main event loop ───────────────────────────────────────────────────────
    loop {
        tokio::select! {
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                match line.as_str() {
                    "" => {}
                    "q" => {
                        info!("Quit requested.");
                        break;
                    }
                    "s" => {
                        if let Err(e) = session.start().await {
                            error!("Start error: {e}");
                        }
                    }
                    "x" => session.stop().await?,
                    "h" => print_history(&session),
                    "j" => println!("{}", serde_json::to_string_pretty(&session.history().entries())?),
                    other => warn!("Unknown command '{other}'"),
                }
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StateChanged(state)) => {
                    let d = session.display();
                    info!("[STATE] {state}  running={}  label={:?}", d.service_running, d.label);
                }
                Ok(SessionEvent::Detected(label)) => println!("[DETECTED]  {label}"),
                Ok(SessionEvent::Confirmed(d)) => println!(
                    "[CONFIRMED] {}  heard {}  confirmed {}",
                    d.label,
                    d.detected_at.format("%H:%M:%S"),
                    d.confirmed_at.format("%H:%M:%S"),
                ),
                Ok(SessionEvent::Error(e)) => error!("[ERROR] {e}"),
                Err(RecvError::Lagged(n)) => warn!("Event stream lagged; {n} events skipped"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received.");
                break;
            }
        }
    }

    session.stop().await?;
    let dropped = session.display().dropped_payloads;
    if dropped > 0 {
        info!("{dropped} malformed notification(s) were dropped.");
    }
    info!("Event loop finished – exiting.");
    Ok(())
}

fn print_history(session: &SessionHandle) {
    let entries = session.history().newest_first();
    if entries.is_empty() {
        println!("[HISTORY] (empty)");
        return;
    }
    println!("[HISTORY] {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    for e in entries {
        println!(
            "  {}  {}",
            e.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            e.label
        );
    }
}
