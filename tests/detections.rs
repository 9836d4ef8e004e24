//! Labels in, alerts and history out: the debounce policy end to end.

mod common;

use std::time::Duration;

use tokio::time::sleep;

use alerto::protocol::{IDLE_LABEL, NOT_LISTENING_LABEL};
use alerto::session::SessionConfig;
use alerto::types::{SessionEvent, SessionState};

use common::{settle, Alert, Harness};

fn confirmed(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Confirmed(d) => Some(d.label.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn detection_is_shown_alerted_then_confirmed() {
    let mut h = Harness::subscribed().await;
    h.drain();

    assert!(h.radio.notify_label("Klingel"));
    settle().await;

    assert_eq!(h.session.display().label, "Klingel");
    assert_eq!(
        h.sink.alerts(),
        vec![Alert::Vibrate, Alert::Notify("Klingel".into())]
    );
    assert_eq!(h.drain(), vec![SessionEvent::Detected("Klingel".into())]);
    assert!(h.session.history().is_empty());

    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.history_labels(), vec!["Klingel"]);
    assert_eq!(h.session.display().label, IDLE_LABEL);

    let events = h.drain();
    let Some(SessionEvent::Confirmed(event)) = events.first() else {
        panic!("expected a confirmation, got {events:?}");
    };
    assert!(event.confirmed_at >= event.detected_at);
    let entry = &h.session.history().entries()[0];
    assert_eq!(entry.timestamp, event.confirmed_at);
}

#[tokio::test(start_paused = true)]
async fn knock_burst_is_recorded_once() {
    let h = Harness::subscribed().await;

    h.radio.notify_label("Klopfen");
    sleep(Duration::from_secs(5)).await;
    h.radio.notify_label("Klopfen");
    settle().await;

    // The window restarts at the second knock.
    sleep(Duration::from_secs(9)).await;
    assert!(h.session.history().is_empty());

    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.history_labels(), vec!["Klopfen"]);
    assert_eq!(h.sink.notifications(), vec!["Klopfen", "Klopfen"]);
    assert_eq!(h.sink.vibrations(), 2);
    assert_eq!(h.session.display().label, IDLE_LABEL);
}

#[tokio::test(start_paused = true)]
async fn newer_label_replaces_pending_one() {
    let h = Harness::subscribed().await;

    h.radio.notify_label("Klopfen");
    sleep(Duration::from_secs(3)).await;
    h.radio.notify_label("Klingel");
    settle().await;
    assert_eq!(h.session.display().label, "Klingel");

    sleep(Duration::from_secs(15)).await;
    assert_eq!(h.history_labels(), vec!["Klingel"]);
    assert_eq!(h.sink.notifications(), vec!["Klopfen", "Klingel"]);
}

#[tokio::test(start_paused = true)]
async fn noise_is_never_alerted_or_recorded() {
    let mut h = Harness::subscribed().await;
    h.drain();

    for payload in ["rauschen", "Rauschen", "RAUSCHEN", "rauschen\n"] {
        h.radio.notify_label(payload);
        sleep(Duration::from_secs(2)).await;
    }
    sleep(Duration::from_secs(30)).await;

    assert_eq!(h.session.display().label, IDLE_LABEL);
    assert!(h.sink.alerts().is_empty());
    assert!(h.session.history().is_empty());
    assert!(h.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn noise_cancels_pending_detection() {
    let h = Harness::subscribed().await;

    h.radio.notify_label("Hundebellen");
    sleep(Duration::from_secs(4)).await;
    h.radio.notify_label("rauschen");
    settle().await;
    assert_eq!(h.session.display().label, IDLE_LABEL);

    sleep(Duration::from_secs(20)).await;
    assert!(h.session.history().is_empty());
    assert_eq!(h.sink.notifications(), vec!["Hundebellen"]);
}

#[tokio::test(start_paused = true)]
async fn separate_bursts_are_recorded_separately() {
    let h = Harness::subscribed().await;

    h.radio.notify_label("Klopfen");
    sleep(Duration::from_secs(12)).await;
    h.radio.notify_label("Rauchmelder");
    sleep(Duration::from_secs(12)).await;

    assert_eq!(h.history_labels(), vec!["Klopfen", "Rauchmelder"]);
    let newest: Vec<_> = h
        .session
        .history()
        .newest_first()
        .into_iter()
        .map(|e| e.label)
        .collect();
    assert_eq!(newest, vec!["Rauchmelder", "Klopfen"]);
}

#[tokio::test(start_paused = true)]
async fn stop_discards_pending_detection() {
    let mut h = Harness::subscribed().await;

    h.radio.notify_label("Klopfen");
    settle().await;
    h.session.stop().await.unwrap();
    assert_eq!(h.session.display().label, NOT_LISTENING_LABEL);

    sleep(Duration::from_secs(30)).await;
    assert!(h.session.history().is_empty());
    assert!(confirmed(&h.drain()).is_empty());
    assert_eq!(h.session.display().label, NOT_LISTENING_LABEL);

    // Notifications no longer reach the session.
    assert!(!h.radio.notify_label("Klopfen"));
    assert_eq!(h.sink.notifications(), vec!["Klopfen"]);
}

#[tokio::test(start_paused = true)]
async fn link_loss_keeps_pending_detection() {
    let mut h = Harness::subscribed().await;

    h.radio.notify_label("Klopfen");
    settle().await;
    h.radio.drop_link();
    settle().await;

    let d = h.session.display();
    assert_eq!(d.session, SessionState::Idle);
    assert!(!d.service_running);
    assert_eq!(d.label, "Klopfen");

    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.history_labels(), vec!["Klopfen"]);
    assert_eq!(confirmed(&h.drain()), vec!["Klopfen"]);
    assert_eq!(h.session.display().label, NOT_LISTENING_LABEL);
}

#[tokio::test(start_paused = true)]
async fn malformed_payloads_are_counted_and_dropped() {
    let h = Harness::subscribed().await;

    h.radio.notify(&[0xff, 0xfe]);
    h.radio.notify(&[]);
    h.radio.notify(&[0, 0]);
    h.radio.notify(b"   ");
    settle().await;

    let d = h.session.display();
    assert_eq!(d.dropped_payloads, 4);
    assert_eq!(d.session, SessionState::Subscribed);
    assert_eq!(d.label, IDLE_LABEL);
    assert!(h.sink.alerts().is_empty());

    // A good label afterwards is handled normally.
    h.radio.notify_label("Klingel\0");
    settle().await;
    assert_eq!(h.sink.notifications(), vec!["Klingel"]);
}

#[tokio::test(start_paused = true)]
async fn custom_window_and_noise_label() {
    let h = Harness::subscribed_with(SessionConfig {
        debounce_window: Duration::from_secs(2),
        noise_label: "static".into(),
        ..SessionConfig::default()
    })
    .await;

    h.radio.notify_label("STATIC");
    h.radio.notify_label("rauschen");
    settle().await;
    sleep(Duration::from_secs(3)).await;

    assert_eq!(h.sink.notifications(), vec!["rauschen"]);
    assert_eq!(h.history_labels(), vec!["rauschen"]);
}

#[tokio::test(start_paused = true)]
async fn history_capacity_keeps_newest_entries() {
    let h = Harness::subscribed_with(SessionConfig {
        debounce_window: Duration::from_secs(1),
        history_capacity: Some(2),
        ..SessionConfig::default()
    })
    .await;

    for label in ["Klopfen", "Klingel", "Hundebellen"] {
        h.radio.notify_label(label);
        sleep(Duration::from_secs(2)).await;
    }

    assert_eq!(h.history_labels(), vec!["Klingel", "Hundebellen"]);
}

#[tokio::test(start_paused = true)]
async fn pending_detection_confirms_while_radio_check_is_slow() {
    let h = Harness::subscribed().await;

    h.radio.notify_label("Klopfen");
    settle().await;
    h.radio.drop_link();
    settle().await;
    assert_eq!(h.session.state(), SessionState::Idle);

    h.radio.set_radio_delay(Duration::from_secs(20));
    let session = h.session.clone();
    let restart = tokio::spawn(async move { session.start().await });
    settle().await;

    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.history_labels(), vec!["Klopfen"]);

    assert_eq!(restart.await.unwrap(), Ok(()));
    settle().await;
    assert_eq!(h.session.state(), SessionState::Scanning);
    assert_eq!(h.session.display().label, IDLE_LABEL);
}
