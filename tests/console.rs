//! Console coordination of live tracking and replay.


use std::sync::Arc;
use std::time::Duration;

use fleetops::movement::{TrackOptions, TrackedSubject};
use fleetops::realtime::Error;
use fleetops::replay::{Phase, PlaybackEvent, ReplaySession};
use fleetops::{Config, Console, LocalSocket};
use pretty_assertions::assert_eq;
use tokio::time;

use self::provider::{RecordingMarker, point, record, update};

struct Harness {
    socket: Arc<LocalSocket>,
    console: Console<LocalSocket>,
    marker: Arc<RecordingMarker>,
    driver: TrackedSubject,
}

impl Harness {
    fn new() -> Self {
        let socket = Arc::new(LocalSocket::default());
        let console = Console::new(Arc::clone(&socket), Config::default());
        let marker = RecordingMarker::at(point(0));
        console.add_marker("driver_1", marker.clone());
        Self { socket, console, marker, driver: TrackedSubject::new("driver", "driver_1") }
    }

    fn session(&self, count: u32) -> ReplaySession {
        let records: Vec<_> = (0..count).map(|n| record("driver_1", n)).collect();
        ReplaySession::new(self.driver.clone(), &records)
    }
}

#[tokio::test(start_paused = true)]
async fn live_updates_move_marker_and_subject() {
    let harness = Harness::new();
    let mut steps = harness.console.subscribe();

    harness.console.track(&harness.driver, TrackOptions::default()).await.expect("should track");
    assert!(harness.console.is_live("driver_1"));

    harness.socket.publish("driver.driver_1", update("driver", "driver_1", point(2), 2));
    harness.socket.publish("driver.driver_1", update("driver", "driver_1", point(1), 1));
    time::sleep(Duration::from_secs(4)).await;

    assert_eq!(harness.marker.positions(), vec![point(1), point(2)]);
    assert_eq!(steps.recv().await.expect("step").event.location, point(1));

    let subject = harness.console.subject("driver_1").expect("known subject");
    assert_eq!(subject.location, Some(point(2)));
    assert_eq!(subject.heading, Some(90.0));
    assert!(subject.online);
}

#[tokio::test(start_paused = true)]
async fn replay_suspends_live_tracking() {
    let harness = Harness::new();
    harness.console.track(&harness.driver, TrackOptions::default()).await.expect("should track");
    assert_eq!(harness.socket.subscribers("driver.driver_1"), 1);

    let controller =
        harness.console.replay(harness.session(3), Some(2.0)).await.expect("should load");

    assert!(!harness.console.is_live("driver_1"));
    assert_eq!(harness.socket.subscribers("driver.driver_1"), 0);
    assert_eq!(controller.status().total_positions, 3);
    assert!(harness.console.subject("driver_1").is_some());

    // live updates no longer reach the marker
    harness.socket.publish("driver.driver_1", update("driver", "driver_1", point(9), 9));
    let mut events = controller.subscribe();
    controller.play();
    while events.recv().await.expect("event") != PlaybackEvent::Complete {}
    time::sleep(Duration::from_secs(4)).await;

    assert_eq!(harness.marker.positions(), vec![point(0), point(1), point(2)]);
}

#[tokio::test(start_paused = true)]
async fn tracking_ends_replay() {
    let harness = Harness::new();
    let controller = harness.console.replay(harness.session(3), None).await.expect("should load");
    controller.step_forward(2);

    harness.console.track(&harness.driver, TrackOptions::default()).await.expect("should track");

    assert!(harness.console.playback("driver_1").is_none());
    assert_eq!(controller.phase(), Phase::Idle);
    assert_eq!(controller.current_index(), 0);
}

#[tokio::test]
async fn replay_needs_a_marker_and_positions() {
    let harness = Harness::new();

    let vehicle = TrackedSubject::new("vehicle", "v1");
    let session = ReplaySession::new(vehicle, &[record("v1", 0)]);
    let Err(err) = harness.console.replay(session, None).await else {
        panic!("expected an error");
    };
    assert!(matches!(err, Error::MarkerUnavailable(_)));

    let Err(err) = harness.console.replay(harness.session(0), None).await else {
        panic!("expected an error");
    };
    assert!(matches!(err, Error::MissingInput(_)));
}

#[tokio::test]
async fn watch_tracks_each_subject_once() {
    let harness = Harness::new();
    let subjects = vec![
        harness.driver.clone(),
        TrackedSubject::new("vehicle", "v1"),
        harness.driver.clone(),
    ];

    let buffers = harness.console.watch(&subjects).await;

    assert_eq!(buffers.len(), 3);
    assert_eq!(harness.socket.subscribers("driver.driver_1"), 1);
    assert_eq!(harness.socket.subscribers("vehicle.v1"), 1);
    assert_eq!(harness.console.tracker().registry().len(), 2);
}

#[tokio::test]
async fn shutdown_releases_everything() {
    let harness = Harness::new();
    harness.console.track(&harness.driver, TrackOptions::default()).await.expect("should track");
    let vehicle = TrackedSubject::new("vehicle", "v1");
    harness.console.track(&vehicle, TrackOptions::channel("fleet.v1")).await.expect("should track");

    harness.console.shutdown().await;
    harness.console.shutdown().await;

    assert!(harness.console.tracker().channels().is_empty());
    assert!(harness.console.tracker().registry().is_empty());
    assert_eq!(harness.socket.subscribers("driver.driver_1"), 0);
    assert_eq!(harness.socket.subscribers("fleet.v1"), 0);
}

#[tokio::test]
async fn retracking_on_another_channel_leaves_the_old_one() {
    let harness = Harness::new();
    harness.console.track(&harness.driver, TrackOptions::default()).await.expect("should track");
    harness
        .console
        .track(&harness.driver, TrackOptions::channel("fleet.driver_1"))
        .await
        .expect("should track");

    assert_eq!(harness.socket.subscribers("driver.driver_1"), 0);
    assert_eq!(harness.socket.subscribers("fleet.driver_1"), 1);
    assert_eq!(harness.console.tracker().channels(), vec!["fleet.driver_1".to_string()]);

    harness.console.untrack("driver_1").await;

    assert_eq!(harness.socket.subscribers("fleet.driver_1"), 0);
    assert!(harness.console.tracker().channels().is_empty());
    assert!(!harness.console.is_live("driver_1"));
}

#[tokio::test]
async fn untracked_subjects_are_detached() {
    let harness = Harness::new();
    let vehicle = TrackedSubject::new("vehicle", "v1");
    harness.console.watch(&[harness.driver.clone(), vehicle]).await;
    assert!(harness.console.subject("driver_1").is_some());

    harness.console.untrack("driver_1").await;
    assert!(harness.console.subject("driver_1").is_none());
    assert_eq!(harness.console.subjects().len(), 1);

    harness.console.shutdown().await;
    assert!(harness.console.subjects().is_empty());
}
