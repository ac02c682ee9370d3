//! Event buffer behaviour: ordering, pacing, and failure tolerance.


use std::sync::Arc;
use std::time::Duration;

use movement::{Config, EventBuffer, LatLng, MarkerTable, Movable};
use pretty_assertions::assert_eq;

use self::provider::{PlainMarker, RecordingMarker, event};

const ORIGIN: LatLng = LatLng::new(0.0, 0.0);

fn buffer_with(subject: &str, marker: Arc<dyn Movable>) -> EventBuffer {
    let markers = MarkerTable::new();
    markers.insert(subject, marker);
    EventBuffer::new("driver.d1", Arc::new(markers), Config::default())
}

// Events arriving T+2, T, T+1 should be applied T, T+1, T+2 with durations
// derived from distance and speed.
#[tokio::test(start_paused = true)]
async fn applies_in_timestamp_order() {
    let marker = RecordingMarker::at(ORIGIN);
    let buffer = buffer_with("d1", marker.clone());

    let p0 = LatLng::new(0.0, 0.000_02);
    let p1 = LatLng::new(0.0, 0.000_04);
    let p2 = LatLng::new(0.0, 0.000_06);

    buffer.add(event("d1", p2, Some(10.0), 2));
    buffer.add(event("d1", p0, Some(10.0), 0));
    buffer.add(event("d1", p1, Some(10.0), 1));

    assert_eq!(buffer.drain().await, 3);
    assert_eq!(buffer.pending(), 0);

    let config = Config::default();
    let expected = vec![
        (p0, config.step_duration(ORIGIN.distance_to(&p0), Some(10.0))),
        (p1, config.step_duration(p0.distance_to(&p1), Some(10.0))),
        (p2, config.step_duration(p1.distance_to(&p2), Some(10.0))),
    ];
    assert_eq!(marker.state().moves, expected);

    // ~2.2m at 10m/s
    for (_, duration) in &expected {
        assert!(*duration > Duration::from_millis(200) && *duration < Duration::from_millis(250));
    }
}

#[tokio::test(start_paused = true)]
async fn durations_are_clamped() {
    let marker = RecordingMarker::at(ORIGIN);
    let buffer = buffer_with("d1", marker.clone());

    // far away and slow: capped
    buffer.add(event("d1", LatLng::new(1.0, 1.0), Some(1.0), 0));
    // barely moving and fast: floored
    buffer.add(event("d1", LatLng::new(1.0, 1.000_001), Some(50.0), 1));
    // no speed: fallback
    buffer.add(event("d1", LatLng::new(1.0, 1.1), None, 2));
    // zero speed: fallback
    buffer.add(event("d1", LatLng::new(1.0, 1.2), Some(0.0), 3));

    assert_eq!(buffer.drain().await, 4);

    let durations: Vec<_> = marker.state().moves.into_iter().map(|(_, d)| d).collect();
    assert_eq!(
        durations,
        vec![
            Duration::from_millis(500),
            Duration::from_millis(100),
            Duration::from_millis(500),
            Duration::from_millis(500),
        ]
    );
}

// Each step suspends for its animation plus the settle time.
#[tokio::test(start_paused = true)]
async fn drain_is_paced() {
    let marker = RecordingMarker::at(ORIGIN);
    let buffer = buffer_with("d1", marker);

    buffer.add(event("d1", LatLng::new(0.0, 0.1), None, 0));
    buffer.add(event("d1", LatLng::new(0.0, 0.2), None, 1));

    let started = tokio::time::Instant::now();
    buffer.drain().await;
    assert_eq!(started.elapsed(), Duration::from_millis(2 * 550));
}

#[tokio::test(start_paused = true)]
async fn heading_is_applied_when_known() {
    let marker = RecordingMarker::at(ORIGIN);
    let buffer = buffer_with("d1", marker.clone());

    let mut turning = event("d1", LatLng::new(0.0, 0.1), None, 0);
    turning.heading = Some(90.0);
    let mut unknown = event("d1", LatLng::new(0.0, 0.2), None, 1);
    unknown.heading = Some(-1.0);
    let mut invalid = event("d1", LatLng::new(0.0, 0.3), None, 2);
    invalid.heading = Some(f64::NAN);

    buffer.add(turning);
    buffer.add(unknown);
    buffer.add(invalid);
    buffer.drain().await;

    assert_eq!(marker.state().headings, vec![90.0]);
    assert_eq!(marker.state().moves.len(), 3);
}

// A missing marker or malformed coordinate skips the event, not the drain.
#[tokio::test(start_paused = true)]
async fn failures_do_not_abort_drain() {
    let marker = RecordingMarker::at(ORIGIN);
    let buffer = buffer_with("d1", marker.clone());

    buffer.add(event("d1", LatLng::new(0.0, 0.1), None, 0));
    buffer.add(event("unknown", LatLng::new(0.0, 0.2), None, 1));
    buffer.add(event("d1", LatLng::new(120.0, 0.3), None, 2));
    buffer.add(event("d1", LatLng::new(0.0, 0.4), None, 3));

    assert_eq!(buffer.drain().await, 2);
    assert_eq!(marker.positions(), vec![LatLng::new(0.0, 0.1), LatLng::new(0.0, 0.4)]);
}

#[tokio::test(start_paused = true)]
async fn plain_marker_moves_instantly() {
    let marker = Arc::new(PlainMarker::default());
    let buffer = buffer_with("d1", marker.clone());

    buffer.add(event("d1", LatLng::new(-36.8, 174.7), Some(12.0), 0));
    assert_eq!(buffer.drain().await, 1);
    assert_eq!(marker.position(), LatLng::new(-36.8, 174.7));
}

#[tokio::test(start_paused = true)]
async fn publishes_steps() {
    let marker = RecordingMarker::at(ORIGIN);
    let buffer = buffer_with("d1", marker);
    let mut steps = buffer.subscribe();

    let first = event("d1", LatLng::new(0.0, 0.1), Some(5.0), 1);
    let second = event("d1", LatLng::new(0.0, 0.2), None, 0);
    buffer.add(first.clone());
    buffer.add(second.clone());
    buffer.drain().await;

    let step = steps.recv().await.expect("should receive step");
    assert_eq!(step.event, second);
    assert_eq!(step.animation.next_lat_lng, second.location);
    assert_eq!(step.animation.mps, None);
    assert_eq!(step.animation.duration, Duration::from_millis(500));

    let step = steps.recv().await.expect("should receive step");
    assert_eq!(step.event, first);
    assert_eq!(step.animation.mps, Some(5.0));
}

// Events added while a drain runs wait for the next drain and are applied
// exactly once.
#[tokio::test(start_paused = true)]
async fn events_added_during_drain_are_kept() {
    let marker = RecordingMarker::at(ORIGIN);
    let buffer = buffer_with("d1", marker.clone());

    buffer.add(event("d1", LatLng::new(0.0, 0.1), None, 0));
    buffer.add(event("d1", LatLng::new(0.0, 0.2), None, 1));

    let background = {
        let buffer = buffer.clone();
        tokio::spawn(async move { buffer.drain().await })
    };
    tokio::task::yield_now().await;
    assert!(buffer.is_processing());
    assert_eq!(buffer.pending(), 0);

    buffer.add(event("d1", LatLng::new(0.0, 0.3), None, 2));

    // only one drain at a time
    assert_eq!(buffer.drain().await, 0);

    assert_eq!(background.await.expect("drain should complete"), 2);
    assert_eq!(buffer.pending(), 1);
    assert_eq!(buffer.drain().await, 1);

    assert_eq!(
        marker.positions(),
        vec![LatLng::new(0.0, 0.1), LatLng::new(0.0, 0.2), LatLng::new(0.0, 0.3)]
    );
}

#[tokio::test(start_paused = true)]
async fn timer_drains_on_interval() {
    let marker = RecordingMarker::at(ORIGIN);
    let buffer = buffer_with("d1", marker.clone());

    buffer.start();
    buffer.start();
    assert!(buffer.is_running());

    buffer.add(event("d1", LatLng::new(0.0, 0.1), None, 0));
    tokio::time::sleep(Duration::from_millis(2_900)).await;
    assert!(marker.positions().is_empty());

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(marker.positions(), vec![LatLng::new(0.0, 0.1)]);

    buffer.stop();
    buffer.stop();
    assert!(!buffer.is_running());

    buffer.add(event("d1", LatLng::new(0.0, 0.2), None, 1));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(buffer.pending(), 1);
}

#[tokio::test]
async fn empty_drain_is_a_no_op() {
    let marker = RecordingMarker::at(ORIGIN);
    let buffer = buffer_with("d1", marker.clone());
    assert_eq!(buffer.drain().await, 0);
    assert!(!buffer.is_processing());
}
