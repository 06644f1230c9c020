use air_cursor::core_modules::detector::observation_channel;
use air_cursor::pipeline::{
    HandData, HandLandmarks, HandObservation, InteractionState, Landmark, ParameterStore, PointerButton, PointerCommand,
    RecordingPointer, TimedObservation,
};
use air_cursor::session::{self, SessionHandle};
use anyhow::anyhow;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Index raised, fingertips apart, pointing at normalized (0.5, 0.45).
fn relaxed() -> HandLandmarks {
    relaxed_at(0.5, 0.45)
}

fn relaxed_at(x: f64, y: f64) -> HandLandmarks {
    HandLandmarks {
        normalized_index_tip: Landmark::new(x, y, 0.0),
        world_wrist: Landmark::new(0.0, 0.0, 0.0),
        world_thumb_tip: Landmark::new(-0.06, -0.03, -0.01),
        world_index_tip: Landmark::new(0.0, -0.09, -0.02),
        world_middle_tip: Landmark::new(0.06, -0.04, 0.0),
    }
}

fn pinch() -> HandLandmarks {
    let mut hand = relaxed();
    hand.world_thumb_tip = Landmark::new(0.003, -0.087, -0.02);
    hand
}

fn frame(timestamp_ms: u64, hand: Option<HandLandmarks>) -> anyhow::Result<TimedObservation> {
    Ok(TimedObservation {
        timestamp_ms,
        observation: HandObservation::from(hand),
    })
}

async fn start(store: ParameterStore) -> (SessionHandle, air_cursor::core_modules::detector::ObservationSender, RecordingPointer) {
    let (tx, rx) = observation_channel();
    let device = RecordingPointer::new((960, 540));
    let log = device.clone();
    let handle = session::start(store, rx, move || Ok(device)).await.unwrap();
    (handle, tx, log)
}

async fn wait_until(log: &RecordingPointer, what: &str, done: impl Fn(&[PointerCommand]) -> bool) {
    let waited = timeout(Duration::from_secs(2), async {
        while !done(&log.commands()) {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}, got {:?}", log.commands());
}

async fn wait_for_snapshot(handle: &SessionHandle, what: &str, done: impl Fn(&HandData) -> bool) {
    let waited = timeout(Duration::from_secs(2), async {
        while !done(&handle.snapshot()) {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}, got {:?}", handle.snapshot());
}

fn count(commands: &[PointerCommand], command: PointerCommand) -> usize {
    commands.iter().filter(|c| **c == command).count()
}

const PRESS: PointerCommand = PointerCommand::Press { button: PointerButton::Left };
const RELEASE: PointerCommand = PointerCommand::Release { button: PointerButton::Left };

#[tokio::test]
async fn test_stop_mid_drag_releases_the_button() {
    let (handle, tx, log) = start(ParameterStore::default()).await;
    assert!(handle.is_recognizing());

    tx.send(frame(1, Some(pinch()))).await.unwrap();
    wait_until(&log, "drag press", |c| c.contains(&PRESS)).await;
    assert_eq!(handle.snapshot().status, InteractionState::Drag);

    let report = handle.stop().await.unwrap();
    assert_eq!(report.frames_processed, 1);
    assert_eq!(report.frames_dropped, 0);
    assert_eq!(log.commands().last(), Some(&RELEASE));
}

#[tokio::test]
async fn test_detector_fault_ends_session_and_releases() {
    let (handle, tx, log) = start(ParameterStore::default()).await;

    tx.send(frame(1, Some(pinch()))).await.unwrap();
    wait_until(&log, "drag press", |c| c.contains(&PRESS)).await;

    tx.send(Err(anyhow!("camera unplugged"))).await.unwrap();
    timeout(Duration::from_secs(2), handle.finished()).await.unwrap();
    assert!(!handle.is_recognizing());
    assert!(!handle.snapshot().is_valid);

    let error = handle.stop().await.unwrap_err();
    assert!(format!("{error:#}").contains("camera unplugged"), "got {error:#}");
    assert_eq!(log.commands().last(), Some(&RELEASE));
}

#[tokio::test]
async fn test_pause_releases_and_resume_continues() {
    let (handle, tx, log) = start(ParameterStore::default()).await;

    tx.send(frame(1, Some(pinch()))).await.unwrap();
    wait_until(&log, "drag press", |c| c.contains(&PRESS)).await;

    handle.pause();
    assert!(handle.is_paused());
    wait_until(&log, "release on pause", |c| c.contains(&RELEASE)).await;
    assert!(!handle.snapshot().is_valid);
    assert!(handle.is_recognizing());

    handle.resume();
    tx.send(frame(2, Some(pinch()))).await.unwrap();
    wait_until(&log, "second press", |c| count(c, PRESS) == 2).await;

    let report = handle.stop().await.unwrap();
    assert_eq!(report.frames_processed, 2);
    assert_eq!(report.frames_skipped, 0);
}

#[tokio::test]
async fn test_frames_seen_while_paused_are_discarded() {
    let (handle, tx, log) = start(ParameterStore::default()).await;

    tx.send(frame(1, Some(relaxed()))).await.unwrap();
    wait_until(&log, "first move", |c| c.contains(&PointerCommand::MoveTo { x: 1662, y: 915 })).await;

    handle.pause();
    wait_for_snapshot(&handle, "paused snapshot", |s| !s.is_valid).await;

    // The detector keeps producing; none of this may be replayed on resume.
    for timestamp_ms in [2, 3, 4] {
        tx.send(frame(timestamp_ms, Some(relaxed_at(0.3, 0.3)))).await.unwrap();
    }
    let drained = timeout(Duration::from_secs(2), async {
        while tx.capacity() < tx.max_capacity() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "producer stopped draining while paused");

    handle.resume();
    tx.send(frame(5, Some(relaxed_at(0.7, 0.6)))).await.unwrap();
    wait_for_snapshot(&handle, "newest frame", |s| s.is_valid && s.target() == (3023, 1490)).await;

    let report = handle.stop().await.unwrap();
    assert_eq!(report.frames_processed, 2);
    assert_eq!(report.frames_skipped, 3);
}

#[tokio::test]
async fn test_out_of_order_frames_are_dropped() {
    let (handle, tx, _log) = start(ParameterStore::default()).await;

    for timestamp_ms in [10, 5, 10, 11] {
        tx.send(frame(timestamp_ms, None)).await.unwrap();
    }
    drop(tx);
    timeout(Duration::from_secs(2), handle.finished()).await.unwrap();

    let report = handle.stop().await.unwrap();
    assert_eq!(report.frames_processed, 3);
    assert_eq!(report.frames_dropped, 1);
}

#[tokio::test]
async fn test_parameter_change_applies_to_next_frame() {
    let store = ParameterStore::default();
    let (handle, tx, log) = start(store.clone()).await;

    // Target is (1674, 927); the default 12px deadzone stops short of it.
    tx.send(frame(1, Some(relaxed()))).await.unwrap();
    let first = PointerCommand::MoveTo { x: 1662, y: 915 };
    wait_until(&log, "first move", |c| c.contains(&first)).await;

    store.set("move_sensitivity", "100").unwrap();
    tx.send(frame(2, Some(relaxed()))).await.unwrap();
    // A 2px tolerance pads the mapping less, moving the target to (1679, 942).
    let second = PointerCommand::MoveTo { x: 1677, y: 940 };
    wait_until(&log, "move with the narrower deadzone", |c| c.contains(&second)).await;

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_device_failure_fails_start() {
    let (_tx, rx) = observation_channel();
    let result = session::start(ParameterStore::default(), rx, || -> anyhow::Result<RecordingPointer> {
        Err(anyhow!("no display"))
    })
    .await;
    let Err(error) = result else {
        panic!("session started without a device");
    };
    assert!(format!("{error:#}").contains("no display"), "got {error:#}");
}

#[tokio::test]
async fn test_dropping_the_handle_releases_the_pointer() {
    let (handle, tx, log) = start(ParameterStore::default()).await;
    tx.send(frame(1, Some(pinch()))).await.unwrap();
    wait_until(&log, "drag press", |c| c.contains(&PRESS)).await;

    drop(handle);
    wait_until(&log, "release after drop", |c| c.last() == Some(&RELEASE)).await;
}

#[tokio::test]
async fn test_interrupt_stops_mid_drag_and_releases() {
    let (handle, tx, log) = start(ParameterStore::default()).await;
    tx.send(frame(1, Some(pinch()))).await.unwrap();
    wait_until(&log, "drag press", |c| c.contains(&PRESS)).await;

    let report = timeout(Duration::from_secs(2), handle.run_until(async { Ok(()) }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.frames_processed, 1);
    assert_eq!(log.commands().last(), Some(&RELEASE));
}

#[tokio::test]
async fn test_failed_interrupt_source_still_stops_cleanly() {
    let (handle, tx, log) = start(ParameterStore::default()).await;
    tx.send(frame(1, Some(pinch()))).await.unwrap();
    wait_until(&log, "drag press", |c| c.contains(&PRESS)).await;

    let run = tokio::spawn(handle.run_until(async { Err(std::io::Error::other("no signal handler")) }));
    // The session keeps running until the detector ends.
    tx.send(frame(2, Some(pinch()))).await.unwrap();
    drop(tx);

    let report = timeout(Duration::from_secs(2), run).await.unwrap().unwrap().unwrap();
    assert_eq!(report.frames_processed, 2);
    assert_eq!(log.commands().last(), Some(&RELEASE));
}
