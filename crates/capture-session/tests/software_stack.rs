use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use capture_session::{
    Backends, KeepAlive, SessionConfig, SessionController, SessionResult, StopOutcome,
};
use media_store::FileSystemStore;
use recorder_shared::{
    AuthorizationToken, CaptureParameters, FrameRate, OutputIntegrity, QualityTier,
    RecordingSummary, SessionState,
};

/// Counts indicators currently shown
#[derive(Default)]
struct Indicator {
    shown: AtomicI64,
}

impl KeepAlive for Indicator {
    fn announce(&self, _description: &str) -> SessionResult<()> {
        self.shown.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn retract(&self) {
        self.shown.fetch_sub(1, Ordering::SeqCst);
    }
}

fn controller(dir: &tempfile::TempDir, indicator: Arc<Indicator>) -> SessionController {
    let config = SessionConfig::default();
    let backends = Backends::software(
        Arc::new(FileSystemStore::new(dir.path())),
        indicator,
        &config,
    );
    SessionController::new(backends, config)
}

/// Duration recorded in the movie header of an MP4 file
fn container_duration(bytes: &[u8]) -> Duration {
    let at = bytes
        .windows(4)
        .position(|window| window == b"mvhd")
        .expect("no mvhd box");
    let body = &bytes[at + 4..];
    let be32 = |range: std::ops::Range<usize>| u32::from_be_bytes(body[range].try_into().unwrap());
    let (timescale, duration) = if body[0] == 1 {
        let duration = u64::from_be_bytes(body[24..32].try_into().unwrap());
        (be32(20..24), duration)
    } else {
        (be32(12..16), be32(16..20) as u64)
    };
    assert!(timescale > 0, "mvhd timescale is zero");
    Duration::from_secs_f64(duration as f64 / timescale as f64)
}

/// Record for `length`, returning the summary and the wall time between
/// `start` returning and `stop` being called
fn record(
    controller: &SessionController,
    params: CaptureParameters,
    length: Duration,
) -> (RecordingSummary, Duration) {
    let token = AuthorizationToken::issue(Vec::new(), Duration::from_secs(60));
    controller.start(token, params).unwrap();
    let capture_started = Instant::now();
    std::thread::sleep(length);
    let stop_requested = Instant::now();

    let summary = match controller.stop() {
        StopOutcome::Finished(summary) => summary,
        other => panic!("unexpected stop outcome: {:?}", other),
    };
    (summary, stop_requested - capture_started)
}

fn assert_within_one_frame(actual: Duration, expected: Duration, interval: Duration) {
    let drift = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    // One frame interval, plus sleep and timer slack on the test's own clock
    assert!(
        drift <= interval + Duration::from_millis(5),
        "container duration {:?} vs wall clock {:?} (frame interval {:?})",
        actual,
        expected,
        interval
    );
}

#[test]
fn test_recording_produces_finalized_mp4() {
    let dir = tempfile::tempdir().unwrap();
    let indicator = Arc::new(Indicator::default());
    let controller = controller(&dir, indicator.clone());
    let params = CaptureParameters::new(FrameRate::Fps30, 500_000, 64, 64).unwrap();

    let (summary, elapsed) = record(&controller, params, Duration::from_secs(1));

    assert_eq!(controller.query_state(), SessionState::Idle);
    assert_eq!(summary.integrity, OutputIntegrity::Finalized);
    assert!(summary.frames_encoded > 10, "frames: {}", summary.frames_encoded);

    let bytes = std::fs::read(&summary.location).unwrap();
    assert_eq!(bytes.len() as u64, summary.bytes_written);
    assert_eq!(&bytes[4..8], b"ftyp");
    assert_within_one_frame(container_duration(&bytes), elapsed, params.frame_interval());
    assert_eq!(indicator.shown.load(Ordering::SeqCst), 0);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path != &summary.location)
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
}

#[test]
fn test_five_second_portrait_recording() {
    let dir = tempfile::tempdir().unwrap();
    let indicator = Arc::new(Indicator::default());
    let controller = controller(&dir, indicator.clone());
    let params = CaptureParameters::for_quality(FrameRate::Fps30, QualityTier::Medium);
    assert_eq!((params.width, params.height, params.bitrate), (720, 1280, 4_000_000));

    let (summary, elapsed) = record(&controller, params, Duration::from_secs(5));

    assert_eq!(controller.query_state(), SessionState::Idle);
    assert_eq!(summary.integrity, OutputIntegrity::Finalized);
    assert_eq!(indicator.shown.load(Ordering::SeqCst), 0, "indicator left shown");

    let bytes = std::fs::read(&summary.location).unwrap();
    assert_eq!(&bytes[4..8], b"ftyp");
    let duration = container_duration(&bytes);
    assert_within_one_frame(duration, elapsed, params.frame_interval());
    assert_within_one_frame(
        Duration::from_millis(summary.duration_ms),
        duration,
        params.frame_interval(),
    );
}

#[test]
fn test_back_to_back_sessions_get_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(&dir, Arc::new(Indicator::default()));
    let params = CaptureParameters::new(FrameRate::Fps30, 500_000, 32, 32).unwrap();

    let mut locations = Vec::new();
    for _ in 0..2 {
        let (summary, _) = record(&controller, params, Duration::from_millis(200));
        locations.push(summary.location);
    }

    assert_ne!(locations[0], locations[1]);
    assert!(locations.iter().all(|location| location.exists()));
}
