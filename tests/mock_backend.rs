//! Session behavior against the mock backend: resource accounting,
//! latest-wins reads, two-phase acquisition, lifecycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use aperture::capture::cache::FrameCache;
use aperture::capture::frame::{Frame, FrameMetadata, PixelFormat};
use aperture::driver::mock::{MockBackend, MockConfig};
use aperture::{AcquisitionMode, CaptureError, CaptureOptions, CaptureSession, Prop, VideoCapture};

fn fast_options() -> CaptureOptions {
    CaptureOptions {
        first_frame_timeout: Duration::from_millis(500),
        join_timeout: Duration::from_millis(500),
        auto_exposure_settle: Duration::from_millis(5),
        retry_sleep: Duration::from_millis(1),
        ..CaptureOptions::default()
    }
}

fn open(backend: &MockBackend, mode: AcquisitionMode) -> CaptureSession {
    CaptureSession::open(backend, 0, mode, fast_options()).expect("open mock session")
}

#[test]
fn every_pull_is_released() {
    let backend = MockBackend::default();
    let state = backend.state();

    let mut session = open(&backend, AcquisitionMode::Asynchronous);
    session.read().expect("read frame");
    // Let the acquisition loop churn through a handful of frames.
    std::thread::sleep(Duration::from_millis(50));
    session.release();

    let (pulls, releases) = state.totals();
    assert!(pulls >= 1);
    assert_eq!(pulls, releases);
    assert_eq!(state.outstanding_slots(), 0);
}

#[test]
fn pulls_are_released_even_when_decoding_fails() {
    let backend = MockBackend::default();
    let state = backend.state();
    state.inject_bad_frames(3);

    let mut session = open(&backend, AcquisitionMode::Asynchronous);
    session.read().expect("read frame after bad ones");
    session.release();

    let (pulls, releases) = state.totals();
    assert_eq!(pulls, releases);
    assert_eq!(state.outstanding_slots(), 0);
}

#[test]
fn reads_skip_to_the_latest_frame() {
    let backend = MockBackend::default();
    let mut session = open(&backend, AcquisitionMode::Asynchronous);

    let first = session.read().expect("first read");
    // Let the producer run well past the frame we saw.
    std::thread::sleep(Duration::from_millis(100));
    let later = session.read().expect("second read");

    assert!(later.meta.sequence > first.meta.sequence);
    // More frames were produced than read: intermediates were dropped,
    // not queued.
    assert!(later.meta.sequence > 2);
    session.release();
}

#[test]
fn concurrent_reads_never_observe_a_torn_frame() {
    fn tagged(sequence: u64) -> Frame {
        Frame {
            data: bytes::Bytes::from(vec![(sequence & 0xff) as u8; 12]),
            meta: Arc::new(FrameMetadata {
                sequence,
                width: 2,
                height: 2,
                stride: 6,
                source_format: PixelFormat::Bgr8,
                raw_len: 12,
            }),
            timestamp: Instant::now(),
        }
    }

    let cache = Arc::new(FrameCache::new());
    let publisher = {
        let cache = Arc::clone(&cache);
        std::thread::spawn(move || {
            for sequence in 1..=2000u64 {
                cache.publish(tagged(sequence));
            }
        })
    };

    let mut observed = 0u32;
    while observed < 2000 {
        if let Some(frame) = cache.read() {
            let tag = (frame.meta.sequence & 0xff) as u8;
            assert!(
                frame.data.iter().all(|&b| b == tag),
                "payload of frame {} does not match its metadata",
                frame.meta.sequence
            );
            observed += 1;
        }
        if publisher.is_finished() && observed > 0 {
            break;
        }
    }
    publisher.join().unwrap();
}

#[test]
fn retrieve_consumes_the_grab_exactly_once() {
    let backend = MockBackend::default();
    let mut session = open(&backend, AcquisitionMode::Synchronous);

    session.grab().expect("grab");
    session.retrieve().expect("retrieve after grab");

    let err = session.retrieve().expect_err("second retrieve must fail");
    assert!(matches!(err, CaptureError::InvalidState(_)));
    session.release();
}

#[test]
fn grab_retrieve_cycles_produce_fresh_frames() {
    let backend = MockBackend::default();
    let mut session = open(&backend, AcquisitionMode::Synchronous);

    session.grab().expect("first grab");
    let first = session.retrieve().expect("first retrieve");
    session.grab().expect("second grab");
    let second = session.retrieve().expect("second retrieve");

    assert!(second.meta.sequence > first.meta.sequence);
    assert!(first.meta.width > 0 && first.meta.height > 0);
    session.release();
}

#[test]
fn release_is_idempotent() {
    let backend = MockBackend::default();
    let mut session = open(&backend, AcquisitionMode::Asynchronous);

    session.release();
    assert!(!session.is_opened());
    session.release();
    assert!(!session.is_opened());
    assert!(matches!(session.read(), Err(CaptureError::NotStreaming)));
}

#[test]
fn exposure_write_disables_auto_exposure_first() {
    let backend = MockBackend::default();
    let state = backend.state();
    let mut session = open(&backend, AcquisitionMode::Asynchronous);

    assert!(state.auto_exposure_on());
    session.set(Prop::Exposure, 20_000.0).expect("set exposure");
    assert!(!state.auto_exposure_on());
    assert_eq!(session.get(Prop::Exposure), 20_000.0);
    assert_eq!(state.exposure_us(), 20_000.0);
    session.release();
}

#[test]
fn failed_property_reads_yield_the_sentinel() {
    let backend = MockBackend::default();
    let state = backend.state();
    let mut session = open(&backend, AcquisitionMode::Asynchronous);

    state.fail_controls(true);
    assert_eq!(session.get(Prop::Gain), 0.0);
    assert!(session.set(Prop::Gain, 6.0).is_err());

    state.fail_controls(false);
    session.set(Prop::Gain, 6.0).expect("set gain");
    assert_eq!(session.get(Prop::Gain), 6.0);
    session.release();
}

#[test]
fn full_streaming_scenario() {
    let backend = MockBackend::default();
    let devices = aperture::enumerate(&backend).expect("enumerate");
    assert_eq!(devices.len(), 1);

    let mut session = CaptureSession::open(
        &backend,
        0,
        AcquisitionMode::Asynchronous,
        CaptureOptions::default(),
    )
    .expect("open");

    let started = Instant::now();
    let frame = session.read().expect("first frame");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(frame.meta.width > 0 && frame.meta.height > 0);
    assert_eq!(frame.data.len(), (frame.meta.width * frame.meta.height * 3) as usize);

    session.set(Prop::Gain, 12.0).expect("set gain");
    assert_eq!(session.get(Prop::Gain), 12.0);

    session.release();
    assert!(!session.is_opened());
}

#[test]
fn open_out_of_range_reports_device_not_found() {
    let backend = MockBackend::default();
    let state = backend.state();

    let Err(err) = CaptureSession::open(
        &backend,
        3,
        AcquisitionMode::Asynchronous,
        CaptureOptions::default(),
    ) else {
        panic!("index 3 does not exist, open must fail");
    };

    assert!(matches!(
        err,
        CaptureError::DeviceNotFound { index: 3, available: 1 }
    ));
    // Nothing was started or leaked by the failed open.
    assert!(!state.is_streaming());
    assert_eq!(state.totals(), (0, 0));
}

#[test]
fn transient_pull_failures_do_not_stop_the_stream() {
    let backend = MockBackend::default();
    backend.state().inject_pull_failures(3);

    let mut session = open(&backend, AcquisitionMode::Asynchronous);
    let frame = session.read().expect("stream recovers after timeouts");
    assert!(frame.meta.sequence >= 1);
    session.release();
}

#[test]
fn decode_circuit_breaker_stops_acquisition_when_configured() {
    let backend = MockBackend::new(MockConfig {
        ring_capacity: 64,
        ..MockConfig::default()
    });
    let state = backend.state();
    state.inject_bad_frames(1000);

    let options = CaptureOptions {
        max_decode_failures: Some(3),
        first_frame_timeout: Duration::from_millis(30),
        ..fast_options()
    };
    let mut session =
        CaptureSession::open(&backend, 0, AcquisitionMode::Asynchronous, options).expect("open");

    let deadline = Instant::now() + Duration::from_secs(2);
    let tripped = loop {
        match session.read() {
            Err(CaptureError::ConversionFailed(_)) => break true,
            Err(CaptureError::Timeout(_)) if Instant::now() < deadline => continue,
            other => break other.is_err() && Instant::now() >= deadline,
        }
    };
    assert!(tripped, "circuit breaker never tripped");

    session.release();
    let (pulls, releases) = state.totals();
    assert_eq!(pulls, releases);
}

#[test]
fn video_capture_wrapper_uses_sentinels() {
    let backend = MockBackend::default();
    let mut cap = VideoCapture::new();

    assert!(!cap.is_opened());
    assert_eq!(cap.backend_name(), "");
    assert!(cap.open(&backend, 0));
    assert!(cap.is_opened());
    assert_eq!(cap.backend_name(), "mock");

    let frame = cap.read().expect("frame through wrapper");
    assert!(frame.meta.width > 0);

    // Unknown property ids are sentinels, not errors.
    assert_eq!(cap.get(99), 0.0);
    assert!(!cap.set(99, 1.0));
    assert_eq!(cap.get(3), f64::from(frame.meta.width));

    assert!(cap.grab());
    assert!(cap.retrieve().is_some());

    cap.release();
    assert!(!cap.is_opened());
    assert_eq!(cap.backend_name(), "");
    assert!(cap.read().is_none());
    cap.release();
}

#[test]
fn async_grab_before_any_frame_is_invalid_state() {
    let backend = MockBackend::default();
    // Keep the worker from ever publishing a frame.
    backend.state().inject_pull_failures(u32::MAX);
    let mut session = open(&backend, AcquisitionMode::Asynchronous);

    assert!(matches!(
        session.grab(),
        Err(CaptureError::InvalidState(_))
    ));
    session.release();
}

#[test]
fn open_fails_cleanly_when_stream_cannot_start() {
    // Opening a second session while the first is streaming hits the mock's
    // single-stream limit; the failure must not leave a half-open device.
    let backend = MockBackend::default();
    let mut first = open(&backend, AcquisitionMode::Asynchronous);

    let Err(err) = CaptureSession::open(
        &backend,
        0,
        AcquisitionMode::Asynchronous,
        fast_options(),
    ) else {
        panic!("second stream must be refused");
    };
    assert!(matches!(err, CaptureError::Driver(_)));

    // The refused open must not have torn down the first session.
    first.read().expect("first session keeps streaming");
    first.release();
}
