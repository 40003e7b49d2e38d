//! Deterministic in-process backend for tests and hardware-free demos.
//!
//! Frames are synthesized on a fixed interval with the payload tagged by
//! sequence number, and failures (pull timeouts, undecodable frames, control
//! errors) can be injected to exercise the session's error paths.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::capture::frame::PixelFormat;
use crate::driver::{
    CameraBackend, CameraDevice, Control, DeviceInfo, FrameStream, PullError, RawFrame, RawMeta,
    SlotPool, TransportKind,
};
use crate::error::DriverError;

/// Mock camera parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Simulated sensor readout interval.
    pub frame_interval: Duration,
    /// Slots in the simulated driver ring buffer.
    pub ring_capacity: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            format: PixelFormat::Bgr8,
            frame_interval: Duration::from_millis(1),
            ring_capacity: 8,
        }
    }
}

#[derive(Debug)]
struct ControlValues {
    frame_rate: f64,
    exposure_us: f64,
    gain_db: f64,
    auto_exposure: bool,
}

impl Default for ControlValues {
    fn default() -> Self {
        Self {
            frame_rate: 30.0,
            exposure_us: 10_000.0,
            gain_db: 0.0,
            auto_exposure: true,
        }
    }
}

/// Shared mock state, kept accessible so tests can inject failures and
/// inspect pull/release accounting after the session is gone.
#[derive(Debug)]
pub struct MockState {
    pool: Arc<SlotPool>,
    sequence: AtomicU64,
    fail_pulls: AtomicU32,
    bad_frames: AtomicU32,
    fail_controls: AtomicBool,
    streaming: AtomicBool,
    controls: Mutex<ControlValues>,
}

impl MockState {
    fn new(ring_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            pool: SlotPool::new(ring_capacity),
            sequence: AtomicU64::new(0),
            fail_pulls: AtomicU32::new(0),
            bad_frames: AtomicU32::new(0),
            fail_controls: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            controls: Mutex::new(ControlValues::default()),
        })
    }

    /// Lifetime `(pulls, releases)` of the simulated ring buffer.
    pub fn totals(&self) -> (u64, u64) {
        self.pool.totals()
    }

    pub fn outstanding_slots(&self) -> usize {
        self.pool.outstanding()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    /// Make the next `n` pulls time out.
    pub fn inject_pull_failures(&self, n: u32) {
        self.fail_pulls.store(n, Ordering::Release);
    }

    /// Make the next `n` frames undecodable (truncated payload).
    pub fn inject_bad_frames(&self, n: u32) {
        self.bad_frames.store(n, Ordering::Release);
    }

    /// Make control reads/writes fail.
    pub fn fail_controls(&self, fail: bool) {
        self.fail_controls.store(fail, Ordering::Release);
    }

    pub fn exposure_us(&self) -> f64 {
        self.lock_controls().exposure_us
    }

    pub fn auto_exposure_on(&self) -> bool {
        self.lock_controls().auto_exposure
    }

    fn lock_controls(&self) -> std::sync::MutexGuard<'_, ControlValues> {
        self.controls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Backend exposing one simulated camera.
pub struct MockBackend {
    config: MockConfig,
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new(config: MockConfig) -> Self {
        let state = MockState::new(config.ring_capacity);
        Self { config, state }
    }

    /// Shared state handle for failure injection and accounting.
    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

impl CameraBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, DriverError> {
        Ok(vec![DeviceInfo {
            index: 0,
            transport: TransportKind::Mock,
            model: "MockCam".into(),
            serial: "MOCK-0000".into(),
            address: None,
        }])
    }

    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn CameraDevice>, DriverError> {
        if info.index != 0 {
            return Err(DriverError::new(format!(
                "no mock device at index {}",
                info.index
            )));
        }
        Ok(Box::new(MockDevice {
            info: info.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            open: true,
            owns_stream: false,
        }))
    }
}

struct MockDevice {
    info: DeviceInfo,
    config: MockConfig,
    state: Arc<MockState>,
    open: bool,
    // Only the handle that started the stream may stop it; the streaming
    // flag is shared across every handle the backend hands out.
    owns_stream: bool,
}

impl CameraDevice for MockDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start_stream(&mut self) -> Result<Box<dyn FrameStream>, DriverError> {
        if !self.open {
            return Err(DriverError::new("device is closed"));
        }
        if self.state.streaming.swap(true, Ordering::AcqRel) {
            return Err(DriverError::new("stream already started"));
        }
        self.owns_stream = true;
        Ok(Box::new(MockStream {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }))
    }

    fn stop_stream(&mut self) -> Result<(), DriverError> {
        if self.owns_stream {
            self.state.streaming.store(false, Ordering::Release);
            self.owns_stream = false;
        }
        Ok(())
    }

    fn get(&mut self, control: Control) -> Result<f64, DriverError> {
        if self.state.fail_controls.load(Ordering::Acquire) {
            return Err(DriverError::with_status("control read rejected", 0x8000_0101));
        }
        let values = self.state.lock_controls();
        Ok(match control {
            Control::FrameRate => values.frame_rate,
            Control::Exposure => values.exposure_us,
            Control::Gain => values.gain_db,
            Control::AutoExposure => f64::from(u8::from(values.auto_exposure)),
        })
    }

    fn set(&mut self, control: Control, value: f64) -> Result<(), DriverError> {
        if self.state.fail_controls.load(Ordering::Acquire) {
            return Err(DriverError::with_status("control write rejected", 0x8000_0101));
        }
        let mut values = self.state.lock_controls();
        match control {
            Control::FrameRate => values.frame_rate = value,
            Control::Exposure => {
                // Real devices reject a manual exposure write while
                // auto-exposure is active; the mock does the same.
                if values.auto_exposure {
                    return Err(DriverError::with_status(
                        "exposure write while auto-exposure active",
                        0x8000_0106,
                    ));
                }
                values.exposure_us = value;
            }
            Control::Gain => values.gain_db = value,
            Control::AutoExposure => values.auto_exposure = value != 0.0,
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.open = false;
        if self.owns_stream {
            self.state.streaming.store(false, Ordering::Release);
            self.owns_stream = false;
        }
        Ok(())
    }
}

struct MockStream {
    config: MockConfig,
    state: Arc<MockState>,
}

impl FrameStream for MockStream {
    fn pull(&mut self, timeout: Duration) -> Result<RawFrame, PullError> {
        // Simulate the sensor readout interval without ever sleeping longer
        // than the caller's bound.
        thread::sleep(self.config.frame_interval.min(timeout));

        if !self.state.streaming.load(Ordering::Acquire) {
            return Err(PullError::Driver(DriverError::new("stream stopped")));
        }

        if decrement(&self.state.fail_pulls) {
            return Err(PullError::Timeout(timeout));
        }

        let slot = self
            .state
            .pool
            .acquire()
            .ok_or_else(|| PullError::Driver(DriverError::new("ring buffer exhausted")))?;

        let sequence = self.state.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let data = if decrement(&self.state.bad_frames) {
            Bytes::from_static(&[0u8])
        } else {
            Bytes::from(test_pattern(&self.config, sequence))
        };

        let meta = RawMeta {
            sequence,
            width: self.config.width,
            height: self.config.height,
            format: self.config.format,
            len: data.len(),
        };
        Ok(RawFrame::new(meta, data, slot))
    }
}

fn decrement(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok()
}

/// Payload filled with the low byte of the sequence number, so a decoded
/// frame can be traced back to the pull that produced it.
fn test_pattern(config: &MockConfig, sequence: u64) -> Vec<u8> {
    let len = config
        .format
        .raw_size(config.width, config.height)
        .unwrap_or(config.width as usize * config.height as usize * 3);
    vec![(sequence & 0xff) as u8; len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_lists_one_device() {
        let backend = MockBackend::default();
        let devices = backend.enumerate().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].transport, TransportKind::Mock);
    }

    #[test]
    fn pull_tags_payload_with_sequence() {
        let backend = MockBackend::default();
        let mut device = backend.open(&backend.enumerate().unwrap()[0]).unwrap();
        let mut stream = device.start_stream().unwrap();

        let first = stream.pull(Duration::from_millis(100)).unwrap();
        assert_eq!(first.meta.sequence, 1);
        assert_eq!(first.data[0], 1);
        drop(first);

        let second = stream.pull(Duration::from_millis(100)).unwrap();
        assert_eq!(second.meta.sequence, 2);
        assert_eq!(second.data[0], 2);
    }

    #[test]
    fn injected_pull_failures_time_out() {
        let backend = MockBackend::default();
        backend.state().inject_pull_failures(2);
        let mut device = backend.open(&backend.enumerate().unwrap()[0]).unwrap();
        let mut stream = device.start_stream().unwrap();

        for _ in 0..2 {
            let err = stream.pull(Duration::from_millis(10)).unwrap_err();
            assert!(matches!(err, PullError::Timeout(_)));
        }
        assert!(stream.pull(Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn holding_every_slot_exhausts_the_ring() {
        let backend = MockBackend::new(MockConfig {
            ring_capacity: 2,
            ..MockConfig::default()
        });
        let mut device = backend.open(&backend.enumerate().unwrap()[0]).unwrap();
        let mut stream = device.start_stream().unwrap();

        let _a = stream.pull(Duration::from_millis(100)).unwrap();
        let _b = stream.pull(Duration::from_millis(100)).unwrap();
        assert!(stream.pull(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn exposure_write_requires_auto_exposure_off() {
        let backend = MockBackend::default();
        let mut device = backend.open(&backend.enumerate().unwrap()[0]).unwrap();

        assert!(device.set(Control::Exposure, 20_000.0).is_err());
        device.set(Control::AutoExposure, 0.0).unwrap();
        device.set(Control::Exposure, 20_000.0).unwrap();
        assert_eq!(device.get(Control::Exposure).unwrap(), 20_000.0);
    }
}
