//! Sentinel-ergonomics wrapper over [`CaptureSession`].
//!
//! Mirrors the familiar capture interface: booleans and empty results
//! instead of errors, raw integer property ids, an idempotent `release`.
//! Callers wanting errors as errors use [`CaptureSession`] directly.

use tracing::debug;

use crate::capture::frame::Frame;
use crate::capture::session::{AcquisitionMode, CaptureSession, Prop};
use crate::driver::CameraBackend;
use crate::CaptureOptions;

/// A capture handle that never errors: failed calls return `false`, `None`,
/// or `0.0`.
#[derive(Default)]
pub struct VideoCapture {
    session: Option<CaptureSession>,
}

impl VideoCapture {
    /// An unopened capture; call [`open`](Self::open) next.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open device `index` through `backend` in asynchronous mode with
    /// default options. Returns whether the device is now streaming.
    pub fn open(&mut self, backend: &dyn CameraBackend, index: usize) -> bool {
        self.open_with(backend, index, AcquisitionMode::Asynchronous, CaptureOptions::default())
    }

    /// Open with explicit mode and options.
    pub fn open_with(
        &mut self,
        backend: &dyn CameraBackend,
        index: usize,
        mode: AcquisitionMode,
        options: CaptureOptions,
    ) -> bool {
        self.release();
        match CaptureSession::open(backend, index, mode, options) {
            Ok(session) => {
                self.session = Some(session);
                true
            }
            Err(err) => {
                debug!(%err, index, "open failed");
                false
            }
        }
    }

    pub fn is_opened(&self) -> bool {
        self.session.as_ref().is_some_and(CaptureSession::is_opened)
    }

    /// Latest frame, or `None` when none is available.
    pub fn read(&mut self) -> Option<Frame> {
        self.session.as_mut()?.read().ok()
    }

    /// Trigger a device pull without decoding.
    pub fn grab(&mut self) -> bool {
        self.session.as_mut().is_some_and(|s| s.grab().is_ok())
    }

    /// Decode and return the frame captured by the last successful `grab`.
    pub fn retrieve(&mut self) -> Option<Frame> {
        self.session.as_mut()?.retrieve().ok()
    }

    /// Property read by raw id; unknown ids yield `0.0`.
    pub fn get(&mut self, prop_id: i32) -> f64 {
        let (Some(session), Some(prop)) = (self.session.as_mut(), Prop::from_id(prop_id)) else {
            return 0.0;
        };
        session.get(prop)
    }

    /// Property write by raw id; unknown ids yield `false`.
    pub fn set(&mut self, prop_id: i32, value: f64) -> bool {
        let (Some(session), Some(prop)) = (self.session.as_mut(), Prop::from_id(prop_id)) else {
            return false;
        };
        session.set(prop, value).is_ok()
    }

    /// Transport name of the open session's backend, or `""` when closed.
    pub fn backend_name(&self) -> &'static str {
        self.session
            .as_ref()
            .map_or("", |s| s.info().transport.as_str())
    }

    /// Tear the session down. Idempotent.
    pub fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.release();
        }
    }
}
