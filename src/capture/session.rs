//! Capture session facade and lifecycle state machine.

use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use crate::capture::cache::FrameCache;
use crate::capture::frame::Frame;
use crate::capture::sync::SyncAcquisition;
use crate::capture::worker::AcquisitionLoop;
use crate::driver::{CameraBackend, CameraDevice, Control, DeviceInfo};
use crate::error::{CaptureError, Result};
use crate::CaptureOptions;

/// How frames are acquired while the session is streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// `grab`/`retrieve` run on the caller's thread; no background worker.
    Synchronous,
    /// A background thread keeps the latest-frame cache populated.
    Asynchronous,
}

/// Session properties, numbered like the familiar capture interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prop {
    FrameWidth,
    FrameHeight,
    Fps,
    /// Exposure time, microseconds.
    Exposure,
    /// Gain, dB.
    Gain,
}

impl Prop {
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            3 => Some(Self::FrameWidth),
            4 => Some(Self::FrameHeight),
            5 => Some(Self::Fps),
            15 => Some(Self::Exposure),
            17 => Some(Self::Gain),
            _ => None,
        }
    }

    pub fn id(self) -> i32 {
        match self {
            Self::FrameWidth => 3,
            Self::FrameHeight => 4,
            Self::Fps => 5,
            Self::Exposure => 15,
            Self::Gain => 17,
        }
    }
}

enum ModeState {
    Async(AcquisitionLoop),
    Sync(SyncAcquisition),
}

/// An open capture session over one exclusively-owned device handle.
///
/// Lifecycle: `open` takes the device straight to streaming; `release`
/// (also run on drop) tears everything down and is idempotent. Frame and
/// property calls after `release` fail with [`CaptureError::NotStreaming`].
pub struct CaptureSession {
    info: DeviceInfo,
    options: CaptureOptions,
    device: Option<Box<dyn CameraDevice>>,
    mode: Option<ModeState>,
    cache: Arc<FrameCache>,
}

/// One-shot device listing through a backend.
pub fn enumerate(backend: &dyn CameraBackend) -> Result<Vec<DeviceInfo>> {
    backend
        .enumerate()
        .map_err(|e| CaptureError::EnumerationFailed(e.to_string()))
}

impl CaptureSession {
    /// Enumerate through `backend`, open the device at `index`, and start
    /// streaming in the requested mode.
    ///
    /// Fails with [`CaptureError::DeviceNotFound`] when `index` is out of
    /// range of the fresh enumeration; open or stream-start failures leave
    /// no half-open device behind.
    pub fn open(
        backend: &dyn CameraBackend,
        index: usize,
        mode: AcquisitionMode,
        options: CaptureOptions,
    ) -> Result<Self> {
        let devices = enumerate(backend)?;
        let info = devices
            .get(index)
            .cloned()
            .ok_or(CaptureError::DeviceNotFound {
                index,
                available: devices.len(),
            })?;

        let mut device = backend.open(&info)?;
        info!(device = %info, "device opened");

        let stream = match device.start_stream() {
            Ok(stream) => stream,
            Err(err) => {
                if let Err(close_err) = device.close() {
                    warn!(%close_err, "close after failed stream start");
                }
                return Err(err.into());
            }
        };

        let cache = Arc::new(FrameCache::new());
        let mode = match mode {
            AcquisitionMode::Asynchronous => ModeState::Async(AcquisitionLoop::spawn(
                stream,
                Arc::clone(&cache),
                options.clone(),
            )),
            AcquisitionMode::Synchronous => ModeState::Sync(SyncAcquisition::new(stream)),
        };
        info!(device = %info, "streaming started");

        Ok(Self {
            info,
            options,
            device: Some(device),
            mode: Some(mode),
            cache,
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn is_opened(&self) -> bool {
        self.device.is_some()
    }

    /// Latest decoded frame.
    ///
    /// Asynchronous mode: blocks up to the first-frame timeout until the
    /// worker has ever published, then returns immediately with the newest
    /// frame. Synchronous mode: performs one grab-and-retrieve.
    pub fn read(&mut self) -> Result<Frame> {
        match self.mode.as_mut().ok_or(CaptureError::NotStreaming)? {
            ModeState::Async(worker) => {
                if worker.faulted() {
                    return Err(CaptureError::ConversionFailed(
                        "acquisition stopped after repeated decode failures".into(),
                    ));
                }
                let timeout = self.options.first_frame_timeout;
                if !self.cache.wait_first(timeout) {
                    return Err(CaptureError::Timeout(timeout));
                }
                self.cache.read().ok_or(CaptureError::Timeout(timeout))
            }
            ModeState::Sync(sync) => {
                sync.grab(&self.options)?;
                sync.retrieve()
            }
        }
    }

    /// Trigger a device pull without decoding.
    ///
    /// Synchronous mode captures the raw frame into owned buffers for a
    /// later [`retrieve`](Self::retrieve). Asynchronous mode succeeds once
    /// the background worker has published at least one frame.
    pub fn grab(&mut self) -> Result<()> {
        match self.mode.as_mut().ok_or(CaptureError::NotStreaming)? {
            ModeState::Async(_) => {
                if self.cache.read().is_some() {
                    Ok(())
                } else {
                    Err(CaptureError::InvalidState("no frame cached yet"))
                }
            }
            ModeState::Sync(sync) => sync.grab(&self.options),
        }
    }

    /// Decode and return the grabbed frame.
    ///
    /// Synchronous mode consumes the pending grab exactly once; calling
    /// again without a new `grab` fails with `InvalidState`. Asynchronous
    /// mode returns a copy of the latest cached frame.
    pub fn retrieve(&mut self) -> Result<Frame> {
        match self.mode.as_mut().ok_or(CaptureError::NotStreaming)? {
            ModeState::Async(_) => self
                .cache
                .read()
                .ok_or(CaptureError::InvalidState("no frame cached yet")),
            ModeState::Sync(sync) => sync.retrieve(),
        }
    }

    /// Property read with sentinel semantics: unknown or unreadable
    /// properties yield `0.0`, never an error.
    pub fn get(&mut self, prop: Prop) -> f64 {
        if self.device.is_none() {
            return 0.0;
        }
        match prop {
            Prop::FrameWidth => self.last_geometry().map_or(0.0, |(w, _)| f64::from(w)),
            Prop::FrameHeight => self.last_geometry().map_or(0.0, |(_, h)| f64::from(h)),
            Prop::Fps => self.get_control(Control::FrameRate),
            Prop::Exposure => self.get_control(Control::Exposure),
            Prop::Gain => self.get_control(Control::Gain),
        }
    }

    /// Property write.
    ///
    /// Exposure writes disable auto-exposure first and wait a short settle
    /// interval; the device rejects a manual exposure value while
    /// auto-exposure is active.
    pub fn set(&mut self, prop: Prop, value: f64) -> Result<()> {
        let settle = self.options.auto_exposure_settle;
        let device = self.device.as_mut().ok_or(CaptureError::NotStreaming)?;
        match prop {
            Prop::FrameWidth | Prop::FrameHeight => {
                Err(CaptureError::InvalidState("frame geometry is read-only"))
            }
            Prop::Fps => Ok(device.set(Control::FrameRate, value)?),
            Prop::Gain => Ok(device.set(Control::Gain, value)?),
            Prop::Exposure => {
                device.set(Control::AutoExposure, 0.0)?;
                thread::sleep(settle);
                Ok(device.set(Control::Exposure, value)?)
            }
        }
    }

    /// Stop streaming and close the device. Idempotent; safe to call on an
    /// already-released session. Teardown failures are reported, never
    /// propagated, so release always makes forward progress.
    pub fn release(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };

        match self.mode.take() {
            Some(ModeState::Async(mut worker)) => {
                if !worker.stop(self.options.join_timeout) {
                    warn!(device = %self.info, "worker left running past join deadline");
                }
            }
            Some(ModeState::Sync(mut sync)) => sync.clear(),
            None => {}
        }

        if let Err(err) = device.stop_stream() {
            warn!(%err, "stop stream failed");
        }
        if let Err(err) = device.close() {
            warn!(%err, "device close failed");
        }

        self.cache.clear();
        info!(device = %self.info, "session released");
    }

    fn last_geometry(&self) -> Option<(u32, u32)> {
        match self.mode.as_ref()? {
            ModeState::Async(_) => {
                let frame = self.cache.read()?;
                Some((frame.meta.width, frame.meta.height))
            }
            ModeState::Sync(sync) => sync.last_geometry(),
        }
    }

    fn get_control(&mut self, control: Control) -> f64 {
        let Some(device) = self.device.as_mut() else {
            return 0.0;
        };
        match device.get(control) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, ?control, "property read failed");
                0.0
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
