//! Device-driver boundary.
//!
//! Backends implement three small traits: [`CameraBackend`] enumerates and
//! opens devices, [`CameraDevice`] owns one device handle (properties,
//! stream control), and [`FrameStream`] exposes the single blocking
//! "pull next raw frame" primitive. Everything above this module treats a
//! backend as opaque.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::frame::PixelFormat;
use crate::error::DriverError;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(feature = "v4l2")]
pub mod v4l2;

/// Transport a device is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    GigE,
    Usb,
    V4l2,
    Mock,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GigE => "GigE",
            Self::Usb => "USB",
            Self::V4l2 => "V4L2",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One enumerated device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub transport: TransportKind,
    pub model: String,
    pub serial: String,
    /// Network address for networked transports.
    pub address: Option<String>,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.index, self.transport, self.model, self.serial
        )?;
        if let Some(addr) = &self.address {
            write!(f, " - {addr}")?;
        }
        Ok(())
    }
}

/// Device controls addressable through `get`/`set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Acquisition frame rate, frames per second.
    FrameRate,
    /// Exposure time, microseconds.
    Exposure,
    /// Analog gain, dB.
    Gain,
    /// Auto-exposure switch; 0.0 = off, anything else = continuous.
    AutoExposure,
}

/// Declared layout of a raw frame still in driver memory.
#[derive(Debug, Clone, Copy)]
pub struct RawMeta {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Payload length in bytes.
    pub len: usize,
}

/// One raw frame pulled from a device.
///
/// Holding a `RawFrame` keeps one slot of the driver's ring buffer
/// outstanding; dropping it releases the slot. Payload bytes must be copied
/// out before the frame is dropped.
pub struct RawFrame {
    pub meta: RawMeta,
    pub data: Bytes,
    _slot: SlotGuard,
}

impl RawFrame {
    pub fn new(meta: RawMeta, data: Bytes, slot: SlotGuard) -> Self {
        Self {
            meta,
            data,
            _slot: slot,
        }
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("meta", &self.meta)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Accounting for a driver's internal frame ring buffer.
///
/// Tracks how many slots are outstanding so a backend can refuse pulls once
/// the ring is exhausted, and keeps lifetime pull/release totals.
#[derive(Debug)]
pub struct SlotPool {
    capacity: usize,
    outstanding: AtomicUsize,
    pulled: AtomicU64,
    released: AtomicU64,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            outstanding: AtomicUsize::new(0),
            pulled: AtomicU64::new(0),
            released: AtomicU64::new(0),
        })
    }

    /// Claim a slot, or `None` when every slot is still un-released.
    pub fn acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        let mut current = self.outstanding.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return None;
            }
            match self.outstanding.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(seen) => current = seen,
            }
        }
        self.pulled.fetch_add(1, Ordering::Relaxed);
        Some(SlotGuard {
            pool: Arc::clone(self),
        })
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Lifetime `(pulls, releases)` totals.
    pub fn totals(&self) -> (u64, u64) {
        (
            self.pulled.load(Ordering::Relaxed),
            self.released.load(Ordering::Relaxed),
        )
    }
}

/// Releases its ring-buffer slot when dropped, on every exit path.
pub struct SlotGuard {
    pool: Arc<SlotPool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.pool.released.fetch_add(1, Ordering::Relaxed);
    }
}

/// Why a pull produced no frame.
#[derive(Debug, Error)]
pub enum PullError {
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Enumerates devices and opens device handles.
pub trait CameraBackend {
    fn name(&self) -> &'static str;

    /// One-shot device listing. No side effects beyond querying the driver.
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, DriverError>;

    /// Open an exclusive handle to one enumerated device.
    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn CameraDevice>, DriverError>;
}

/// An open device handle. Exclusively owned; never cloned.
pub trait CameraDevice: Send {
    fn info(&self) -> &DeviceInfo;

    /// Start the raw acquisition stream in continuous (non-triggered) mode.
    fn start_stream(&mut self) -> Result<Box<dyn FrameStream>, DriverError>;

    /// Stop the raw acquisition stream. Idempotent.
    fn stop_stream(&mut self) -> Result<(), DriverError>;

    fn get(&mut self, control: Control) -> Result<f64, DriverError>;

    fn set(&mut self, control: Control, value: f64) -> Result<(), DriverError>;

    /// Close the device handle. Idempotent; the handle is unusable after.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// Blocking source of raw frames for one started stream.
pub trait FrameStream: Send {
    /// Block up to `timeout` for the next raw frame.
    fn pull(&mut self, timeout: Duration) -> Result<RawFrame, PullError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_pool_refuses_pulls_past_capacity() {
        let pool = SlotPool::new(2);
        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none());

        drop(a);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn raw_frame_debug_omits_payload_bytes() {
        let pool = SlotPool::new(1);
        let raw = RawFrame::new(
            RawMeta {
                sequence: 9,
                width: 2,
                height: 1,
                format: PixelFormat::Bgr8,
                len: 6,
            },
            Bytes::from_static(&[0; 6]),
            pool.acquire().unwrap(),
        );
        let text = format!("{raw:?}");
        assert!(text.contains("sequence: 9"));
        assert!(!text.contains("SlotGuard"));
    }

    #[test]
    fn slot_pool_counts_every_release() {
        let pool = SlotPool::new(4);
        for _ in 0..10 {
            let guard = pool.acquire().unwrap();
            drop(guard);
        }
        assert_eq!(pool.totals(), (10, 10));
        assert_eq!(pool.outstanding(), 0);
    }
}
