//! V4L2 backend: enumeration over `/dev/video*`, mmap streaming, and the
//! subset of controls this crate exposes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::control::{Control as V4lControl, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::PixelFormat;
use crate::driver::{
    CameraBackend, CameraDevice, Control, DeviceInfo, FrameStream, PullError, RawFrame, RawMeta,
    SlotPool, TransportKind,
};
use crate::error::DriverError;

const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const CID_GAIN: u32 = 0x0098_0913;

// V4L2_EXPOSURE_MANUAL / V4L2_EXPOSURE_APERTURE_PRIORITY
const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_AUTO: i64 = 3;

const DEVICE_SCAN_LIMIT: usize = 10;
const BUFFER_COUNT: u32 = 4;

/// Backend over the kernel video-capture interface.
#[derive(Debug, Default)]
pub struct V4l2Backend;

impl V4l2Backend {
    pub fn new() -> Self {
        Self
    }
}

impl CameraBackend for V4l2Backend {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, DriverError> {
        let mut devices = Vec::new();
        for node in 0..DEVICE_SCAN_LIMIT {
            let path = format!("/dev/video{node}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(device) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = device.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
                continue;
            }
            debug!(path, card = caps.card, "capture device found");
            devices.push(DeviceInfo {
                index: devices.len(),
                transport: TransportKind::V4l2,
                model: caps.card.clone(),
                serial: caps.bus,
                address: Some(path),
            });
        }
        Ok(devices)
    }

    fn open(&self, info: &DeviceInfo) -> Result<Box<dyn CameraDevice>, DriverError> {
        let path = info
            .address
            .as_deref()
            .ok_or_else(|| DriverError::new("device info carries no node path"))?;
        let device = Device::with_path(path)?;

        let caps = device.query_caps()?;
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(DriverError::new("node does not support video capture"));
        }

        // Prefer a format the converter understands; fall back to whatever
        // the driver negotiated.
        let mut fmt = device.format()?;
        let preferred = [
            FourCC::new(b"MJPG"),
            FourCC::new(b"YUYV"),
            FourCC::new(b"RGB3"),
            FourCC::new(b"GREY"),
        ];
        if pixel_format(fmt.fourcc).is_none() {
            if let Ok(formats) = device.enum_formats() {
                if let Some(supported) = preferred
                    .into_iter()
                    .find(|want| formats.iter().any(|f| f.fourcc == *want))
                {
                    fmt.fourcc = supported;
                    fmt = device.set_format(&fmt)?;
                }
            }
        }
        let pixel = pixel_format(fmt.fourcc)
            .ok_or_else(|| DriverError::new(format!("unsupported pixel format {}", fmt.fourcc)))?;

        info!(device = %info, format = %fmt.fourcc, width = fmt.width, height = fmt.height, "device opened");
        Ok(Box::new(V4l2Device {
            info: info.clone(),
            device: Some(device),
            path: path.to_string(),
            width: fmt.width,
            height: fmt.height,
            pixel,
            streaming: false,
        }))
    }
}

fn pixel_format(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"MJPG" => Some(PixelFormat::Mjpeg),
        b"YUYV" => Some(PixelFormat::Yuyv),
        b"RGB3" => Some(PixelFormat::Rgb8),
        b"BGR3" => Some(PixelFormat::Bgr8),
        b"GREY" => Some(PixelFormat::Mono8),
        _ => None,
    }
}

struct V4l2Device {
    info: DeviceInfo,
    device: Option<Device>,
    path: String,
    width: u32,
    height: u32,
    pixel: PixelFormat,
    streaming: bool,
}

impl V4l2Device {
    fn handle(&self) -> Result<&Device, DriverError> {
        self.device
            .as_ref()
            .ok_or_else(|| DriverError::new("device is closed"))
    }

    fn integer_control(&self, id: u32) -> Result<f64, DriverError> {
        let ctrl = self.handle()?.control(id)?;
        match ctrl.value {
            Value::Integer(v) => Ok(v as f64),
            Value::Boolean(b) => Ok(f64::from(u8::from(b))),
            other => Err(DriverError::new(format!(
                "control 0x{id:x} has non-numeric value {other:?}"
            ))),
        }
    }

    fn set_integer_control(&self, id: u32, value: i64) -> Result<(), DriverError> {
        self.handle()?
            .set_control(V4lControl {
                id,
                value: Value::Integer(value),
            })
            .map_err(DriverError::from)
    }
}

impl CameraDevice for V4l2Device {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn start_stream(&mut self) -> Result<Box<dyn FrameStream>, DriverError> {
        if self.streaming {
            return Err(DriverError::new("stream already started"));
        }

        // Separate handle for streaming so property calls never contend
        // with the blocking dequeue. Both fds address the same node.
        let stream_device = Device::with_path(&self.path)?;
        let stream = MmapStream::with_buffers(&stream_device, Type::VideoCapture, BUFFER_COUNT)?;
        self.streaming = true;
        info!(device = %self.info, buffers = BUFFER_COUNT, "stream started");

        Ok(Box::new(V4l2Stream {
            stream,
            pool: SlotPool::new(BUFFER_COUNT as usize),
            width: self.width,
            height: self.height,
            pixel: self.pixel,
        }))
    }

    fn stop_stream(&mut self) -> Result<(), DriverError> {
        // Dropping the stream object stops streaming on its fd.
        self.streaming = false;
        Ok(())
    }

    fn get(&mut self, control: Control) -> Result<f64, DriverError> {
        match control {
            Control::FrameRate => {
                let params = self.handle()?.params()?;
                let interval = params.interval;
                if interval.numerator == 0 {
                    return Err(DriverError::new("device reports no frame interval"));
                }
                Ok(f64::from(interval.denominator) / f64::from(interval.numerator))
            }
            // exposure_absolute is in 100 us units
            Control::Exposure => Ok(self.integer_control(CID_EXPOSURE_ABSOLUTE)? * 100.0),
            Control::Gain => self.integer_control(CID_GAIN),
            Control::AutoExposure => {
                let mode = self.integer_control(CID_EXPOSURE_AUTO)?;
                Ok(f64::from(u8::from(mode as i64 != EXPOSURE_MANUAL)))
            }
        }
    }

    fn set(&mut self, control: Control, value: f64) -> Result<(), DriverError> {
        match control {
            Control::FrameRate => {
                self.handle()?.set_params(&Parameters::with_fps(value as u32))?;
                Ok(())
            }
            Control::Exposure => {
                self.set_integer_control(CID_EXPOSURE_ABSOLUTE, (value / 100.0) as i64)
            }
            Control::Gain => self.set_integer_control(CID_GAIN, value as i64),
            Control::AutoExposure => {
                let mode = if value == 0.0 {
                    EXPOSURE_MANUAL
                } else {
                    EXPOSURE_AUTO
                };
                self.set_integer_control(CID_EXPOSURE_AUTO, mode)
            }
        }
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if self.device.take().is_some() {
            info!(device = %self.info, "device closed");
        }
        self.streaming = false;
        Ok(())
    }
}

struct V4l2Stream {
    stream: MmapStream<'static>,
    pool: Arc<SlotPool>,
    width: u32,
    height: u32,
    pixel: PixelFormat,
}

impl FrameStream for V4l2Stream {
    // The kernel paces dequeues at the sensor frame interval; there is no
    // per-call deadline, so `timeout` only bounds the error we report.
    fn pull(&mut self, timeout: Duration) -> Result<RawFrame, PullError> {
        let slot = self.pool.acquire().ok_or_else(|| {
            PullError::Driver(DriverError::new("all mmap buffers outstanding"))
        })?;

        let (buf, meta) = self.stream.next().map_err(|err| {
            if err.kind() == std::io::ErrorKind::TimedOut {
                PullError::Timeout(timeout)
            } else {
                PullError::Driver(DriverError::from(err))
            }
        })?;

        let used = if meta.bytesused > 0 {
            meta.bytesused as usize
        } else {
            buf.len()
        };
        let len = used.min(buf.len());
        if len == 0 {
            warn!(sequence = meta.sequence, "empty buffer dequeued");
            return Err(PullError::Driver(DriverError::new("empty capture buffer")));
        }

        Ok(RawFrame::new(
            RawMeta {
                sequence: u64::from(meta.sequence),
                width: self.width,
                height: self.height,
                format: self.pixel,
                len,
            },
            Bytes::copy_from_slice(&buf[..len]),
            slot,
        ))
    }
}
