//! Pixel decode step: raw source encodings to packed BGR8.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use jpeg_decoder::{Decoder, PixelFormat as JpegFormat};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::driver::RawMeta;
use crate::error::CaptureError;

/// Owned scratch buffer holding the most recent raw payload.
///
/// Grown lazily to the largest frame seen, never shrunk. Readers trust only
/// the declared metadata, so stale bytes past the current frame's length are
/// never observed.
#[derive(Debug, Default)]
pub struct ConversionBuffer {
    buf: Vec<u8>,
    len: usize,
}

impl ConversionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy a raw payload in, growing capacity if this frame is the largest
    /// seen so far.
    pub fn store(&mut self, data: &[u8]) {
        if self.buf.len() < data.len() {
            self.buf.resize(data.len(), 0);
        }
        self.buf[..data.len()].copy_from_slice(data);
        self.len = data.len();
    }

    /// Valid bytes of the currently stored frame.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Drop the backing storage on session teardown.
    pub fn clear(&mut self) {
        self.buf = Vec::new();
        self.len = 0;
    }
}

/// Convert one raw frame into a decoded BGR8 [`Frame`].
///
/// This is the shared step between the background acquisition loop and the
/// two-phase grab/retrieve path. A failure here means the frame is dropped;
/// it never aborts the session.
pub fn decode(meta: &RawMeta, src: &[u8]) -> Result<Frame, CaptureError> {
    if meta.width == 0 || meta.height == 0 {
        return Err(CaptureError::ConversionFailed(format!(
            "degenerate frame geometry {}x{}",
            meta.width, meta.height
        )));
    }
    if let Some(expected) = meta.format.raw_size(meta.width, meta.height) {
        if src.len() < expected {
            return Err(CaptureError::ConversionFailed(format!(
                "raw payload too short: {} < {} for {:?} {}x{}",
                src.len(),
                expected,
                meta.format,
                meta.width,
                meta.height
            )));
        }
    }

    let pixels = meta.width as usize * meta.height as usize;
    let mut dst = vec![0u8; pixels * 3];

    match meta.format {
        PixelFormat::Bgr8 => dst.copy_from_slice(&src[..pixels * 3]),
        PixelFormat::Rgb8 => {
            for (out, px) in dst.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
                out[0] = px[2];
                out[1] = px[1];
                out[2] = px[0];
            }
        }
        PixelFormat::Mono8 => {
            for (out, &y) in dst.chunks_exact_mut(3).zip(src[..pixels].iter()) {
                out.fill(y);
            }
        }
        PixelFormat::Yuyv => yuyv_to_bgr(&src[..pixels * 2], &mut dst),
        PixelFormat::Mjpeg => mjpeg_to_bgr(src, meta, &mut dst)?,
    }

    Ok(Frame {
        data: Bytes::from(dst),
        meta: Arc::new(FrameMetadata {
            sequence: meta.sequence,
            width: meta.width,
            height: meta.height,
            stride: meta.width * 3,
            source_format: meta.format,
            raw_len: meta.len,
        }),
        timestamp: Instant::now(),
    })
}

/// YUYV 4:2:2 to packed BGR, ITU-R BT.601.
fn yuyv_to_bgr(src: &[u8], dst: &mut [u8]) {
    for (quad, out) in src.chunks_exact(4).zip(dst.chunks_exact_mut(6)) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        let (b, g, r) = yuv_to_bgr(y0, u, v);
        out[0] = b;
        out[1] = g;
        out[2] = r;
        let (b, g, r) = yuv_to_bgr(y1, u, v);
        out[3] = b;
        out[4] = g;
        out[5] = r;
    }
}

fn yuv_to_bgr(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    (clamp_u8(b), clamp_u8(g), clamp_u8(r))
}

fn clamp_u8(val: f32) -> u8 {
    val.clamp(0.0, 255.0) as u8
}

fn mjpeg_to_bgr(src: &[u8], meta: &RawMeta, dst: &mut [u8]) -> Result<(), CaptureError> {
    let mut decoder = Decoder::new(src);
    let pixels = decoder
        .decode()
        .map_err(|e| CaptureError::ConversionFailed(format!("jpeg decode: {e}")))?;
    let info = decoder
        .info()
        .ok_or_else(|| CaptureError::ConversionFailed("jpeg decode: no header".into()))?;

    if u32::from(info.width) != meta.width || u32::from(info.height) != meta.height {
        return Err(CaptureError::ConversionFailed(format!(
            "jpeg geometry {}x{} does not match declared {}x{}",
            info.width, info.height, meta.width, meta.height
        )));
    }

    match info.pixel_format {
        JpegFormat::RGB24 => {
            for (out, px) in dst.chunks_exact_mut(3).zip(pixels.chunks_exact(3)) {
                out[0] = px[2];
                out[1] = px[1];
                out[2] = px[0];
            }
            Ok(())
        }
        JpegFormat::L8 => {
            for (out, &y) in dst.chunks_exact_mut(3).zip(pixels.iter()) {
                out.fill(y);
            }
            Ok(())
        }
        other => Err(CaptureError::ConversionFailed(format!(
            "unsupported jpeg layout {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(width: u32, height: u32, format: PixelFormat, len: usize) -> RawMeta {
        RawMeta {
            sequence: 1,
            width,
            height,
            format,
            len,
        }
    }

    #[test]
    fn bgr_passthrough() {
        let src = vec![10u8, 20, 30, 40, 50, 60];
        let frame = decode(&meta(2, 1, PixelFormat::Bgr8, src.len()), &src).unwrap();
        assert_eq!(&frame.data[..], &src[..]);
        assert_eq!(frame.meta.stride, 6);
    }

    #[test]
    fn rgb_swaps_channels() {
        let src = vec![255u8, 0, 0]; // red in RGB
        let frame = decode(&meta(1, 1, PixelFormat::Rgb8, src.len()), &src).unwrap();
        assert_eq!(&frame.data[..], &[0, 0, 255]); // red in BGR
    }

    #[test]
    fn mono_replicates_luma() {
        let src = vec![7u8, 200];
        let frame = decode(&meta(2, 1, PixelFormat::Mono8, src.len()), &src).unwrap();
        assert_eq!(&frame.data[..], &[7, 7, 7, 200, 200, 200]);
    }

    #[test]
    fn yuyv_grey_midpoint() {
        // Y=128, U=V=128 is mid grey; both pixels of the pair match.
        let src = vec![128u8, 128, 128, 128];
        let frame = decode(&meta(2, 1, PixelFormat::Yuyv, src.len()), &src).unwrap();
        assert_eq!(&frame.data[..], &[128, 128, 128, 128, 128, 128]);
    }

    #[test]
    fn short_payload_is_rejected() {
        let src = vec![0u8; 5];
        let err = decode(&meta(2, 1, PixelFormat::Bgr8, src.len()), &src).unwrap_err();
        assert!(matches!(err, CaptureError::ConversionFailed(_)));
    }

    #[test]
    fn invalid_jpeg_is_rejected() {
        let src = vec![0u8; 64];
        let err = decode(&meta(2, 2, PixelFormat::Mjpeg, src.len()), &src).unwrap_err();
        assert!(matches!(err, CaptureError::ConversionFailed(_)));
    }

    #[test]
    fn conversion_buffer_grows_and_keeps_capacity() {
        let mut buf = ConversionBuffer::new();
        buf.store(&[1, 2, 3, 4]);
        assert_eq!(buf.bytes(), &[1, 2, 3, 4]);
        assert_eq!(buf.capacity(), 4);

        buf.store(&[9, 9]);
        assert_eq!(buf.bytes(), &[9, 9]);
        // Capacity never shrinks.
        assert_eq!(buf.capacity(), 4);

        buf.store(&[0; 8]);
        assert_eq!(buf.capacity(), 8);
    }
}
