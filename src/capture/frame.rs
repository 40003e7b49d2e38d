use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// A decoded frame with zero-copy semantics.
///
/// The payload is immutable and reference-counted, so a reader may hold a
/// frame indefinitely without blocking further acquisition.
#[derive(Clone)]
pub struct Frame {
    /// Packed BGR8 pixel data, `height * width * 3` bytes.
    pub data: Bytes,

    /// Frame metadata, published atomically together with the payload.
    pub meta: Arc<FrameMetadata>,

    /// Decode timestamp for latency tracking.
    pub timestamp: Instant,
}

impl Frame {
    /// BGR triple at `(x, y)`, or `None` when out of bounds.
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.meta.width || y >= self.meta.height {
            return None;
        }
        let offset = ((y * self.meta.width + x) * 3) as usize;
        let px = self.data.get(offset..offset + 3)?;
        Some((px[0], px[1], px[2]))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Frame metadata.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Driver-assigned sequence number of the raw frame this was decoded from.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per output row (`width * 3` for packed BGR).
    pub stride: u32,
    /// Source encoding the frame was converted from.
    pub source_format: PixelFormat,
    /// Byte length of the raw frame before conversion.
    pub raw_len: usize,
}

/// Pixel encodings we accept from device backends.
///
/// Output is always packed BGR8; these describe the source side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Bgr8,
    Rgb8,
    Mono8,
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    /// Expected raw byte length for a `width` x `height` frame, or `None`
    /// for compressed encodings.
    pub fn raw_size(self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            Self::Bgr8 | Self::Rgb8 => Some(pixels * 3),
            Self::Mono8 => Some(pixels),
            Self::Yuyv => Some(pixels * 2),
            Self::Mjpeg => None,
        }
    }
}
