//! Two-phase acquisition on the caller's thread.
//!
//! `grab` pulls a raw frame and copies it into owned buffers so several
//! devices can be triggered back to back before any of them pays the decode
//! cost; `retrieve` then decodes the captured bytes. No background thread
//! exists in this mode.

use tracing::debug;

use crate::capture::convert::{self, ConversionBuffer};
use crate::capture::frame::Frame;
use crate::driver::{FrameStream, PullError, RawMeta};
use crate::error::{CaptureError, Result};
use crate::CaptureOptions;

/// State machine: `Idle` -> `Grabbed` -> `Idle`.
pub(crate) struct SyncAcquisition {
    stream: Box<dyn FrameStream>,
    scratch: ConversionBuffer,
    /// `Grabbed` when true: the scratch buffer holds an undecoded frame.
    pending: bool,
    /// Metadata of the most recent grab, kept for geometry queries.
    last: Option<RawMeta>,
}

impl SyncAcquisition {
    pub fn new(stream: Box<dyn FrameStream>) -> Self {
        Self {
            stream,
            scratch: ConversionBuffer::new(),
            pending: false,
            last: None,
        }
    }

    /// Pull one raw frame and capture it into owned buffers.
    ///
    /// On failure the state stays `Idle`; the driver slot is released on
    /// every path when the raw handle goes out of scope.
    pub fn grab(&mut self, options: &CaptureOptions) -> Result<()> {
        self.pending = false;

        let raw = self.stream.pull(options.pull_timeout).map_err(|err| match err {
            PullError::Timeout(t) => CaptureError::Timeout(t),
            PullError::Driver(e) => CaptureError::Driver(e),
        })?;

        self.scratch.store(&raw.data);
        self.last = Some(raw.meta);
        self.pending = true;
        debug!(sequence = raw.meta.sequence, "frame grabbed");
        Ok(())
    }

    /// Decode the frame captured by the previous `grab`.
    ///
    /// Consumes the grab whether decoding succeeds or not; a second call
    /// without a new `grab` fails.
    pub fn retrieve(&mut self) -> Result<Frame> {
        if !self.pending {
            return Err(CaptureError::InvalidState("retrieve without a prior grab"));
        }
        self.pending = false;

        let meta = self
            .last
            .ok_or(CaptureError::InvalidState("no grabbed frame metadata"))?;
        convert::decode(&meta, self.scratch.bytes())
    }

    /// Geometry of the most recently grabbed frame, if any.
    pub fn last_geometry(&self) -> Option<(u32, u32)> {
        self.last.map(|m| (m.width, m.height))
    }

    /// Drop the scratch storage on teardown.
    pub fn clear(&mut self) {
        self.scratch.clear();
        self.pending = false;
    }
}
