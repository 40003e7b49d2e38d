//! Continuous frame acquisition from imaging devices behind an
//! open / read / set-property / release capture interface.
//!
//! The crate decouples a slow, blocking device pull from readers that want
//! the most recent frame: a per-session background loop pulls raw frames,
//! converts them to packed BGR8, and publishes them through a latest-wins
//! cache. A synchronous grab/retrieve mode is available for callers that
//! need precise timing control across several devices.

pub mod capture;
pub mod diag;
pub mod driver;
pub mod error;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{
    enumerate, AcquisitionMode, CaptureSession, Frame, FrameMetadata, PixelFormat, Prop,
    VideoCapture,
};
pub use driver::{CameraBackend, Control, DeviceInfo, TransportKind};
pub use error::{CaptureError, DriverError};

/// Tunable timing and failure policy for one capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// Bound on each raw-frame pull.
    #[serde(rename = "pull_timeout_ms", with = "duration_ms")]
    pub pull_timeout: Duration,

    /// How long `read` waits for the first frame ever.
    #[serde(rename = "first_frame_timeout_ms", with = "duration_ms")]
    pub first_frame_timeout: Duration,

    /// How long `release` waits for the acquisition thread before detaching.
    #[serde(rename = "join_timeout_ms", with = "duration_ms")]
    pub join_timeout: Duration,

    /// Pause after a failed pull, so a failing link is not hot-spun.
    #[serde(rename = "retry_sleep_ms", with = "duration_ms")]
    pub retry_sleep: Duration,

    /// Settle interval between disabling auto-exposure and writing a manual
    /// exposure value.
    #[serde(rename = "auto_exposure_settle_ms", with = "duration_ms")]
    pub auto_exposure_settle: Duration,

    /// Report at most this many consecutive pull failures after the first
    /// successful frame; earlier failures are startup latency.
    pub error_report_cap: u32,

    /// Stop acquisition after this many consecutive decode failures.
    /// `None` keeps dropping bad frames forever.
    pub max_decode_failures: Option<u32>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            pull_timeout: Duration::from_millis(1000),
            first_frame_timeout: Duration::from_millis(3000),
            join_timeout: Duration::from_millis(2000),
            retry_sleep: Duration::from_millis(10),
            auto_exposure_settle: Duration::from_millis(100),
            error_report_cap: 5,
            max_decode_failures: None,
        }
    }
}

/// Durations serialized as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
