pub mod cache;
pub mod convert;
pub mod frame;
pub mod session;
pub(crate) mod sync;
pub mod videocap;
pub(crate) mod worker;

pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use session::{enumerate, AcquisitionMode, CaptureSession, Prop};
pub use videocap::VideoCapture;
