//! facefeed-hw: video capture for the recognition pipeline.
//!
//! Provides V4L2-based camera access with frames decoded to RGB.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CaptureError, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};

/// A blocking source of frames.
///
/// The pipeline pulls from this on its own thread; an error ends the run.
pub trait VideoSource: Send {
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
}
