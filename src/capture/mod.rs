mod v4l_capture;

pub use v4l_capture::{parse_device_index, WebcamCapture};

use anyhow::Result;
use image::RgbImage;

/// Trait for camera capture sources
///
/// Capturing is split in two like a V4L2 device: `grab` waits for the next
/// frame, `retrieve` decodes it into a caller-owned buffer.
pub trait CaptureSource {
    /// Wait for the next frame from the device
    ///
    /// A failed grab only costs the current cycle.
    fn grab(&mut self) -> Result<()>;

    /// Decode the last grabbed frame into `frame`
    ///
    /// A frame that cannot be decoded leaves `frame` empty (0x0); callers
    /// skip such frames.
    fn retrieve(&mut self, frame: &mut RgbImage) -> Result<()>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);

    /// Nominal frames per second reported by the device, 0 if unknown
    fn frame_rate(&self) -> u32;
}
