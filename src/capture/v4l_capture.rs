use super::CaptureSource;
use anyhow::{Context, Result};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::{Buffer, Camera};

pub struct WebcamCapture {
    camera: Camera,
    pending: Option<Buffer>,
    width: u32,
    height: u32,
    frame_rate: u32,
}

impl WebcamCapture {
    /// Open `device` (`/dev/videoN`, `videoN` or a bare index) asking for the
    /// format closest to `width`x`height`
    pub fn new(device: &str, width: u32, height: u32) -> Result<Self> {
        tracing::info!("Initializing webcam {} at {}x{}", device, width, height);

        let index = match parse_device_index(device) {
            Some(index) => CameraIndex::Index(index),
            None => CameraIndex::String(device.to_string()),
        };
        let wanted = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, 30);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let resolution = camera.resolution();
        let frame_rate = camera.frame_rate();

        tracing::info!(
            "Webcam initialized at {}x{} @ {} fps",
            resolution.width(),
            resolution.height(),
            frame_rate
        );

        Ok(Self {
            camera,
            pending: None,
            width: resolution.width(),
            height: resolution.height(),
            frame_rate,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn grab(&mut self) -> Result<()> {
        let buffer = self.camera.frame().context("Failed to capture frame")?;
        self.pending = Some(buffer);
        Ok(())
    }

    fn retrieve(&mut self, frame: &mut RgbImage) -> Result<()> {
        let Some(buffer) = self.pending.take() else {
            *frame = RgbImage::new(0, 0);
            return Ok(());
        };

        match buffer.decode_image::<RgbFormat>() {
            Ok(decoded) => *frame = decoded,
            Err(err) => {
                tracing::debug!("Dropping undecodable frame: {}", err);
                *frame = RgbImage::new(0, 0);
            }
        }
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame_rate(&self) -> u32 {
        self.frame_rate
    }
}

/// Parse a `/dev/videoX`, `videoX` or plain numeric device name into its index.
pub fn parse_device_index(device: &str) -> Option<u32> {
    let digits = device
        .strip_prefix("/dev/video")
        .or_else(|| device.strip_prefix("video"))
        .unwrap_or(device);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
