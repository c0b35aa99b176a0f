use super::FrameSink;
use crate::compositor::YUYV_BYTES_PER_PIXEL;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use v4l::format::FieldOrder;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

/// v4l2loopback device fed with packed YUYV frames
pub struct V4L2Output {
    // keeps the negotiated format alive for the lifetime of the writer
    _device: Device,
    file: File,
    name: String,
    width: u32,
    height: u32,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        let mut format = Format::new(width, height, FourCC::new(b"YUYV"));
        format.field_order = FieldOrder::Progressive;
        format.stride = width * YUYV_BYTES_PER_PIXEL as u32;
        format.size = format.stride * height;

        let actual = Output::set_format(&device, &format)
            .with_context(|| format!("Failed to set output format on {}", path.display()))?;
        tracing::debug!("Loopback format: {}", actual);
        if (actual.width, actual.height) != (width, height) || actual.fourcc != format.fourcc {
            tracing::warn!(
                "Loopback device negotiated {}x{} {} instead of {}x{} YUYV",
                actual.width,
                actual.height,
                actual.fourcc,
                width,
                height
            );
        }

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            _device: device,
            file,
            name: path.display().to_string(),
            width,
            height,
        })
    }
}

impl FrameSink for V4L2Output {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.file.write(bytes)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Accept device names without the `/dev/` prefix.
pub fn device_path(name: &str) -> String {
    if name.starts_with("/dev/") {
        name.to_string()
    } else {
        format!("/dev/{name}")
    }
}
