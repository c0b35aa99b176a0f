use std::fmt;
use std::str::FromStr;

use image::{imageops, RgbImage};

use crate::error::ConfigError;

/// Frame dimensions in pixels. Both sides are always above zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(width: u32, height: u32) -> Result<Self, ConfigError> {
        if width == 0 || height == 0 {
            return Err(ConfigError::Geometry(format!("{width}x{height}")));
        }
        Ok(Self { width, height })
    }

    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn of(image: &RgbImage) -> Option<Self> {
        let (width, height) = image.dimensions();
        Self::new(width, height).ok()
    }

    /// Same geometry with the width rounded up to an even number, as needed
    /// for 2:1 chroma subsampling.
    pub fn with_even_width(self) -> Self {
        Self {
            width: self.width + self.width % 2,
            height: self.height,
        }
    }

    /// Whether `width / height` matches `other` without going through floats.
    pub fn same_aspect(&self, other: &Geometry) -> bool {
        self.width as u64 * other.height as u64 == other.width as u64 * self.height as u64
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Geometry {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Geometry(s.to_string());
        let (w, h) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
        let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
        Self::new(width, height).map_err(|_| invalid())
    }
}

/// Rectangle inside a source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub fn full(geometry: Geometry) -> Self {
        Self {
            x: 0,
            y: 0,
            width: geometry.width,
            height: geometry.height,
        }
    }

    pub fn is_full(&self, geometry: Geometry) -> bool {
        *self == Self::full(geometry)
    }
}

/// Find the centered region of a `capture` frame that has the aspect ratio of
/// `output`.
///
/// Only the axis that is too long is cut; odd remainders are truncated, so the
/// extra pixel ends up in the right/bottom margin.
pub fn compute_crop(capture: Geometry, output: Geometry) -> CropRegion {
    // width the capture would need at full height to match the output aspect
    let width = (capture.height as u64 * output.width as u64 / output.height as u64) as u32;
    if width < capture.width {
        return CropRegion {
            x: (capture.width - width) / 2,
            y: 0,
            width,
            height: capture.height,
        };
    }

    let height = (capture.width as u64 * output.height as u64 / output.width as u64) as u32;
    if height < capture.height {
        return CropRegion {
            x: 0,
            y: (capture.height - height) / 2,
            width: capture.width,
            height,
        };
    }

    CropRegion::full(capture)
}

/// Cut `crop` out of `frame` (unless it covers the whole frame) and resize the
/// result to `output`.
pub fn crop_and_scale(frame: RgbImage, crop: CropRegion, output: Geometry) -> RgbImage {
    let (width, height) = frame.dimensions();
    let fits = crop.x + crop.width <= width && crop.y + crop.height <= height;
    let full = Geometry::of(&frame).map_or(true, |geometry| crop.is_full(geometry));
    let cropped = if fits && !full {
        imageops::crop_imm(&frame, crop.x, crop.y, crop.width, crop.height).to_image()
    } else {
        frame
    };

    if cropped.dimensions() != (output.width, output.height) {
        imageops::resize(
            &cropped,
            output.width,
            output.height,
            imageops::FilterType::Triangle,
        )
    } else {
        cropped
    }
}
