use anyhow::Result;
use image::{GrayImage, RgbImage};

use crate::timing::TimingSample;

/// Alpha matte at model resolution: 0.0 = background, 1.0 = foreground,
/// flattened in row-major order
pub type Matte = Vec<f32>;

/// Trait for segmentation models
/// Allows swapping between different backends (RVM, selfie segmentation, ...)
///
/// Models are moved onto the mask worker thread, hence `Send`.
pub trait SegmentationModel: Send {
    /// Compute the mask for `frame`, writing it into `mask`
    ///
    /// `mask` keeps its dimensions; the model result is scaled to fit.
    /// Stage durations go into `timing` under `prep`, `infer` and `post`.
    fn segment(
        &mut self,
        frame: &RgbImage,
        mask: &mut GrayImage,
        timing: &mut TimingSample,
    ) -> Result<()>;

    /// Get the model's input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}
