use anyhow::{ensure, Result};
use image::{imageops, GrayImage, RgbImage};
use ndarray::Array4;

/// Memory layout of the model input tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// [1, 3, height, width]
    Nchw,
    /// [1, height, width, 3]
    Nhwc,
}

/// Preprocessor for converting RGB images to model input tensors
#[derive(Debug, Clone)]
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    layout: TensorLayout,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32, layout: TensorLayout) -> Self {
        Self {
            target_width,
            target_height,
            layout,
        }
    }

    /// Preprocess an RGB image into a normalized tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Lay out channels as NCHW or NHWC
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized;
        let source = if image.dimensions() != (self.target_width, self.target_height) {
            resized = imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        let (width, height) = (self.target_width as usize, self.target_height as usize);
        let mut tensor = match self.layout {
            TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, height, width)),
            TensorLayout::Nhwc => Array4::<f32>::zeros((1, height, width, 3)),
        };

        for (x, y, pixel) in source.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                let value = pixel[channel] as f32 / 255.0;
                match self.layout {
                    TensorLayout::Nchw => tensor[[0, channel, y, x]] = value,
                    TensorLayout::Nhwc => tensor[[0, y, x, channel]] = value,
                }
            }
        }

        tensor
    }

    /// Scale a model matte into `mask`, keeping the mask's dimensions
    ///
    /// # Arguments
    /// * `matte` - Flattened matte at model resolution, values in [0, 1]
    /// * `matte_width` - Width of the matte
    /// * `matte_height` - Height of the matte
    /// * `mask` - Destination, already sized to the output geometry
    pub fn postprocess_matte(
        matte: &[f32],
        matte_width: u32,
        matte_height: u32,
        mask: &mut GrayImage,
    ) -> Result<()> {
        let _span = tracing::debug_span!("postprocess").entered();

        ensure!(
            matte.len() == matte_width as usize * matte_height as usize,
            "matte has {} values, expected {}x{}",
            matte.len(),
            matte_width,
            matte_height
        );

        let gray_image = GrayImage::from_fn(matte_width, matte_height, |x, y| {
            let idx = (y * matte_width + x) as usize;
            let value = (matte[idx] * 255.0).clamp(0.0, 255.0) as u8;
            image::Luma([value])
        });

        let (width, height) = mask.dimensions();
        if gray_image.dimensions() == (width, height) {
            mask.copy_from_slice(&gray_image);
        } else {
            let resized = imageops::resize(
                &gray_image,
                width,
                height,
                imageops::FilterType::Triangle,
            );
            mask.copy_from_slice(&resized);
        }

        Ok(())
    }
}
