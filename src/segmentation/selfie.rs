use super::preprocess::{Preprocessor, TensorLayout};
use super::types::{Matte, SegmentationModel};
use crate::timing::{Stopwatch, TimingSample};
use anyhow::{bail, Context, Result};
use image::{GrayImage, RgbImage};
use ndarray::ArrayViewD;
use ort::session::Session;
use ort::value::TensorRef;

/// Single-input selfie segmentation model (MediaPipe style)
///
/// Takes one NHWC frame in [0, 1] and returns either a single foreground
/// probability channel or a two-channel background/foreground score map.
/// Stateless between frames.
pub struct SelfieSegmenter {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,
}

impl SelfieSegmenter {
    pub fn new(session: Session, width: u32, height: u32) -> Self {
        Self {
            session,
            preprocessor: Preprocessor::new(width, height, TensorLayout::Nhwc),
            width,
            height,
        }
    }
}

impl SegmentationModel for SelfieSegmenter {
    fn segment(
        &mut self,
        frame: &RgbImage,
        mask: &mut GrayImage,
        timing: &mut TimingSample,
    ) -> Result<()> {
        let _span = tracing::debug_span!("selfie_segment").entered();
        let mut stopwatch = Stopwatch::start();

        let input_tensor = self.preprocessor.preprocess(frame);
        stopwatch.lap(timing, "prep");

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input_tensor.view())?])
            .context("Failed to run inference")?;
        drop(_infer_span);
        stopwatch.lap(timing, "infer");

        let scores = outputs[0].try_extract_array::<f32>()?;
        let (matte, width, height) = foreground_matte(&scores)?;
        drop(outputs);

        Preprocessor::postprocess_matte(&matte, width, height, mask)?;
        stopwatch.lap(timing, "post");

        Ok(())
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Reduce the model output to a foreground probability per pixel.
///
/// Accepts [1, H, W, C] or [1, C, H, W] with C of 1 (probability) or 2
/// (background and foreground scores, softmaxed here).
fn foreground_matte(scores: &ArrayViewD<'_, f32>) -> Result<(Matte, u32, u32)> {
    let shape = scores.shape();
    if shape.len() != 4 {
        bail!("unexpected segmentation output shape {:?}", shape);
    }

    let channels_last = shape[3] <= 2;
    let (height, width, channels) = if channels_last {
        (shape[1], shape[2], shape[3])
    } else {
        (shape[2], shape[3], shape[1])
    };
    if channels == 0 || channels > 2 {
        bail!("unexpected segmentation output shape {:?}", shape);
    }

    let at = |y: usize, x: usize, c: usize| {
        if channels_last {
            scores[[0, y, x, c]]
        } else {
            scores[[0, c, y, x]]
        }
    };

    let mut matte = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let value = if channels == 2 {
                // softmax of two scores is a sigmoid of their difference
                1.0 / (1.0 + (at(y, x, 0) - at(y, x, 1)).exp())
            } else {
                at(y, x, 0)
            };
            matte.push(value);
        }
    }

    Ok((matte, width as u32, height as u32))
}
