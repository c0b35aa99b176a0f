use super::preprocess::{Preprocessor, TensorLayout};
use super::types::SegmentationModel;
use crate::timing::{Stopwatch, TimingSample};
use anyhow::{Context, Result};
use image::{GrayImage, RgbImage};
use ndarray::{Array1, Array4, Ix4};
use ort::session::Session;
use ort::value::TensorRef;

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results.
pub struct RobustVideoMatting {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,

    // Recurrent hidden states
    // These are updated after each inference and fed back in the next frame
    r1: Option<Array4<f32>>,
    r2: Option<Array4<f32>>,
    r3: Option<Array4<f32>>,
    r4: Option<Array4<f32>>,

    // Downsample ratio for hidden states, also fed to the model
    downsample_ratio: Array1<f32>,
}

impl RobustVideoMatting {
    /// Wrap a loaded RVM session
    ///
    /// # Default Configuration
    /// - Input size: 512x512 (can be adjusted for performance/quality tradeoff)
    /// - Downsample ratio: 0.25 (hidden states are 1/4 of input resolution)
    pub fn new(session: Session) -> Self {
        let width = 512;
        let height = 512;

        Self {
            session,
            preprocessor: Preprocessor::new(width, height, TensorLayout::Nchw),
            width,
            height,
            r1: None,
            r2: None,
            r3: None,
            r4: None,
            downsample_ratio: Array1::from_elem(1, 0.25),
        }
    }

    /// Initialize hidden states to zeros
    fn init_hidden_states(&mut self) {
        let ratio = self.downsample_ratio[0];
        let h = (self.height as f32 * ratio) as usize;
        let w = (self.width as f32 * ratio) as usize;

        tracing::debug!("Initializing hidden states to {}x{}", w, h);

        self.r1 = Some(Array4::zeros((1, 16, h, w)));
        self.r2 = Some(Array4::zeros((1, 20, h / 2, w / 2)));
        self.r3 = Some(Array4::zeros((1, 24, h / 4, w / 4)));
        self.r4 = Some(Array4::zeros((1, 28, h / 8, w / 8)));
    }
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(
        &mut self,
        frame: &RgbImage,
        mask: &mut GrayImage,
        timing: &mut TimingSample,
    ) -> Result<()> {
        let _span = tracing::debug_span!("rvm_segment").entered();
        let mut stopwatch = Stopwatch::start();

        // Initialize hidden states on first frame
        if self.r1.is_none() {
            self.init_hidden_states();
        }
        let (Some(r1), Some(r2), Some(r3), Some(r4)) = (&self.r1, &self.r2, &self.r3, &self.r4)
        else {
            anyhow::bail!("RVM hidden states are missing");
        };

        let input_tensor = self.preprocessor.preprocess(frame);
        stopwatch.lap(timing, "prep");

        // RVM expects: src (frame), r1i-r4i, downsample_ratio
        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs! {
                "src" => TensorRef::from_array_view(input_tensor.view())?,
                "r1i" => TensorRef::from_array_view(r1.view())?,
                "r2i" => TensorRef::from_array_view(r2.view())?,
                "r3i" => TensorRef::from_array_view(r3.view())?,
                "r4i" => TensorRef::from_array_view(r4.view())?,
                "downsample_ratio" => TensorRef::from_array_view(self.downsample_ratio.view())?,
            })
            .context("Failed to run inference")?;
        drop(_infer_span);
        stopwatch.lap(timing, "infer");

        // Outputs: fgr (foreground), pha (alpha), r1o-r4o
        // We only need pha (the matte) and the updated hidden states
        let pha = outputs["pha"].try_extract_array::<f32>()?;
        let matte_shape = pha.shape();
        anyhow::ensure!(matte_shape.len() == 4, "unexpected pha shape {:?}", matte_shape);
        let matte_height = matte_shape[2];
        let matte_width = matte_shape[3];
        let matte: Vec<f32> = pha.iter().copied().collect();

        let hidden = |name: &str| -> Result<Array4<f32>> {
            Ok(outputs[name]
                .try_extract_array::<f32>()?
                .to_owned()
                .into_dimensionality::<Ix4>()?)
        };
        let next = (hidden("r1o")?, hidden("r2o")?, hidden("r3o")?, hidden("r4o")?);
        drop(outputs);

        // Update hidden states for next frame
        self.r1 = Some(next.0);
        self.r2 = Some(next.1);
        self.r3 = Some(next.2);
        self.r4 = Some(next.3);

        // Postprocess: resize to the output geometry
        Preprocessor::postprocess_matte(&matte, matte_width as u32, matte_height as u32, mask)?;
        stopwatch.lap(timing, "post");

        Ok(())
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
