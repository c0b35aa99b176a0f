mod engine;
mod preprocess;
mod rvm;
mod selfie;
pub mod types;

pub use engine::MaskEngine;
pub use preprocess::{Preprocessor, TensorLayout};
pub use rvm::RobustVideoMatting;
pub use selfie::SelfieSegmenter;
pub use types::{Matte, SegmentationModel};

use anyhow::{Context, Result};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;

/// Load an ONNX segmentation model
///
/// Models with a single input are treated as selfie segmenters fed at
/// `selfie_input` (width, height); anything else is assumed to be RVM with its
/// recurrent state inputs.
pub fn create_model(
    model_path: &Path,
    threads: usize,
    selfie_input: (u32, u32),
) -> Result<Box<dyn SegmentationModel>> {
    tracing::info!("Loading segmentation model from {}", model_path.display());

    // Configure ONNX Runtime with CUDA execution provider, falling back to CPU
    let session = Session::builder()?
        .with_execution_providers([CUDAExecutionProvider::default().build()])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads)?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load model from {}", model_path.display()))?;

    let inputs = session.inputs.len();
    tracing::debug!("Model has {} inputs, {} outputs", inputs, session.outputs.len());

    let model: Box<dyn SegmentationModel> = if inputs == 1 {
        let (width, height) = selfie_input;
        tracing::info!("Using selfie segmentation at {}x{}", width, height);
        Box::new(SelfieSegmenter::new(session, width, height))
    } else {
        tracing::info!("Using RobustVideoMatting");
        Box::new(RobustVideoMatting::new(session))
    };

    let (width, height) = model.input_size();
    tracing::info!("Segmentation model loaded successfully, input {}x{}", width, height);
    Ok(model)
}
