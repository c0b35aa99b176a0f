use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use maskcam::background::{Background, BackgroundSource};
use maskcam::capture::{CaptureSource, WebcamCapture};
use maskcam::compositor::Geometry;
use maskcam::config::{Args, PipelineConfig};
use maskcam::output::{device_path, V4L2Output};
use maskcam::pipeline::{Pipeline, PipelineSettings};
use maskcam::segmentation::{self, MaskEngine};

fn main() -> ExitCode {
    let args = Args::parse();
    let config = match args.into_config() {
        Ok(config) => config,
        Err(err) => Args::command().error(ErrorKind::ValueValidation, err).exit(),
    };

    // Initialize logging
    let log_level = match config.debug {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(config: PipelineConfig) -> Result<()> {
    tracing::info!("maskcam starting");
    tracing::debug!("{:#?}", config);

    let capture = WebcamCapture::new(
        &config.camera,
        config.capture_geometry.width,
        config.capture_geometry.height,
    )
    .context("Failed to initialize webcam capture")?;

    let (width, height) = capture.resolution();
    let actual = Geometry::new(width, height).context("Camera reported an empty resolution")?;
    let settings = PipelineSettings::resolve(&config, actual, capture.frame_rate());
    tracing::info!("Capture: {}", settings.capture);
    tracing::info!("Output: {}", settings.output);

    let background = config.background.as_deref().and_then(|path| {
        Background::load(path)
            .map(|background| Box::new(background) as Box<dyn BackgroundSource>)
            .map_err(|err| tracing::warn!("Using solid color background: {:#}", err))
            .ok()
    });

    let (model_width, model_height) = (config.model_geometry.width, config.model_geometry.height);
    let model = segmentation::create_model(&config.model, config.threads, (model_width, model_height))
        .context("Failed to load segmentation model")?;
    let engine = MaskEngine::start(model, settings.output)?;

    let output = V4L2Output::new(
        device_path(&config.virtual_device),
        settings.output.width,
        settings.output.height,
    )
    .context("Failed to initialize v4l2loopback output")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl+C handler")?;
    tracing::info!("Press Ctrl+C to stop");

    let mut pipeline = Pipeline::new(capture, output, engine, background, settings);
    pipeline.run(&shutdown)?;
    Ok(())
}
