//! Command line surface and its validation.

use std::path::PathBuf;

use clap::Parser;

use crate::compositor::{Geometry, Mirror};
use crate::error::ConfigError;
use crate::pipeline::Toggles;

/// Widest aspect ratio accepted for the virtual camera, either orientation.
pub const MAX_ASPECT_RATIO: f64 = 2.726;

/// Blur strength used when `bgblur` is given without a value.
pub const DEFAULT_BLUR_STRENGTH: u32 = 25;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, disable_version_flag = true)]
pub struct Args {
    /// Capture device (/dev/videoN, videoN or index)
    #[arg(short, long, default_value = "/dev/video0")]
    pub camera: String,

    /// Output v4l2loopback device path
    #[arg(short = 'v', long = "virtual", default_value = "/dev/video10")]
    pub virtual_device: String,

    /// Capture geometry as WIDTHxHEIGHT
    #[arg(long, visible_alias = "cg", default_value = "640x480")]
    pub camera_geometry: Geometry,

    /// Virtual camera geometry as WIDTHxHEIGHT (defaults to the capture geometry)
    #[arg(long, visible_alias = "vg")]
    pub virtual_geometry: Option<Geometry>,

    /// Number of inference threads
    #[arg(short, long, default_value_t = 2)]
    pub threads: usize,

    /// Path to segmentation model (ONNX file)
    #[arg(short, long)]
    pub model: PathBuf,

    /// Input geometry of single-input (selfie) models
    #[arg(long, default_value = "256x256")]
    pub model_geometry: Geometry,

    /// Background image or animated GIF (solid green if not given)
    #[arg(short, long)]
    pub background: Option<PathBuf>,

    /// Post-processing step, currently only bgblur[:STRENGTH] with an odd strength
    #[arg(short, long)]
    pub post_processing: Option<String>,

    /// Mirror the output horizontally
    #[arg(short = 'H', long)]
    pub flip_horizontal: bool,

    /// Mirror the output vertically
    #[arg(short = 'V', long)]
    pub flip_vertical: bool,

    /// Limit the frame rate taken from the camera
    #[arg(long, visible_alias = "mf")]
    pub max_fps: Option<u32>,

    /// Send the previous frame, so the mask lines up with the image it was computed from
    #[arg(long, visible_alias = "vd")]
    pub video_delayed: bool,

    /// Show matte visualization (grayscale silhouette) instead of original video
    #[arg(long)]
    pub show_matte: bool,

    /// Draw background and mask previews into the output
    #[arg(long)]
    pub overlay: bool,

    /// Increase debug logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub debug: u8,

    /// Log per-frame timing of every stage
    #[arg(long, visible_alias = "dt")]
    pub debug_timing: bool,

    /// Print a dot for every frame sent
    #[arg(short, long)]
    pub show_progress: bool,

    /// Print version
    #[arg(long, action = clap::ArgAction::Version)]
    pub version: Option<bool>,
}

/// Validated settings the pipeline is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub camera: String,
    pub virtual_device: String,
    pub capture_geometry: Geometry,
    pub virtual_geometry: Option<Geometry>,
    pub threads: usize,
    pub model: PathBuf,
    pub model_geometry: Geometry,
    pub background: Option<PathBuf>,
    pub blur_strength: Option<u32>,
    pub max_fps: Option<u32>,
    pub send_previous: bool,
    pub toggles: Toggles,
    pub debug: u8,
    pub debug_timing: bool,
    pub show_progress: bool,
}

impl Args {
    pub fn into_config(self) -> Result<PipelineConfig, ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Zero("--threads"));
        }
        if self.max_fps == Some(0) {
            return Err(ConfigError::Zero("--max-fps"));
        }

        let virtual_geometry = self
            .virtual_geometry
            .map(|geometry| {
                // odd widths break chroma pairing
                let geometry = geometry.with_even_width();
                check_aspect(geometry).map(|_| geometry)
            })
            .transpose()?;

        let blur_strength = self
            .post_processing
            .as_deref()
            .map(parse_post_processing)
            .transpose()?;

        Ok(PipelineConfig {
            camera: self.camera,
            virtual_device: self.virtual_device,
            capture_geometry: self.camera_geometry,
            virtual_geometry,
            threads: self.threads,
            model: self.model,
            model_geometry: self.model_geometry,
            background: self.background,
            blur_strength,
            max_fps: self.max_fps,
            send_previous: self.video_delayed,
            toggles: Toggles {
                composite: true,
                mirror: Mirror {
                    horizontal: self.flip_horizontal,
                    vertical: self.flip_vertical,
                },
                show_mask: self.show_matte,
                overlay: self.overlay,
            },
            debug: self.debug,
            debug_timing: self.debug_timing,
            show_progress: self.show_progress,
        })
    }
}

fn check_aspect(geometry: Geometry) -> Result<(), ConfigError> {
    let aspect = geometry.aspect();
    if aspect > MAX_ASPECT_RATIO || 1.0 / aspect > MAX_ASPECT_RATIO {
        return Err(ConfigError::AspectRatio {
            width: geometry.width,
            height: geometry.height,
        });
    }
    Ok(())
}

/// Parse `bgblur[:STRENGTH]`, returning the blur strength.
pub fn parse_post_processing(option: &str) -> Result<u32, ConfigError> {
    let (key, value) = option.split_once(':').unwrap_or((option, ""));
    if key != "bgblur" {
        return Err(ConfigError::UnknownFilter(option.to_string()));
    }

    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        tracing::info!(
            "No blur strength supplied, using default strength {}",
            DEFAULT_BLUR_STRENGTH
        );
        return Ok(DEFAULT_BLUR_STRENGTH);
    }

    let strength = value
        .parse::<u32>()
        .map_err(|_| ConfigError::UnknownFilter(option.to_string()))?;
    if strength % 2 == 0 {
        return Err(ConfigError::BlurStrength(strength));
    }
    Ok(strength)
}
