//! Error types shared across the pipeline.

use std::io;

use thiserror::Error;

/// Faults that stop the pipeline.
///
/// Recoverable conditions (an empty capture frame, a background that failed to
/// load for one cycle) are handled where they occur and never reach this type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A device could not be opened, configured or written to.
    #[error("I/O failure on {device}: {source}")]
    FatalIo {
        device: String,
        #[source]
        source: io::Error,
    },

    /// The sink accepted zero bytes, which leaves the frame half written.
    #[error("{device} accepted no bytes with {remaining} bytes of the frame outstanding")]
    StalledWrite { device: String, remaining: usize },

    /// The mask worker could not compute a mask.
    #[error("mask computation failed: {0}")]
    FatalInference(String),

    /// A frame reached the mask engine with the wrong dimensions.
    #[error("frame is {got_width}x{got_height}, engine expects {width}x{height}")]
    GeometryMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },

    /// The camera failed outside of the transient empty-frame case.
    #[error("capture failed: {0}")]
    Capture(#[from] anyhow::Error),
}

/// Problems with the command line, reported before any device is opened.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid geometry '{0}', expected WIDTHxHEIGHT with both values above zero")]
    Geometry(String),

    #[error("virtual geometry {width}x{height} exceeds the 2.726:1 aspect ratio limit")]
    AspectRatio { width: u32, height: u32 },

    #[error("blur strength must be a positive odd number, got {0}")]
    BlurStrength(u32),

    #[error("unknown post-processing option: {0}")]
    UnknownFilter(String),

    #[error("{0} requires a value above zero")]
    Zero(&'static str),
}
