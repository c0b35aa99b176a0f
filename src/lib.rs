//! Virtual webcam that replaces the background behind a person.
//!
//! Frames are read from a V4L2 camera, segmented by an ONNX model on a worker
//! thread, composited over a replacement background and written as YUYV to a
//! v4l2loopback device.

pub mod background;
pub mod capture;
pub mod compositor;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod segmentation;
pub mod timing;
