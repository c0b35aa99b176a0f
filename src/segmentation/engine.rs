//! Background mask computation.
//!
//! The real-time loop hands frames to a single worker thread and picks up
//! finished masks without ever waiting for inference. Frames and masks each
//! move through their own pair of long-lived buffers:
//!
//! ```text
//!   submit() ──copy──▶ next frame ◀─swap─▶ current frame ──segment──▶ current mask
//!                                                                         │ swap
//!   try_read_mask() ◀──copy── published mask ◀────────────────────────────┘
//! ```
//!
//! Only the most recent submitted frame is kept; a burst of submits while the
//! worker is busy collapses into one inference. A reader that finds no new
//! mask keeps using the previous one.

use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use image::{GrayImage, RgbImage};
use tracing::{debug, error};

use super::types::SegmentationModel;
use crate::compositor::Geometry;
use crate::error::PipelineError;
use crate::timing::{Stopwatch, TimingSample};

struct FrameHandoff {
    next: RgbImage,
    fresh: bool,
    stopping: bool,
}

struct MaskHandoff {
    published: GrayImage,
    fresh: bool,
    failure: Option<String>,
    timing: TimingSample,
}

struct Shared {
    frames: Mutex<FrameHandoff>,
    frame_ready: Condvar,
    masks: Mutex<MaskHandoff>,
}

/// Owns the inference worker. Dropping the engine stops and joins it.
pub struct MaskEngine {
    shared: Arc<Shared>,
    geometry: Geometry,
    worker: Option<JoinHandle<()>>,
}

impl MaskEngine {
    /// Start the worker thread. `model` moves onto it and is released when the
    /// worker exits.
    pub fn start(
        model: Box<dyn SegmentationModel>,
        geometry: Geometry,
    ) -> Result<Self, PipelineError> {
        let shared = Arc::new(Shared {
            frames: Mutex::new(FrameHandoff {
                next: RgbImage::new(geometry.width, geometry.height),
                fresh: false,
                stopping: false,
            }),
            frame_ready: Condvar::new(),
            masks: Mutex::new(MaskHandoff {
                published: GrayImage::new(geometry.width, geometry.height),
                fresh: false,
                failure: None,
                timing: TimingSample::default(),
            }),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("mask-worker".to_string())
            .spawn(move || run_worker(&worker_shared, model, geometry))
            .map_err(|source| PipelineError::FatalIo {
                device: "mask worker thread".to_string(),
                source,
            })?;

        debug!(%geometry, "Mask worker started");

        Ok(Self {
            shared,
            geometry,
            worker: Some(worker),
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Hand a frame to the worker, replacing any frame it has not picked up
    /// yet. Returns as soon as the frame is copied.
    pub fn submit(&self, frame: &RgbImage) -> Result<(), PipelineError> {
        let (got_width, got_height) = frame.dimensions();
        if (got_width, got_height) != (self.geometry.width, self.geometry.height) {
            return Err(PipelineError::GeometryMismatch {
                width: self.geometry.width,
                height: self.geometry.height,
                got_width,
                got_height,
            });
        }

        let mut frames = lock(&self.shared.frames);
        frames.next.copy_from_slice(frame.as_raw());
        frames.fresh = true;
        self.shared.frame_ready.notify_one();
        Ok(())
    }

    /// Copy the newest mask into `out` if one finished since the last call.
    ///
    /// Returns `Ok(false)` and leaves `out` alone otherwise. Fails once the
    /// worker has given up, since every later mask would be missing.
    pub fn try_read_mask(&self, out: &mut GrayImage) -> Result<bool, PipelineError> {
        let mut masks = lock(&self.shared.masks);
        if let Some(failure) = &masks.failure {
            return Err(PipelineError::FatalInference(failure.clone()));
        }

        if !masks.fresh {
            drop(masks);
            if self.worker.as_ref().is_some_and(JoinHandle::is_finished) {
                return Err(PipelineError::FatalInference(
                    "mask worker exited unexpectedly".to_string(),
                ));
            }
            return Ok(false);
        }

        if out.dimensions() != masks.published.dimensions() {
            *out = GrayImage::new(self.geometry.width, self.geometry.height);
        }
        out.copy_from_slice(masks.published.as_raw());
        masks.fresh = false;
        Ok(true)
    }

    /// Stage durations of the most recent worker pass.
    pub fn last_timing(&self) -> TimingSample {
        lock(&self.shared.masks).timing.clone()
    }
}

impl Drop for MaskEngine {
    fn drop(&mut self) {
        {
            let mut frames = lock(&self.shared.frames);
            frames.stopping = true;
            self.shared.frame_ready.notify_all();
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Mask worker panicked");
            }
        }
        debug!("Mask worker stopped");
    }
}

fn run_worker(shared: &Shared, mut model: Box<dyn SegmentationModel>, geometry: Geometry) {
    let mut current_frame = RgbImage::new(geometry.width, geometry.height);
    let mut current_mask = GrayImage::new(geometry.width, geometry.height);
    let mut timing = TimingSample::default();

    loop {
        let loop_start = Instant::now();
        let mut stopwatch = Stopwatch::start();
        {
            let frames = lock(&shared.frames);
            let mut frames = shared
                .frame_ready
                .wait_while(frames, |f| !f.fresh && !f.stopping)
                .unwrap_or_else(PoisonError::into_inner);
            if frames.stopping {
                break;
            }
            frames.fresh = false;
            mem::swap(&mut frames.next, &mut current_frame);
        }
        stopwatch.lap(&mut timing, "wait");
        let work_start = Instant::now();

        let result = model.segment(&current_frame, &mut current_mask, &mut timing);
        let failure = match result {
            Err(err) => Some(format!("{err:#}")),
            Ok(()) if current_mask.dimensions() != (geometry.width, geometry.height) => Some(format!(
                "model produced a {}x{} mask for {} output",
                current_mask.width(),
                current_mask.height(),
                geometry
            )),
            Ok(()) => None,
        };
        if let Some(failure) = failure {
            error!("Failed to compute mask: {}", failure);
            lock(&shared.masks).failure = Some(failure);
            break;
        }
        timing.record("work", work_start.elapsed());
        timing.record("loop", loop_start.elapsed());

        let mut masks = lock(&shared.masks);
        mem::swap(&mut masks.published, &mut current_mask);
        masks.fresh = true;
        masks.timing.clone_from(&timing);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
