//! The real-time loop: capture, hand off to the mask engine, composite,
//! pack and write to the virtual camera.

use std::borrow::Cow;
use std::io::{self, Write};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Instant;

use image::{GrayImage, Rgb, RgbImage};
use tracing::{debug, info, trace, warn};

use crate::background::BackgroundSource;
use crate::capture::CaptureSource;
use crate::compositor::{
    alpha_blend_into, blur, compute_crop, crop_and_scale, mask_to_rgb, mask_to_rgb_into, mirror,
    overlay_thumbnail, pack_yuyv_into, CropRegion, Corner, Geometry, Mirror,
    BACKGROUND_THUMBNAIL_MIN_HEIGHT,
};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::{write_frame, FrameSink};
use crate::segmentation::MaskEngine;
use crate::timing::{fps, Stopwatch, TimingSample, TimingStats};

/// Background used when nothing else is available.
const FALLBACK_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Cycles between averaged timing reports.
const STATS_INTERVAL: u64 = 30;

/// Switches that may change while running. Replaced as a whole and read once
/// at the start of each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toggles {
    pub composite: bool,
    pub mirror: Mirror,
    pub show_mask: bool,
    pub overlay: bool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            composite: true,
            mirror: Mirror::default(),
            show_mask: false,
            overlay: false,
        }
    }
}

/// Forward one frame out of every N so the source rate stays under `max_fps`,
/// with N = `ceil(source_fps / max_fps)`, at least 1.
pub fn frame_divisor(source_fps: u32, max_fps: Option<u32>) -> u32 {
    match max_fps {
        Some(max_fps) if max_fps > 0 && source_fps > 0 => source_fps.div_ceil(max_fps).max(1),
        _ => 1,
    }
}

/// Forwards every n-th frame, starting with the first.
#[derive(Debug, Clone)]
pub struct FrameGate {
    divisor: u32,
    skip: u32,
}

impl FrameGate {
    pub fn new(divisor: u32) -> Self {
        let divisor = divisor.max(1);
        Self {
            divisor,
            skip: divisor,
        }
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    pub fn admit(&mut self) -> bool {
        if self.skip < self.divisor {
            self.skip += 1;
            false
        } else {
            self.skip = 1;
            true
        }
    }
}

/// Everything the loop needs to know about geometry and processing, resolved
/// against what the camera actually delivers.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub capture: Geometry,
    pub output: Geometry,
    pub crop: CropRegion,
    pub divisor: u32,
    pub blur_strength: Option<u32>,
    pub send_previous: bool,
    pub toggles: Toggles,
    pub debug_timing: bool,
    pub show_progress: bool,
}

impl PipelineSettings {
    /// Plain settings: no cropping when the aspects match, every frame
    /// forwarded, default toggles.
    pub fn new(capture: Geometry, output: Geometry) -> Self {
        Self {
            capture,
            output,
            crop: compute_crop(capture, output),
            divisor: 1,
            blur_strength: None,
            send_previous: false,
            toggles: Toggles::default(),
            debug_timing: false,
            show_progress: false,
        }
    }

    pub fn resolve(config: &PipelineConfig, capture: Geometry, source_fps: u32) -> Self {
        if capture != config.capture_geometry {
            warn!(
                "Capture device geometry changed from requested {} to {}",
                config.capture_geometry, capture
            );
        }

        let output = config
            .virtual_geometry
            .unwrap_or_else(|| capture.with_even_width());
        if !capture.same_aspect(&output) {
            warn!(
                "Virtual camera aspect ratio ({}) does not match capture device ({}), cropping",
                output, capture
            );
        }

        let divisor = frame_divisor(source_fps, config.max_fps);
        debug!(
            "Camera {} fps (max: {}, effective: {:.2})",
            source_fps,
            config.max_fps.unwrap_or(source_fps),
            source_fps as f64 / divisor as f64
        );

        Self {
            capture,
            output,
            crop: compute_crop(capture, output),
            divisor,
            blur_strength: config.blur_strength,
            send_previous: config.send_previous,
            toggles: config.toggles,
            debug_timing: config.debug_timing,
            show_progress: config.show_progress,
        }
    }
}

/// What happened in one pass of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// The camera delivered an empty frame.
    Empty,
    /// The frame was dropped to respect the frame rate cap.
    Throttled,
    /// A frame was written to the sink.
    Sent,
}

pub struct Pipeline<C, O> {
    capture: C,
    sink: O,
    engine: MaskEngine,
    background: Option<Box<dyn BackgroundSource>>,
    settings: PipelineSettings,
    gate: FrameGate,
    toggles: Toggles,
    controls_tx: Sender<Toggles>,
    controls_rx: Receiver<Toggles>,

    raw: RgbImage,
    frames: [RgbImage; 2],
    current: usize,
    mask: GrayImage,
    fallback: RgbImage,
    composed: RgbImage,
    packed: Vec<u8>,
    background_degraded: bool,

    stats: TimingStats,
    last_sent: Option<Instant>,
    frames_sent: u64,
}

impl<C, O> Pipeline<C, O>
where
    C: CaptureSource,
    O: FrameSink,
{
    pub fn new(
        capture: C,
        sink: O,
        engine: MaskEngine,
        background: Option<Box<dyn BackgroundSource>>,
        settings: PipelineSettings,
    ) -> Self {
        let output = settings.output;
        let (controls_tx, controls_rx) = mpsc::channel();
        Self {
            capture,
            sink,
            engine,
            background,
            gate: FrameGate::new(settings.divisor),
            toggles: settings.toggles,
            controls_tx,
            controls_rx,
            raw: RgbImage::new(0, 0),
            frames: [RgbImage::new(0, 0), RgbImage::new(0, 0)],
            current: 0,
            // all background until the first mask arrives
            mask: GrayImage::new(output.width, output.height),
            fallback: RgbImage::from_pixel(output.width, output.height, FALLBACK_COLOR),
            composed: RgbImage::new(output.width, output.height),
            packed: Vec::new(),
            background_degraded: false,
            stats: TimingStats::new(STATS_INTERVAL),
            last_sent: None,
            frames_sent: 0,
            settings,
        }
    }

    /// Handle for replacing the runtime toggles; picked up at the next cycle.
    pub fn controls(&self) -> Sender<Toggles> {
        self.controls_tx.clone()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Run cycles until `shutdown` is set or a fatal error occurs.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), PipelineError> {
        info!(
            "Starting main pipeline loop: {} -> {}, divisor {}",
            self.settings.capture, self.settings.output, self.settings.divisor
        );

        while !shutdown.load(Ordering::SeqCst) {
            self.run_cycle()?;
        }

        if self.settings.show_progress {
            println!();
        }
        info!("Stopping after {} frames", self.frames_sent);
        Ok(())
    }

    pub fn run_cycle(&mut self) -> Result<Cycle, PipelineError> {
        while let Ok(toggles) = self.controls_rx.try_recv() {
            self.toggles = toggles;
        }
        let toggles = self.toggles;
        let output = self.settings.output;

        let mut sample = TimingSample::default();
        let mut stopwatch = Stopwatch::start();

        if let Err(err) = self.capture.grab() {
            debug!("Frame grab failed, skipping: {:#}", err);
            return Ok(Cycle::Empty);
        }
        stopwatch.lap(&mut sample, "grab");
        self.capture.retrieve(&mut self.raw)?;
        stopwatch.lap(&mut sample, "retr");

        if Geometry::of(&self.raw).is_none() {
            trace!("Skipping empty frame");
            return Ok(Cycle::Empty);
        }
        if !self.gate.admit() {
            return Ok(Cycle::Throttled);
        }

        let current = self.current;
        let other = current ^ 1;
        let scaled = crop_and_scale(mem::take(&mut self.raw), self.settings.crop, output);
        // the slot's old buffer goes back to capture
        self.raw = mem::replace(&mut self.frames[current], scaled);
        if self.settings.send_previous && Geometry::of(&self.frames[other]).is_none() {
            // first frame stands in for the one before it
            self.frames[other] = self.frames[current].clone();
        }

        self.engine.submit(&self.frames[current])?;
        stopwatch.lap(&mut sample, "copy");

        if self.settings.send_previous {
            self.current = other;
        }
        let frame = &self.frames[self.current];

        self.engine.try_read_mask(&mut self.mask)?;
        stopwatch.lap(&mut sample, "mask");

        if toggles.show_mask {
            mask_to_rgb_into(&self.mask, &mut self.composed);
        } else if toggles.composite {
            let provided = match self.background.as_mut().map(|b| b.grab(output)) {
                Some(Ok(image)) => {
                    self.background_degraded = false;
                    Some(image)
                }
                Some(Err(err)) => {
                    if !self.background_degraded {
                        warn!("Background unavailable, using solid color: {:#}", err);
                    }
                    self.background_degraded = true;
                    None
                }
                None => None,
            };
            let background =
                choose_background(provided, &self.fallback, frame, self.settings.blur_strength);
            stopwatch.lap(&mut sample, "prep");
            alpha_blend_into(&background, frame, &self.mask, &mut self.composed);
            stopwatch.lap(&mut sample, "blend");
        } else if self.composed.dimensions() == frame.dimensions() {
            self.composed.copy_from_slice(frame.as_raw());
        } else {
            self.composed = frame.clone();
        }

        let composed = &mut self.composed;
        mirror(composed, toggles.mirror);
        if toggles.overlay {
            if let Some(thumbnail) = self.background.as_deref().and_then(|b| b.thumbnail()) {
                overlay_thumbnail(
                    composed,
                    thumbnail,
                    Corner::TopLeft,
                    BACKGROUND_THUMBNAIL_MIN_HEIGHT,
                );
            }
            overlay_thumbnail(composed, &mask_to_rgb(&self.mask), Corner::TopRight, 0);
        }
        stopwatch.lap(&mut sample, "post");

        pack_yuyv_into(&self.composed, &mut self.packed);
        write_frame(&mut self.sink, &self.packed)?;
        stopwatch.lap(&mut sample, "v4l2");

        self.frames_sent += 1;
        self.report(&sample);
        Ok(Cycle::Sent)
    }

    fn report(&mut self, sample: &TimingSample) {
        let now = Instant::now();
        let main_fps = self.last_sent.map_or(0.0, |last| fps(now - last));
        self.last_sent = Some(now);

        if self.settings.debug_timing {
            let ai = self.engine.last_timing();
            info!(
                "main [{} tot:{:.2}ms FPS: {:5.2}] ai [{} FPS: {:5.2}]",
                sample,
                sample.total().as_secs_f64() * 1000.0,
                main_fps,
                ai,
                ai.get("loop").map_or(0.0, fps)
            );
        } else if let Some(averages) = self.stats.add(sample) {
            info!(
                "Frame {}: {}, total={:.1}ms",
                self.frames_sent,
                averages,
                averages.total().as_secs_f64() * 1000.0
            );
        }

        if self.settings.show_progress {
            print!(".");
            let _ = io::stdout().flush();
        }
    }
}

/// Pick this cycle's background: the provider's frame, else a copy of the
/// input when blurring, else the solid fallback. Only the first two are
/// blurred.
fn choose_background<'a>(
    provided: Option<&'a RgbImage>,
    fallback: &'a RgbImage,
    frame: &RgbImage,
    blur_strength: Option<u32>,
) -> Cow<'a, RgbImage> {
    let source = match (provided, blur_strength) {
        (Some(image), _) => Cow::Borrowed(image),
        (None, Some(_)) => Cow::Owned(frame.clone()),
        (None, None) => return Cow::Borrowed(fallback),
    };
    match blur_strength {
        Some(strength) => Cow::Owned(blur(&source, strength)),
        None => source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{Background, StillBackground};
    use crate::compositor::{rgb_to_yuv, unpack_luma};
    use crate::segmentation::SegmentationModel;
    use anyhow::Result;
    use image::Luma;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    /// Replays a fixed list of frames, repeating the last one. The first
    /// `failed_grabs` grabs fail.
    struct ScriptedCapture {
        frames: VecDeque<RgbImage>,
        last: RgbImage,
        fps: u32,
        failed_grabs: usize,
    }

    impl ScriptedCapture {
        fn new(frames: Vec<RgbImage>, fps: u32) -> Self {
            Self {
                last: frames.last().cloned().unwrap_or_default(),
                frames: frames.into(),
                fps,
                failed_grabs: 0,
            }
        }
    }

    impl CaptureSource for ScriptedCapture {
        fn grab(&mut self) -> Result<()> {
            if self.failed_grabs > 0 {
                self.failed_grabs -= 1;
                anyhow::bail!("select timeout");
            }
            Ok(())
        }

        fn retrieve(&mut self, frame: &mut RgbImage) -> Result<()> {
            *frame = self.frames.pop_front().unwrap_or_else(|| self.last.clone());
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            self.last.dimensions()
        }

        fn frame_rate(&self) -> u32 {
            self.fps
        }
    }

    /// Fixed image that fails on the grabs marked `true`.
    struct FlakyBackground {
        image: RgbImage,
        failures: VecDeque<bool>,
    }

    impl BackgroundSource for FlakyBackground {
        fn grab(&mut self, _geometry: Geometry) -> Result<&RgbImage> {
            if self.failures.pop_front().unwrap_or(false) {
                anyhow::bail!("background decoder gone");
            }
            Ok(&self.image)
        }

        fn thumbnail(&self) -> Option<&RgbImage> {
            Some(&self.image)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        broken: bool,
    }

    impl FrameSink for RecordingSink {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            if self.broken {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.frames.lock().unwrap().push(bytes.to_vec());
            Ok(bytes.len())
        }

        fn resolution(&self) -> (u32, u32) {
            (0, 0)
        }

        fn name(&self) -> &str {
            "recording sink"
        }
    }

    /// Produces a constant mask after a delay.
    struct ConstantModel {
        value: u8,
        delay: Duration,
    }

    impl SegmentationModel for ConstantModel {
        fn segment(
            &mut self,
            _frame: &RgbImage,
            mask: &mut GrayImage,
            _timing: &mut TimingSample,
        ) -> Result<()> {
            thread::sleep(self.delay);
            mask.pixels_mut().for_each(|p| *p = Luma([self.value]));
            Ok(())
        }

        fn input_size(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    const W: u32 = 8;
    const H: u32 = 6;

    fn geo() -> Geometry {
        Geometry::new(W, H).unwrap()
    }

    fn solid(color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(W, H, Rgb(color))
    }

    fn luma_of(color: [u8; 3]) -> u8 {
        rgb_to_yuv(color[0], color[1], color[2]).0
    }

    fn pipeline(
        frames: Vec<RgbImage>,
        fps: u32,
        model: ConstantModel,
        settings: PipelineSettings,
    ) -> (Pipeline<ScriptedCapture, RecordingSink>, RecordingSink) {
        let sink = RecordingSink::default();
        let engine = MaskEngine::start(Box::new(model), settings.output).unwrap();
        let pipeline = Pipeline::new(
            ScriptedCapture::new(frames, fps),
            sink.clone(),
            engine,
            None,
            settings,
        );
        (pipeline, sink)
    }

    fn slow_model(value: u8) -> ConstantModel {
        ConstantModel {
            value,
            delay: Duration::from_millis(300),
        }
    }

    fn last_luma(sink: &RecordingSink) -> Vec<u8> {
        let frames = sink.frames.lock().unwrap();
        unpack_luma(frames.last().unwrap(), W, H)
    }

    #[test]
    fn divisor_rounds_up() {
        assert_eq!(frame_divisor(60, Some(25)), 3);
        assert_eq!(frame_divisor(30, Some(30)), 1);
        assert_eq!(frame_divisor(30, Some(60)), 1);
        assert_eq!(frame_divisor(30, None), 1);
        assert_eq!(frame_divisor(0, Some(25)), 1);
    }

    #[test]
    fn gate_forwards_every_nth_frame() {
        let mut gate = FrameGate::new(frame_divisor(60, Some(25)));
        let admitted: Vec<usize> = (0..9).filter(|_| gate.admit()).collect();
        assert_eq!(admitted, vec![0, 3, 6]);
    }

    #[test]
    fn gate_without_cap_forwards_everything() {
        let mut gate = FrameGate::new(1);
        assert!((0..5).all(|_| gate.admit()));
    }

    #[test]
    fn throttled_cycles_write_nothing() {
        let mut settings = PipelineSettings::new(geo(), geo());
        settings.divisor = frame_divisor(60, Some(25));
        let (mut pipeline, sink) = pipeline(vec![solid([9, 9, 9])], 60, slow_model(255), settings);

        let cycles: Vec<Cycle> = (0..9).map(|_| pipeline.run_cycle().unwrap()).collect();
        let sent = cycles.iter().filter(|c| **c == Cycle::Sent).count();
        assert_eq!(sent, 3);
        assert_eq!(cycles[0], Cycle::Sent);
        assert_eq!(cycles[1], Cycle::Throttled);
        assert_eq!(sink.frames.lock().unwrap().len(), 3);
    }

    #[test]
    fn empty_frame_is_skipped() {
        let frames = vec![RgbImage::new(0, 0), solid([1, 2, 3])];
        let (mut pipeline, sink) =
            pipeline(frames, 30, slow_model(255), PipelineSettings::new(geo(), geo()));

        assert_eq!(pipeline.run_cycle().unwrap(), Cycle::Empty);
        assert!(sink.frames.lock().unwrap().is_empty());
        assert_eq!(pipeline.run_cycle().unwrap(), Cycle::Sent);
        assert_eq!(pipeline.frames_sent(), 1);
    }

    #[test]
    fn fallback_background_until_first_mask() {
        let (mut pipeline, sink) = pipeline(
            vec![solid([200, 10, 10])],
            30,
            slow_model(255),
            PipelineSettings::new(geo(), geo()),
        );
        pipeline.run_cycle().unwrap();
        let green = luma_of([0, 255, 0]);
        assert!(last_luma(&sink).iter().all(|&y| y == green));
    }

    #[test]
    fn foreground_shows_once_mask_arrives() {
        let color = [200, 10, 10];
        let model = ConstantModel {
            value: 255,
            delay: Duration::ZERO,
        };
        let (mut pipeline, sink) =
            pipeline(vec![solid(color)], 30, model, PipelineSettings::new(geo(), geo()));

        let expected = luma_of(color);
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            pipeline.run_cycle().unwrap();
            if last_luma(&sink).iter().all(|&y| y == expected) {
                break;
            }
            assert!(Instant::now() < deadline, "mask never applied");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn passthrough_when_composite_disabled() {
        let color = [30, 60, 90];
        let (mut pipeline, sink) = pipeline(
            vec![solid(color)],
            30,
            slow_model(0),
            PipelineSettings::new(geo(), geo()),
        );
        pipeline
            .controls()
            .send(Toggles {
                composite: false,
                ..Toggles::default()
            })
            .unwrap();
        pipeline.run_cycle().unwrap();
        assert!(last_luma(&sink).iter().all(|&y| y == luma_of(color)));
    }

    #[test]
    fn send_previous_delays_output_by_one_frame() {
        let colors = [[10, 10, 10], [100, 100, 100], [200, 200, 200]];
        let mut settings = PipelineSettings::new(geo(), geo());
        settings.send_previous = true;
        settings.toggles.composite = false;
        let frames = colors.iter().map(|c| solid(*c)).collect();
        let (mut pipeline, sink) = pipeline(frames, 30, slow_model(255), settings);

        for _ in 0..3 {
            pipeline.run_cycle().unwrap();
        }
        let written = sink.frames.lock().unwrap();
        let first_luma = |bytes: &Vec<u8>| unpack_luma(bytes, W, H)[0];
        assert_eq!(first_luma(&written[0]), luma_of(colors[0]));
        assert_eq!(first_luma(&written[1]), luma_of(colors[0]));
        assert_eq!(first_luma(&written[2]), luma_of(colors[1]));
    }

    #[test]
    fn mirror_toggle_flips_output() {
        let frame = RgbImage::from_fn(W, H, |x, _| {
            let v = (x * 30) as u8;
            Rgb([v, v, v])
        });
        let mut settings = PipelineSettings::new(geo(), geo());
        settings.toggles.composite = false;
        settings.toggles.mirror.horizontal = true;
        let (mut pipeline, sink) = pipeline(vec![frame.clone()], 30, slow_model(255), settings);

        pipeline.run_cycle().unwrap();
        let luma = last_luma(&sink);
        let expected: Vec<u8> = (0..H)
            .flat_map(|_| (0..W).rev())
            .map(|x| {
                let p = frame.get_pixel(x, 0);
                rgb_to_yuv(p[0], p[1], p[2]).0
            })
            .collect();
        assert_eq!(luma, expected);
    }

    #[test]
    fn capture_is_cropped_and_scaled_to_output() {
        let capture = Geometry::new(32, 12).unwrap();
        let settings = PipelineSettings::new(capture, geo());
        assert_eq!(settings.crop.width, 16);
        let (mut pipeline, sink) =
            pipeline(vec![RgbImage::new(32, 12)], 30, slow_model(255), settings);
        pipeline.run_cycle().unwrap();
        assert_eq!(sink.frames.lock().unwrap()[0].len(), (W * H * 2) as usize);
    }

    #[test]
    fn provided_background_replaces_fallback() {
        let sink = RecordingSink::default();
        let engine = MaskEngine::start(Box::new(slow_model(255)), geo()).unwrap();
        let still = StillBackground::new(RgbImage::from_pixel(16, 12, Rgb([0, 0, 250]))).unwrap();
        let background: Box<dyn BackgroundSource> = Box::new(Background::Still(still));
        let mut pipeline = Pipeline::new(
            ScriptedCapture::new(vec![solid([200, 10, 10])], 30),
            sink.clone(),
            engine,
            Some(background),
            PipelineSettings::new(geo(), geo()),
        );
        pipeline.run_cycle().unwrap();
        assert!(last_luma(&sink).iter().all(|&y| y == luma_of([0, 0, 250])));
    }

    #[test]
    fn background_failure_falls_back_for_one_frame() {
        let sink = RecordingSink::default();
        let engine = MaskEngine::start(Box::new(slow_model(255)), geo()).unwrap();
        let background = FlakyBackground {
            image: solid([0, 0, 250]),
            failures: VecDeque::from([false, true, false]),
        };
        let mut pipeline = Pipeline::new(
            ScriptedCapture::new(vec![solid([200, 10, 10])], 30),
            sink.clone(),
            engine,
            Some(Box::new(background)),
            PipelineSettings::new(geo(), geo()),
        );

        let mut lumas = Vec::new();
        for _ in 0..3 {
            assert_eq!(pipeline.run_cycle().unwrap(), Cycle::Sent);
            lumas.push(last_luma(&sink)[0]);
        }
        assert_eq!(
            lumas,
            vec![luma_of([0, 0, 250]), luma_of([0, 255, 0]), luma_of([0, 0, 250])]
        );
        assert!(!pipeline.background_degraded);
    }

    #[test]
    fn failed_grab_skips_cycle() {
        let sink = RecordingSink::default();
        let engine = MaskEngine::start(Box::new(slow_model(255)), geo()).unwrap();
        let mut capture = ScriptedCapture::new(vec![solid([1, 2, 3])], 30);
        capture.failed_grabs = 1;
        let mut pipeline = Pipeline::new(
            capture,
            sink.clone(),
            engine,
            None,
            PipelineSettings::new(geo(), geo()),
        );

        assert_eq!(pipeline.run_cycle().unwrap(), Cycle::Empty);
        assert!(sink.frames.lock().unwrap().is_empty());
        assert_eq!(pipeline.run_cycle().unwrap(), Cycle::Sent);
        assert_eq!(pipeline.run_cycle().unwrap(), Cycle::Sent);
        assert_eq!(sink.frames.lock().unwrap().len(), 2);
    }

    #[test]
    fn output_buffer_is_reused_across_cycles() {
        let (mut pipeline, _sink) = pipeline(
            vec![solid([4, 5, 6])],
            30,
            slow_model(255),
            PipelineSettings::new(geo(), geo()),
        );
        pipeline.run_cycle().unwrap();
        let composed = pipeline.composed.as_ptr();
        let packed = pipeline.packed.as_ptr();
        pipeline.run_cycle().unwrap();
        assert_eq!(pipeline.composed.as_ptr(), composed);
        assert_eq!(pipeline.packed.as_ptr(), packed);
    }

    #[test]
    fn sink_failure_stops_pipeline() {
        let mut sink = RecordingSink::default();
        sink.broken = true;
        let engine = MaskEngine::start(Box::new(slow_model(255)), geo()).unwrap();
        let mut pipeline = Pipeline::new(
            ScriptedCapture::new(vec![solid([1, 1, 1])], 30),
            sink,
            engine,
            None,
            PipelineSettings::new(geo(), geo()),
        );
        assert!(matches!(
            pipeline.run_cycle(),
            Err(PipelineError::FatalIo { .. })
        ));
    }

    #[test]
    fn run_returns_when_shutdown_is_set() {
        let (mut pipeline, _sink) = pipeline(
            vec![solid([1, 1, 1])],
            30,
            slow_model(255),
            PipelineSettings::new(geo(), geo()),
        );
        let shutdown = AtomicBool::new(true);
        pipeline.run(&shutdown).unwrap();
        assert_eq!(pipeline.frames_sent(), 0);
    }

    #[test]
    fn blur_applies_to_input_copy_but_not_fallback() {
        let fallback = solid([0, 255, 0]);
        let frame = RgbImage::from_fn(W, H, |x, _| {
            if x < W / 2 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });

        let chosen = choose_background(None, &fallback, &frame, None);
        assert_eq!(*chosen, fallback);

        let chosen = choose_background(None, &fallback, &frame, Some(3));
        assert_ne!(*chosen, frame);
        assert_eq!(chosen.dimensions(), (W, H));

        let provided = solid([5, 5, 5]);
        let chosen = choose_background(Some(&provided), &fallback, &frame, None);
        assert_eq!(*chosen, provided);
    }
}
