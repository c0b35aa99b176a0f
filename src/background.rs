//! Replacement backgrounds.
//!
//! A background is either a still image or a looping animation (GIF), picked
//! when the file is loaded. Frames are scaled to whatever geometry the
//! pipeline asks for and cached per geometry.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use image::codecs::gif::GifDecoder;
use image::{imageops, AnimationDecoder, ImageFormat, RgbImage};

use crate::compositor::{compute_crop, crop_and_scale, Geometry};

/// Frames shorter than this are shown for this long, as browsers do.
const MIN_FRAME_DELAY: Duration = Duration::from_millis(20);

/// Source of replacement backgrounds for the compositor.
pub trait BackgroundSource {
    /// The background scaled to `geometry`. An error keeps the solid fallback
    /// for the current frame only.
    fn grab(&mut self, geometry: Geometry) -> Result<&RgbImage>;

    /// Unscaled current image, for preview overlays.
    fn thumbnail(&self) -> Option<&RgbImage>;
}

#[derive(Debug)]
pub enum Background {
    Still(StillBackground),
    Animated(AnimatedBackground),
}

impl Background {
    /// Load a background from `path`, choosing the variant from its contents.
    pub fn load(path: &Path) -> Result<Self> {
        let format = ImageFormat::from_path(path)
            .with_context(|| format!("Unknown background format: {}", path.display()))?;

        let background = if format == ImageFormat::Gif {
            let reader = BufReader::new(
                File::open(path)
                    .with_context(|| format!("Failed to open background {}", path.display()))?,
            );
            let decoder = GifDecoder::new(reader)
                .with_context(|| format!("Failed to decode background {}", path.display()))?;
            let frames = decoder
                .into_frames()
                .collect_frames()
                .with_context(|| format!("Failed to decode background {}", path.display()))?
                .into_iter()
                .map(|frame| {
                    let delay = Duration::from(frame.delay()).max(MIN_FRAME_DELAY);
                    let image = image::DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8();
                    (image, delay)
                })
                .collect();
            Self::Animated(AnimatedBackground::new(frames)?)
        } else {
            let image = image::open(path)
                .with_context(|| format!("Failed to load background {}", path.display()))?
                .to_rgb8();
            Self::Still(StillBackground::new(image)?)
        };

        tracing::info!(
            "Loaded {} background from {}",
            match background {
                Background::Still(_) => "still",
                Background::Animated(_) => "animated",
            },
            path.display()
        );
        Ok(background)
    }
}

impl BackgroundSource for Background {
    /// Scaled and cropped to keep the image's aspect ratio.
    fn grab(&mut self, geometry: Geometry) -> Result<&RgbImage> {
        match self {
            Background::Still(still) => Ok(still.grab(geometry)),
            Background::Animated(animated) => animated.grab(geometry, Instant::now()),
        }
    }

    fn thumbnail(&self) -> Option<&RgbImage> {
        match self {
            Background::Still(still) => Some(&still.source),
            Background::Animated(animated) => animated.frames.get(animated.shown).map(|(f, _)| f),
        }
    }
}

#[derive(Debug)]
pub struct StillBackground {
    source: RgbImage,
    scaled: Option<RgbImage>,
}

impl StillBackground {
    pub fn new(source: RgbImage) -> Result<Self> {
        if Geometry::of(&source).is_none() {
            bail!("background image is empty");
        }
        Ok(Self {
            source,
            scaled: None,
        })
    }

    fn grab(&mut self, geometry: Geometry) -> &RgbImage {
        let source = &self.source;
        let scaled = self
            .scaled
            .take()
            .filter(|s| s.dimensions() == (geometry.width, geometry.height))
            .unwrap_or_else(|| fit(source, geometry));
        self.scaled.insert(scaled)
    }
}

#[derive(Debug)]
pub struct AnimatedBackground {
    frames: Vec<(RgbImage, Duration)>,
    period: Duration,
    started: Option<Instant>,
    shown: usize,
    scaled: Option<(usize, RgbImage)>,
}

impl AnimatedBackground {
    pub fn new(frames: Vec<(RgbImage, Duration)>) -> Result<Self> {
        if frames.is_empty() || frames.iter().any(|(f, _)| Geometry::of(f).is_none()) {
            bail!("animated background has no usable frames");
        }
        let period = frames.iter().map(|(_, delay)| *delay).sum();
        Ok(Self {
            frames,
            period,
            started: None,
            shown: 0,
            scaled: None,
        })
    }

    /// Index of the frame visible `elapsed` after the animation started.
    fn frame_at(&self, elapsed: Duration) -> usize {
        let mut offset = Duration::from_nanos((elapsed.as_nanos() % self.period.as_nanos()) as u64);
        for (index, (_, delay)) in self.frames.iter().enumerate() {
            if offset < *delay {
                return index;
            }
            offset -= *delay;
        }
        self.frames.len() - 1
    }

    fn grab(&mut self, geometry: Geometry, now: Instant) -> Result<&RgbImage> {
        let started = *self.started.get_or_insert(now);
        self.shown = self.frame_at(now.saturating_duration_since(started));

        let reuse = matches!(
            &self.scaled,
            Some((index, image)) if *index == self.shown
                && image.dimensions() == (geometry.width, geometry.height)
        );
        if !reuse {
            let (frame, _) = &self.frames[self.shown];
            self.scaled = Some((self.shown, fit(frame, geometry)));
        }

        match &self.scaled {
            Some((_, image)) => Ok(image),
            None => bail!("animated background frame missing"),
        }
    }
}

fn fit(source: &RgbImage, geometry: Geometry) -> RgbImage {
    match Geometry::of(source) {
        Some(source_geometry) => {
            let crop = compute_crop(source_geometry, geometry);
            crop_and_scale(source.clone(), crop, geometry)
        }
        None => imageops::resize(
            source,
            geometry.width,
            geometry.height,
            imageops::FilterType::Triangle,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn geo(width: u32, height: u32) -> Geometry {
        Geometry::new(width, height).unwrap()
    }

    #[test]
    fn still_background_is_fitted_and_cached() {
        let source = RgbImage::from_pixel(320, 180, Rgb([1, 2, 3]));
        let mut background = Background::Still(StillBackground::new(source).unwrap());

        let frame = background.grab(geo(64, 48)).unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
        assert_eq!(frame.get_pixel(10, 10), &Rgb([1, 2, 3]));

        let frame = background.grab(geo(32, 32)).unwrap();
        assert_eq!(frame.dimensions(), (32, 32));
        assert_eq!(background.thumbnail().unwrap().dimensions(), (320, 180));
    }

    #[test]
    fn empty_still_is_rejected() {
        assert!(StillBackground::new(RgbImage::new(0, 0)).is_err());
    }

    #[test]
    fn animation_loops_over_frame_delays() {
        let frames = vec![
            (RgbImage::from_pixel(4, 4, Rgb([10, 0, 0])), Duration::from_millis(100)),
            (RgbImage::from_pixel(4, 4, Rgb([20, 0, 0])), Duration::from_millis(50)),
        ];
        let animated = AnimatedBackground::new(frames).unwrap();
        assert_eq!(animated.frame_at(Duration::ZERO), 0);
        assert_eq!(animated.frame_at(Duration::from_millis(99)), 0);
        assert_eq!(animated.frame_at(Duration::from_millis(100)), 1);
        assert_eq!(animated.frame_at(Duration::from_millis(149)), 1);
        assert_eq!(animated.frame_at(Duration::from_millis(150)), 0);
        assert_eq!(animated.frame_at(Duration::from_millis(260)), 1);
    }

    #[test]
    fn animation_grab_follows_clock() {
        let frames = vec![
            (RgbImage::from_pixel(4, 4, Rgb([10, 0, 0])), Duration::from_millis(100)),
            (RgbImage::from_pixel(4, 4, Rgb([20, 0, 0])), Duration::from_millis(100)),
        ];
        let mut animated = AnimatedBackground::new(frames).unwrap();
        let start = Instant::now();

        let first = animated.grab(geo(8, 8), start).unwrap();
        assert_eq!(first.dimensions(), (8, 8));
        assert_eq!(first.get_pixel(0, 0)[0], 10);

        let second = animated.grab(geo(8, 8), start + Duration::from_millis(120)).unwrap();
        assert_eq!(second.get_pixel(0, 0)[0], 20);
    }

    #[test]
    fn animation_without_frames_is_rejected() {
        assert!(AnimatedBackground::new(Vec::new()).is_err());
    }

    #[test]
    fn missing_file_fails_to_load() {
        assert!(Background::load(Path::new("/nonexistent/background.png")).is_err());
    }
}
