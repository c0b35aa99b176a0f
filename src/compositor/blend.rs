use image::{imageops, GrayImage, Rgb, RgbImage};

/// Blend `foreground` over `background` using `mask` as the per-pixel weight
/// (255 keeps the foreground, 0 keeps the background).
///
/// Integer arithmetic with truncation, applied to each channel independently.
///
/// # Panics
/// If the three buffers do not share the same dimensions.
pub fn alpha_blend(background: &RgbImage, foreground: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut out = RgbImage::new(0, 0);
    alpha_blend_into(background, foreground, mask, &mut out);
    out
}

/// [`alpha_blend`] writing into `out`, which is reallocated only when its
/// dimensions differ from the inputs.
pub fn alpha_blend_into(
    background: &RgbImage,
    foreground: &RgbImage,
    mask: &GrayImage,
    out: &mut RgbImage,
) {
    assert_eq!(background.dimensions(), foreground.dimensions());
    assert_eq!(mask.dimensions(), foreground.dimensions());

    let (width, height) = foreground.dimensions();
    if out.dimensions() != (width, height) {
        *out = RgbImage::new(width, height);
    }

    let pixels = out
        .chunks_exact_mut(3)
        .zip(foreground.as_raw().chunks_exact(3))
        .zip(background.as_raw().chunks_exact(3))
        .zip(mask.as_raw().iter());

    for (((out, fg), bg), &weight) in pixels {
        let fg_weight = weight as u32;
        let bg_weight = 255 - fg_weight;
        for channel in 0..3 {
            out[channel] =
                ((fg[channel] as u32 * fg_weight + bg[channel] as u32 * bg_weight) / 255) as u8;
        }
    }
}

/// Mirror transforms applied to the final frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mirror {
    pub horizontal: bool,
    pub vertical: bool,
}

pub fn mirror(frame: &mut RgbImage, flip: Mirror) {
    match (flip.horizontal, flip.vertical) {
        (true, true) => imageops::rotate180_in_place(frame),
        (true, false) => imageops::flip_horizontal_in_place(frame),
        (false, true) => imageops::flip_vertical_in_place(frame),
        (false, false) => {}
    }
}

/// Gaussian blur with a square kernel `strength` pixels wide.
///
/// The sigma follows the usual derivation from an odd kernel size.
pub fn blur(frame: &RgbImage, strength: u32) -> RgbImage {
    imageops::blur(frame, kernel_sigma(strength))
}

fn kernel_sigma(strength: u32) -> f32 {
    0.3 * ((strength as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Grayscale visualization of a mask.
pub fn mask_to_rgb(mask: &GrayImage) -> RgbImage {
    let mut out = RgbImage::new(0, 0);
    mask_to_rgb_into(mask, &mut out);
    out
}

pub fn mask_to_rgb_into(mask: &GrayImage, out: &mut RgbImage) {
    if out.dimensions() != mask.dimensions() {
        *out = RgbImage::new(mask.width(), mask.height());
    }
    for (pixel, &value) in out.chunks_exact_mut(3).zip(mask.as_raw().iter()) {
        pixel.fill(value);
    }
}

const THUMBNAIL_WIDTH: u32 = 160;
/// Background previews must be taller than this to be drawn.
pub const BACKGROUND_THUMBNAIL_MIN_HEIGHT: u32 = 50;
const BORDER: Rgb<u8> = Rgb([255, 255, 255]);

/// Corner used by [`overlay_thumbnail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
}

/// Paste a 160 px wide copy of `thumbnail` into a top corner of `frame`, with
/// a one pixel white frame around it.
///
/// Nothing is drawn unless the scaled thumbnail is taller than `min_height`
/// and leaves enough of the frame visible. Returns whether it was drawn.
pub fn overlay_thumbnail(
    frame: &mut RgbImage,
    thumbnail: &RgbImage,
    corner: Corner,
    min_height: u32,
) -> bool {
    let (frame_width, frame_height) = frame.dimensions();
    let (thumb_width, thumb_height) = thumbnail.dimensions();
    if thumb_width == 0 || thumb_height == 0 || frame_width < THUMBNAIL_WIDTH {
        return false;
    }

    let height = thumb_height * THUMBNAIL_WIDTH / thumb_width;
    let covers_too_much = height >= frame_height * 3 / 4 && thumb_width >= frame_width / 2;
    if height <= min_height || height == 0 || height > frame_height || covers_too_much {
        return false;
    }

    let scaled = imageops::resize(
        thumbnail,
        THUMBNAIL_WIDTH,
        height,
        imageops::FilterType::Triangle,
    );
    let x = match corner {
        Corner::TopLeft => 0,
        Corner::TopRight => frame_width - THUMBNAIL_WIDTH,
    };
    imageops::replace(frame, &scaled, x as i64, 0);

    for dx in 0..THUMBNAIL_WIDTH {
        frame.put_pixel(x + dx, 0, BORDER);
        frame.put_pixel(x + dx, height - 1, BORDER);
    }
    for dy in 0..height {
        frame.put_pixel(x, dy, BORDER);
        frame.put_pixel(x + THUMBNAIL_WIDTH - 1, dy, BORDER);
    }
    true
}
