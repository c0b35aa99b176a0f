use image::RgbImage;

/// Bytes per pixel of a packed YUYV frame.
pub const YUYV_BYTES_PER_PIXEL: usize = 2;

/// Convert RGB to YUV color space
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

/// Pack an RGB frame as YUV 4:2:2 (YUYV), the layout v4l2loopback consumers
/// expect.
pub fn pack_yuyv(frame: &RgbImage) -> Vec<u8> {
    let mut packed = Vec::new();
    pack_yuyv_into(frame, &mut packed);
    packed
}

/// Same as [`pack_yuyv`], reusing the allocation of `packed`.
///
/// Each pixel keeps its own luma; every horizontal pair shares the average of
/// its two chroma samples. An odd last column is paired with itself.
pub fn pack_yuyv_into(frame: &RgbImage, packed: &mut Vec<u8>) {
    let (width, height) = frame.dimensions();
    let pairs_per_row = (width as usize).div_ceil(2);
    packed.clear();
    if width == 0 {
        return;
    }
    packed.reserve(pairs_per_row * 4 * height as usize);

    for row in frame.as_raw().chunks_exact(width as usize * 3) {
        for pair in row.chunks(6) {
            let (y1, u1, v1) = rgb_to_yuv(pair[0], pair[1], pair[2]);
            let (y2, u2, v2) = if pair.len() == 6 {
                rgb_to_yuv(pair[3], pair[4], pair[5])
            } else {
                (y1, u1, v1)
            };

            let u = ((u1 as u16 + u2 as u16) / 2) as u8;
            let v = ((v1 as u16 + v2 as u16) / 2) as u8;

            // YUYV format: Y0 U Y1 V
            packed.extend_from_slice(&[y1, u, y2, v]);
        }
    }
}

/// Pull the luma plane back out of a packed YUYV frame.
pub fn unpack_luma(packed: &[u8], width: u32, height: u32) -> Vec<u8> {
    let pairs_per_row = (width as usize).div_ceil(2);
    let mut luma = Vec::with_capacity(width as usize * height as usize);
    if width == 0 {
        return luma;
    }
    for row in packed.chunks_exact(pairs_per_row * 4) {
        for (x, pair) in row.chunks_exact(4).enumerate() {
            luma.push(pair[0]);
            if x * 2 + 1 < width as usize {
                luma.push(pair[2]);
            }
        }
    }
    luma
}
