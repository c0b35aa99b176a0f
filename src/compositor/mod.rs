//! Stateless image math for the output path: aspect reconciliation, blending,
//! mirroring and packing into the loopback pixel format.

mod blend;
mod geometry;
mod yuyv;

pub use blend::{
    alpha_blend, alpha_blend_into, blur, mask_to_rgb, mask_to_rgb_into, mirror, overlay_thumbnail,
    Corner, Mirror, BACKGROUND_THUMBNAIL_MIN_HEIGHT,
};
pub use geometry::{compute_crop, crop_and_scale, CropRegion, Geometry};
pub use yuyv::{pack_yuyv, pack_yuyv_into, rgb_to_yuv, unpack_luma, YUYV_BYTES_PER_PIXEL};
