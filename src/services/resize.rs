//! Size bounding for the working bitmap

use crate::types::Bitmap;
use image::imageops::{self, FilterType};

/// Bounds bitmaps to a maximum side length, preserving aspect ratio
pub struct Resizer;

impl Resizer {
    /// Dimensions a `width`x`height` image takes when bounded to `max_dimension`
    ///
    /// The longer side becomes `max_dimension`; the other side is scaled and
    /// rounded half away from zero, never below one pixel. Images that already
    /// fit are returned unchanged.
    #[must_use]
    pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
        if width <= max_dimension && height <= max_dimension {
            return (width, height);
        }

        let max = f64::from(max_dimension);
        if width > height {
            let scaled = (f64::from(height) * max / f64::from(width)).round();
            (max_dimension, (scaled as u32).max(1))
        } else {
            let scaled = (f64::from(width) * max / f64::from(height)).round();
            ((scaled as u32).max(1), max_dimension)
        }
    }

    /// Bound `bitmap` to `max_dimension` with bilinear resampling
    ///
    /// A bitmap that already fits is moved back untouched.
    #[must_use]
    pub fn bound(bitmap: Bitmap, max_dimension: u32) -> Bitmap {
        let (width, height) = bitmap.dimensions();
        let (target_width, target_height) = Self::target_dimensions(width, height, max_dimension);
        if (target_width, target_height) == (width, height) {
            return bitmap;
        }

        log::debug!(
            "Resizing {}x{} -> {}x{}",
            width,
            height,
            target_width,
            target_height
        );
        let resized = imageops::resize(
            bitmap.as_image(),
            target_width,
            target_height,
            FilterType::Triangle,
        );
        // Targets are at least 1x1, so the wrapped image is never empty.
        Bitmap::new(resized).unwrap_or(bitmap)
    }
}
