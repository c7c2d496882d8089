//! Background masking and flattening

use crate::{
    config::FillColor,
    error::Result,
    types::{Bitmap, SegmentationMask},
};

/// Masks background pixels and paints them with a solid colour
pub struct Compositor;

impl Compositor {
    /// Zero the alpha of every pixel whose mask value is above `threshold`
    ///
    /// Pixels at or below the threshold are left untouched. NaN never
    /// compares above, so it keeps the pixel.
    ///
    /// # Errors
    /// - `Segmentation` if the mask does not line up with the bitmap
    pub fn apply_mask(mut bitmap: Bitmap, mask: &SegmentationMask, threshold: f32) -> Result<Bitmap> {
        mask.ensure_matches(bitmap.width(), bitmap.height())?;

        for (pixel, &value) in bitmap.as_raw_mut().chunks_exact_mut(4).zip(&mask.data) {
            if value > threshold {
                if let Some(alpha) = pixel.get_mut(3) {
                    *alpha = 0;
                }
            }
        }
        Ok(bitmap)
    }

    /// Draw `bitmap` over an opaque `fill` (source-over) and make it opaque
    #[must_use]
    pub fn flatten(mut bitmap: Bitmap, fill: FillColor) -> Bitmap {
        let fill = fill.rgb();
        for pixel in bitmap.as_raw_mut().chunks_exact_mut(4) {
            if let [r, g, b, a] = pixel {
                let alpha = u32::from(*a);
                let blend = |src: u8, bg: u8| -> u8 {
                    ((u32::from(src) * alpha + u32::from(bg) * (255 - alpha) + 127) / 255) as u8
                };
                *r = blend(*r, fill[0]);
                *g = blend(*g, fill[1]);
                *b = blend(*b, fill[2]);
                *a = 255;
            }
        }
        bitmap
    }

    /// [`Compositor::apply_mask`] followed by [`Compositor::flatten`]
    ///
    /// # Errors
    /// - `Segmentation` if the mask does not line up with the bitmap
    pub fn composite(
        bitmap: Bitmap,
        mask: &SegmentationMask,
        threshold: f32,
        fill: FillColor,
    ) -> Result<Bitmap> {
        let masked = Self::apply_mask(bitmap, mask, threshold)?;
        Ok(Self::flatten(masked, fill))
    }
}
