//! Output encoding

use crate::{
    config::OutputFormat,
    error::{BgFillError, Result},
    types::{Bitmap, EncodedImage},
};
use image::{codecs::jpeg::JpegEncoder, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// Serializes the final bitmap
pub struct ImageEncoder;

impl ImageEncoder {
    /// Encode `bitmap` in `format`
    ///
    /// JPEG drops the alpha channel and uses `quality` (1-100). PNG keeps
    /// RGBA and ignores `quality`.
    ///
    /// # Errors
    /// - `Encode` if the quality is out of range or the codec fails
    pub fn encode(bitmap: &Bitmap, format: OutputFormat, quality: u8) -> Result<EncodedImage> {
        let data = match format {
            OutputFormat::Jpeg => Self::encode_jpeg(bitmap, quality)?,
            OutputFormat::Png => Self::encode_png(bitmap)?,
        };

        log::debug!(
            "Encoded {}x{} bitmap as {:?} ({} bytes)",
            bitmap.width(),
            bitmap.height(),
            format,
            data.len()
        );

        Ok(EncodedImage {
            data,
            format,
            quality: matches!(format, OutputFormat::Jpeg).then_some(quality),
            dimensions: bitmap.dimensions(),
        })
    }

    fn encode_jpeg(bitmap: &Bitmap, quality: u8) -> Result<Vec<u8>> {
        if quality == 0 || quality > 100 {
            return Err(BgFillError::encode(format!(
                "JPEG quality must be between 1 and 100, got {}",
                quality
            )));
        }

        let source = bitmap.as_image();
        let rgb_image = RgbImage::from_fn(source.width(), source.height(), |x, y| {
            let [r, g, b, _] = source.get_pixel(x, y).0;
            Rgb([r, g, b])
        });

        let mut buffer = Vec::new();
        let mut cursor = Cursor::new(&mut buffer);
        let mut encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
        encoder
            .encode_image(&rgb_image)
            .map_err(|e| BgFillError::encode(format!("JPEG encoding failed: {}", e)))?;
        Ok(buffer)
    }

    fn encode_png(bitmap: &Bitmap) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut cursor = Cursor::new(&mut buffer);
        bitmap
            .as_image()
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| BgFillError::encode(format!("PNG encoding failed: {}", e)))?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(width: u32, height: u32) -> Bitmap {
        let mut buffer = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = if (x + y) % 2 == 0 { 240 } else { 20 };
                buffer.extend_from_slice(&[v, v / 2, 255 - v, 255]);
            }
        }
        Bitmap::from_raw(width, height, buffer).unwrap()
    }

    #[test]
    fn test_jpeg_output_decodes_with_same_dimensions() {
        let encoded = ImageEncoder::encode(&checker(16, 8), OutputFormat::Jpeg, 90).unwrap();
        assert_eq!(encoded.format, OutputFormat::Jpeg);
        assert_eq!(encoded.quality, Some(90));
        assert_eq!(encoded.dimensions, (16, 8));
        assert_eq!(&encoded.data[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&encoded.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_png_is_lossless() {
        let bitmap = checker(5, 3);
        let encoded = ImageEncoder::encode(&bitmap, OutputFormat::Png, 90).unwrap();
        assert_eq!(encoded.quality, None);
        assert_eq!(encoded.mime_type(), "image/png");

        let decoded = image::load_from_memory(&encoded.data).unwrap().to_rgba8();
        assert_eq!(decoded.as_raw(), bitmap.as_raw());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = ImageEncoder::encode(&checker(12, 12), OutputFormat::Jpeg, 90).unwrap();
        let b = ImageEncoder::encode(&checker(12, 12), OutputFormat::Jpeg, 90).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_quality_is_encode_error() {
        let result = ImageEncoder::encode(&checker(2, 2), OutputFormat::Jpeg, 0);
        assert!(matches!(result, Err(BgFillError::Encode(_))));
    }
}
