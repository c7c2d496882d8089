//! Core types for background replacement operations

use crate::{
    config::OutputFormat,
    error::{BgFillError, Result},
};
use image::RgbaImage;
use std::path::PathBuf;

/// Where the image to process comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// `http://`, `https://` or `file://` URL
    Url(String),
    /// Local file path
    Path(PathBuf),
    /// Raw encoded bytes already in memory
    Bytes(Vec<u8>),
}

impl ImageSource {
    /// Interpret a command-line style argument
    ///
    /// Strings with an `http://`, `https://` or `file://` scheme become
    /// [`ImageSource::Url`], anything else is treated as a path.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let lower = input.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("file://")
        {
            Self::Url(input.to_string())
        } else {
            Self::Path(PathBuf::from(input))
        }
    }

    /// File stem used to derive a default output name
    #[must_use]
    pub fn stem(&self) -> Option<String> {
        match self {
            Self::Path(path) => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned()),
            Self::Url(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                let name = path.rsplit('/').next().unwrap_or(path);
                let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
                (!stem.is_empty()).then(|| stem.to_string())
            },
            Self::Bytes(_) => None,
        }
    }
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{}", url),
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// Owned RGBA8 pixel grid with non-zero dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    image: RgbaImage,
}

impl Bitmap {
    /// Wrap a decoded RGBA image
    ///
    /// # Errors
    /// - `Decode` if either dimension is zero
    pub fn new(image: RgbaImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(BgFillError::decode(format!(
                "image has empty dimensions {}x{}",
                image.width(),
                image.height()
            )));
        }
        Ok(Self { image })
    }

    /// Build from raw RGBA bytes
    ///
    /// # Errors
    /// - `Decode` if the buffer length is not `width * height * 4` or a dimension is zero
    pub fn from_raw(width: u32, height: u32, buffer: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if buffer.len() != expected {
            return Err(BgFillError::decode(format!(
                "RGBA buffer of {} bytes does not match {}x{} (expected {})",
                buffer.len(),
                width,
                height,
                expected
            )));
        }
        let image = RgbaImage::from_raw(width, height, buffer)
            .ok_or_else(|| BgFillError::decode("failed to build RGBA image from raw buffer"))?;
        Self::new(image)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Number of pixels
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    /// Raw RGBA bytes, row-major
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Mutable RGBA bytes, row-major
    pub fn as_raw_mut(&mut self) -> &mut [u8] {
        &mut self.image
    }

    #[must_use]
    pub fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.image.into_raw()
    }
}

/// Per-pixel background likelihood aligned with a bitmap
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    /// One value per pixel, row-major, nominally in `[0, 1]`
    pub data: Vec<f32>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),

    /// Class label reported by the model
    pub label: Option<String>,
}

impl SegmentationMask {
    /// Create a new unlabelled mask
    #[must_use]
    pub fn new(data: Vec<f32>, dimensions: (u32, u32)) -> Self {
        Self {
            data,
            dimensions,
            label: None,
        }
    }

    /// Mask with the same value at every pixel
    #[must_use]
    pub fn filled(dimensions: (u32, u32), value: f32) -> Self {
        let len = dimensions.0 as usize * dimensions.1 as usize;
        Self::new(vec![value; len], dimensions)
    }

    #[must_use]
    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Check the mask lines up with a bitmap of the given size
    ///
    /// # Errors
    /// - `Segmentation` if dimensions or data length disagree
    pub fn ensure_matches(&self, width: u32, height: u32) -> Result<()> {
        let expected = width as usize * height as usize;
        if self.dimensions != (width, height) || self.data.len() != expected {
            return Err(BgFillError::segmentation(format!(
                "mask is {}x{} with {} values but bitmap is {}x{}",
                self.dimensions.0,
                self.dimensions.1,
                self.data.len(),
                width,
                height
            )));
        }
        Ok(())
    }

    /// Fraction of pixels strictly above the threshold
    #[must_use]
    pub fn coverage(&self, threshold: f32) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let above = self.data.iter().filter(|&&v| v > threshold).count();
        above as f32 / self.data.len() as f32
    }
}

/// Compressed output of the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Encoded bytes
    pub data: Vec<u8>,

    /// Format of `data`
    pub format: OutputFormat,

    /// Quality used, for formats that take one
    pub quality: Option<u8>,

    /// Pixel dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl EncodedImage {
    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write the encoded bytes to a file
    ///
    /// # Errors
    /// - File system errors while writing
    pub async fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        tokio::fs::write(path, &self.data)
            .await
            .map_err(|e| BgFillError::file_io_error("write output image", path, &e))
    }
}

/// Per-stage wall clock timings in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingTimings {
    pub load_ms: u64,
    pub resize_ms: u64,
    pub segmentation_ms: u64,
    pub composite_ms: u64,
    pub encode_ms: u64,
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Human readable summary for logs
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "load {}ms, resize {}ms, segment {}ms, composite {}ms, encode {}ms, total {}ms",
            self.load_ms,
            self.resize_ms,
            self.segmentation_ms,
            self.composite_ms,
            self.encode_ms,
            self.total_ms
        )
    }
}

/// Everything one pipeline invocation hands back
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// The encoded image
    pub encoded: EncodedImage,

    /// Dimensions of the decoded source
    pub original_dimensions: (u32, u32),

    /// Dimensions after bounding
    pub working_dimensions: (u32, u32),

    /// Label of the mask used as background, if the model labelled it
    pub selected_mask_label: Option<String>,

    /// Number of masks the segmenter returned
    pub mask_count: usize,

    pub timings: ProcessingTimings,
}

impl PipelineOutput {
    /// Whether the resizer scaled the image down
    #[must_use]
    pub fn was_resized(&self) -> bool {
        self.original_dimensions != self.working_dimensions
    }

    #[must_use]
    pub fn into_encoded(self) -> EncodedImage {
        self.encoded
    }
}
