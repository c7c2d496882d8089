//! Configuration types for background replacement operations

use crate::error::{BgFillError, Result};
use crate::types::SegmentationMask;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Largest side of the working bitmap
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Mask values strictly above this are background
pub const DEFAULT_MASK_THRESHOLD: f32 = 0.5;

/// JPEG quality of the final image
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl FromStr for ExecutionProvider {
    type Err = BgFillError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(BgFillError::invalid_config(format!(
                "Unknown execution provider '{}'. Expected one of: auto, cpu, cuda, coreml",
                other
            ))),
        }
    }
}

/// Output image format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputFormat {
    /// Lossy JPEG (the reference output)
    #[default]
    Jpeg,
    /// Lossless PNG
    Png,
}

impl OutputFormat {
    /// File extension without the dot
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    /// MIME type of the encoded bytes
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// Opaque colour painted behind the foreground
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FillColor(pub [u8; 3]);

impl FillColor {
    pub const BLACK: Self = Self([0, 0, 0]);
    pub const WHITE: Self = Self([255, 255, 255]);

    #[must_use]
    pub fn rgb(self) -> [u8; 3] {
        self.0
    }
}

impl Default for FillColor {
    fn default() -> Self {
        Self::BLACK
    }
}

impl std::fmt::Display for FillColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{:02x}{:02x}{:02x}", r, g, b)
    }
}

impl FromStr for FillColor {
    type Err = BgFillError;

    /// Parse `#rrggbb` or `rrggbb`
    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BgFillError::invalid_config(format!(
                "Invalid fill colour '{}'. Expected #rrggbb",
                s
            )));
        }
        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|part| u8::from_str_radix(part, 16).ok())
                .ok_or_else(|| BgFillError::invalid_config(format!("Invalid fill colour '{}'", s)))
        };
        Ok(Self([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
    }
}

/// Which of the returned masks marks the background
///
/// Semantic segmentation models return one mask per class they found, and
/// nothing tells us which class is "background" for an arbitrary image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaskSelection {
    /// The first mask returned
    #[default]
    First,
    /// The mask at this position
    Index(usize),
    /// The first mask whose label matches (ASCII case-insensitive)
    Label(String),
}

impl MaskSelection {
    /// Pick a mask according to this policy
    ///
    /// # Errors
    /// - `Segmentation` when the list is empty or the policy matches nothing
    pub fn select<'a>(&self, masks: &'a [SegmentationMask]) -> Result<&'a SegmentationMask> {
        if masks.is_empty() {
            return Err(BgFillError::segmentation(
                "segmentation model returned no masks",
            ));
        }

        match self {
            Self::First => masks
                .first()
                .ok_or_else(|| BgFillError::segmentation("segmentation model returned no masks")),
            Self::Index(index) => masks.get(*index).ok_or_else(|| {
                BgFillError::segmentation(format!(
                    "mask index {} out of range ({} masks returned)",
                    index,
                    masks.len()
                ))
            }),
            Self::Label(label) => masks
                .iter()
                .find(|mask| {
                    mask.label
                        .as_deref()
                        .is_some_and(|candidate| candidate.eq_ignore_ascii_case(label))
                })
                .ok_or_else(|| {
                    let available: Vec<&str> =
                        masks.iter().filter_map(|m| m.label.as_deref()).collect();
                    BgFillError::segmentation(format!(
                        "no mask labelled '{}' (available: {})",
                        label,
                        available.join(", ")
                    ))
                }),
        }
    }
}

impl std::fmt::Display for MaskSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::First => write!(f, "first"),
            Self::Index(index) => write!(f, "index:{}", index),
            Self::Label(label) => write!(f, "label:{}", label),
        }
    }
}

impl FromStr for MaskSelection {
    type Err = BgFillError;

    /// Parse `first`, `index:N` or `label:NAME`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("first") {
            return Ok(Self::First);
        }
        if let Some(index) = s.strip_prefix("index:") {
            return index.trim().parse().map(Self::Index).map_err(|_| {
                BgFillError::invalid_config(format!("Invalid mask index '{}'", index))
            });
        }
        if let Some(label) = s.strip_prefix("label:") {
            let label = label.trim();
            if label.is_empty() {
                return Err(BgFillError::invalid_config("Mask label cannot be empty"));
            }
            return Ok(Self::Label(label.to_string()));
        }
        Err(BgFillError::invalid_config(format!(
            "Invalid mask selection '{}'. Expected first, index:N or label:NAME",
            s
        )))
    }
}

/// Configuration for one background replacement pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Largest allowed side of the working bitmap
    pub max_dimension: u32,

    /// Mask values strictly above this are treated as background
    pub mask_threshold: f32,

    /// Colour painted behind the foreground
    pub fill_color: FillColor,

    /// Which returned mask is the background
    pub mask_selection: MaskSelection,

    /// Output format
    pub output_format: OutputFormat,

    /// JPEG quality (1-100, only used for JPEG output)
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            mask_threshold: DEFAULT_MASK_THRESHOLD,
            fill_color: FillColor::default(),
            mask_selection: MaskSelection::default(),
            output_format: OutputFormat::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bgfill::{FillColor, OutputFormat, PipelineConfig};
    ///
    /// let config = PipelineConfig::builder()
    ///     .output_format(OutputFormat::Png)
    ///     .fill_color(FillColor::WHITE)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.max_dimension, 1024);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Quality recorded on the encoded image, if the format uses one
    #[must_use]
    pub fn quality(&self) -> Option<u8> {
        match self.output_format {
            OutputFormat::Jpeg => Some(self.jpeg_quality),
            OutputFormat::Png => None,
        }
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `max_dimension` is zero
    /// - `mask_threshold` is not a finite value in `[0, 1]`
    /// - `jpeg_quality` is outside `1..=100`
    pub fn validate(&self) -> Result<()> {
        if self.max_dimension == 0 {
            return Err(BgFillError::config_value_error(
                "max dimension",
                self.max_dimension,
                ">= 1",
                Some(DEFAULT_MAX_DIMENSION),
            ));
        }

        if !self.mask_threshold.is_finite() || !(0.0..=1.0).contains(&self.mask_threshold) {
            return Err(BgFillError::config_value_error(
                "mask threshold",
                self.mask_threshold,
                "0.0-1.0",
                Some(DEFAULT_MASK_THRESHOLD),
            ));
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(BgFillError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "1-100",
                Some(DEFAULT_JPEG_QUALITY),
            ));
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.config.max_dimension = max_dimension;
        self
    }

    #[must_use]
    pub fn mask_threshold(mut self, threshold: f32) -> Self {
        self.config.mask_threshold = threshold;
        self
    }

    #[must_use]
    pub fn fill_color(mut self, color: FillColor) -> Self {
        self.config.fill_color = color;
        self
    }

    #[must_use]
    pub fn mask_selection(mut self, selection: MaskSelection) -> Self {
        self.config.mask_selection = selection;
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Inference session settings shared by the ONNX and Tract backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InferenceConfig {
    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
}

impl InferenceConfig {
    /// Set both intra and inter threads (`threads / 2` inter, minimum 1; 0 = auto)
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads;
        self.inter_threads = if threads == 0 { 0 } else { (threads / 2).max(1) };
        self
    }

    #[must_use]
    pub fn with_execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.execution_provider = provider;
        self
    }
}
