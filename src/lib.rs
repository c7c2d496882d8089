#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # bgfill
//!
//! Replace the background of an image with a solid colour.
//!
//! Each invocation runs five stages in order:
//!
//! 1. **Load**: fetch the source (URL, file or bytes) and decode it to RGBA
//! 2. **Resize**: bound the longest side to 1024 pixels, keeping aspect ratio
//! 3. **Segment**: ask a [`Segmenter`] for per-pixel background masks
//! 4. **Composite**: clear background pixels (mask value above 0.5) and
//!    flatten onto black
//! 5. **Encode**: serialize as JPEG at quality 90
//!
//! Every threshold, size and colour above is a default of [`PipelineConfig`].
//!
//! ## Features
//!
//! - **Pluggable segmentation**: any [`Segmenter`]; `SegFormer` semantic
//!   segmentation models are supported out of the box
//! - **Multiple Backends**: ONNX Runtime (GPU acceleration) and Tract (Pure Rust)
//! - **Model Management**: downloading and caching of models from `HuggingFace`
//! - **CLI Integration**: the `bgfill` binary (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgfill::{
//!     replace_background_with_model, BackendType, ImageSource, InferenceConfig,
//!     ModelDownloader, ModelSource, ModelSpec, PipelineConfig, DEFAULT_MODEL_URL,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! // Download and cache a model (one-time setup)
//! let downloader = ModelDownloader::new()?;
//! let model_id = downloader.download_model(DEFAULT_MODEL_URL, true).await?;
//!
//! let model = ModelSpec {
//!     source: ModelSource::Downloaded(model_id),
//!     variant: None,
//! };
//! let output = replace_background_with_model(
//!     &ImageSource::parse("https://example.com/photo.jpg"),
//!     PipelineConfig::default(),
//!     &model,
//!     BackendType::Onnx,
//!     &InferenceConfig::default(),
//! )
//! .await?;
//! output.encoded.save("photo-black-bg.jpg").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): Command-line interface and progress bars
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod pipeline;
pub mod segmentation;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

use tokio::io::AsyncRead;

// Public API exports
pub use backends::{BackendFactory, BackendType, DefaultBackendFactory};
pub use cache::{format_size, CachedModelInfo, ModelCache, DEFAULT_MODEL_URL};
pub use config::{
    ExecutionProvider, FillColor, InferenceConfig, MaskSelection, OutputFormat, PipelineConfig,
    PipelineConfigBuilder,
};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{BgFillError, Result};
pub use inference::InferenceBackend;
pub use models::{ModelInfo, ModelManager, ModelSource, ModelSpec};
pub use pipeline::BackgroundReplacementPipeline;
pub use segmentation::{Segmenter, SegmenterHandle};
pub use services::{
    Compositor, ConsoleProgressReporter, ImageEncoder, ImageLoader, NoOpProgressReporter,
    PipelineStage, ProgressReporter, ProgressTracker, ProgressUpdate, Resizer,
};
pub use types::{
    Bitmap, EncodedImage, ImageSource, PipelineOutput, ProcessingTimings, SegmentationMask,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};

/// Replace the background of `source` using an existing segmenter
///
/// # Examples
///
/// ```rust,no_run
/// use bgfill::{replace_background, ImageSource, PipelineConfig};
/// use bgfill::segmentation::StaticSegmenter;
/// use std::sync::Arc;
///
/// # async fn example(segmenter: Arc<StaticSegmenter>) -> anyhow::Result<()> {
/// let output = replace_background(
///     &ImageSource::parse("input.png"),
///     PipelineConfig::default(),
///     segmenter,
/// )
/// .await?;
/// println!("{} bytes of {}", output.encoded.len(), output.encoded.mime_type());
/// # Ok(())
/// # }
/// ```
pub async fn replace_background(
    source: &ImageSource,
    config: PipelineConfig,
    segmenter: SegmenterHandle,
) -> Result<PipelineOutput> {
    BackgroundReplacementPipeline::new(config, segmenter)?
        .run(source)
        .await
}

/// Replace the background of `source` with a model-backed segmenter
///
/// The model is loaded for this call only. Build a
/// [`BackgroundReplacementPipeline`] once when processing many images.
pub async fn replace_background_with_model(
    source: &ImageSource,
    config: PipelineConfig,
    model: &ModelSpec,
    backend_type: BackendType,
    inference: &InferenceConfig,
) -> Result<PipelineOutput> {
    let manager = ModelManager::from_spec(model)?;
    let segmenter = DefaultBackendFactory.create_segmenter(backend_type, &manager, inference)?;
    replace_background(source, config, segmenter).await
}

/// Replace the background of an image read from an async stream
///
/// # Examples
///
/// ```rust,no_run
/// use bgfill::{replace_background_from_reader, PipelineConfig, SegmenterHandle};
/// use tokio::fs::File;
///
/// # async fn example(segmenter: SegmenterHandle) -> anyhow::Result<()> {
/// let file = File::open("large_image.jpg").await?;
/// let output = replace_background_from_reader(file, PipelineConfig::default(), segmenter).await?;
/// output.encoded.save("large_image-black-bg.jpg").await?;
/// # Ok(())
/// # }
/// ```
pub async fn replace_background_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    config: PipelineConfig,
    segmenter: SegmenterHandle,
) -> Result<PipelineOutput> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer)
        .await
        .map_err(|e| BgFillError::decode(format!("Failed to read from stream: {}", e)))?;

    BackgroundReplacementPipeline::new(config, segmenter)?
        .process_bytes(buffer)
        .await
}
