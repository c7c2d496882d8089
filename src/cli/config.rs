//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliOutputFormat};
use crate::{
    backends::BackendType,
    cache::{ModelCache, DEFAULT_MODEL_URL},
    config::{ExecutionProvider, InferenceConfig, OutputFormat, PipelineConfig},
    models::{ModelSource, ModelSpec},
    types::ImageSource,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Where a processed image goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OutputTarget {
    Stdout,
    File(PathBuf),
}

/// A model argument after interpretation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedModel {
    pub(crate) spec: ModelSpec,
    /// Repository to fetch when the model is not cached yet
    pub(crate) download_url: Option<String>,
}

/// Convert CLI arguments to library configuration
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn pipeline_config(cli: &Cli) -> Result<PipelineConfig> {
        let output_format = match cli.format {
            CliOutputFormat::Jpeg => OutputFormat::Jpeg,
            CliOutputFormat::Png => OutputFormat::Png,
        };

        PipelineConfig::builder()
            .max_dimension(cli.max_dimension)
            .mask_threshold(cli.threshold)
            .fill_color(cli.fill_color.parse().context("Invalid --fill-color")?)
            .mask_selection(cli.mask.parse().context("Invalid --mask")?)
            .output_format(output_format)
            .jpeg_quality(cli.quality)
            .build()
            .context("Invalid configuration")
    }

    pub(crate) fn inference_config(cli: &Cli) -> Result<InferenceConfig> {
        let provider: ExecutionProvider = cli
            .execution_provider
            .parse()
            .context("Invalid --execution-provider")?;
        Ok(InferenceConfig::default()
            .with_execution_provider(provider)
            .with_threads(cli.threads))
    }

    pub(crate) fn backend_type(cli: &Cli) -> Result<BackendType> {
        cli.backend.parse().context("Invalid --backend")
    }

    pub(crate) fn model_cache(cli: &Cli) -> Result<ModelCache> {
        match &cli.cache_dir {
            Some(dir) => ModelCache::with_custom_cache_dir(dir)
                .context("Failed to open custom cache directory"),
            None => ModelCache::new().context("Failed to open model cache"),
        }
    }

    /// Interpret `--model`: a Hugging Face URL, a model directory, or a cached model id
    pub(crate) fn resolve_model(cli: &Cli) -> ResolvedModel {
        let (source, download_url) = match cli.model.as_deref() {
            None => (
                ModelSource::Downloaded(ModelCache::default_model_id()),
                Some(DEFAULT_MODEL_URL.to_string()),
            ),
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => (
                ModelSource::Downloaded(ModelCache::url_to_model_id(url)),
                Some(url.to_string()),
            ),
            Some(path) if Path::new(path).is_dir() => {
                (ModelSource::External(PathBuf::from(path)), None)
            },
            Some(model_id) => (ModelSource::Downloaded(model_id.to_string()), None),
        };

        ResolvedModel {
            spec: ModelSpec {
                source,
                variant: cli.variant.clone(),
            },
            download_url,
        }
    }

    /// Output location for one input
    ///
    /// Without `--output`, file and URL inputs produce `<stem>-black-bg.<ext>`
    /// (next to the input file, or in the working directory for URLs) and
    /// stdin goes to stdout.
    pub(crate) fn output_target(
        cli: &Cli,
        source: &ImageSource,
        format: OutputFormat,
    ) -> OutputTarget {
        match cli.output.as_deref() {
            Some("-") => return OutputTarget::Stdout,
            Some(path) => return OutputTarget::File(PathBuf::from(path)),
            None => {},
        }

        let file_name = |stem: &str| format!("{}-black-bg.{}", stem, format.extension());
        match source {
            ImageSource::Bytes(_) => OutputTarget::Stdout,
            ImageSource::Path(path) => {
                let stem = source.stem().unwrap_or_else(|| "output".to_string());
                OutputTarget::File(path.with_file_name(file_name(&stem)))
            },
            ImageSource::Url(_) => {
                let stem = source.stem().unwrap_or_else(|| "output".to_string());
                OutputTarget::File(PathBuf::from(file_name(&stem)))
            },
        }
    }
}
