//! Background replacement CLI tool
//!
//! Processes one or more images and writes `<stem>-black-bg.jpg` next to each
//! input unless told otherwise.

use super::config::{CliConfigBuilder, OutputTarget, ResolvedModel};
use crate::{
    backends::{BackendFactory, DefaultBackendFactory},
    cache::{format_size, ModelCache, CACHE_DIR_ENV, DEFAULT_MODEL_URL},
    download::{validate_model_url, ModelDownloader},
    models::{ModelManager, ModelSource},
    pipeline::BackgroundReplacementPipeline,
    services::{ConsoleProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate},
    tracing_config::{init_cli_tracing, TracingFormat},
    types::{ImageSource, ProcessingTimings},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;

/// Replace image backgrounds with a solid colour
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgfill")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input images: paths, http(s)/file URLs, or "-" for stdin
    #[arg(value_name = "INPUT", required_unless_present_any = &["show_providers", "only_download", "list_models", "clear_cache", "show_cache_dir"])]
    pub input: Vec<String>,

    /// Output file (single input only). Use "-" for stdout [default: <stem>-black-bg.<ext>]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = CliOutputFormat::Jpeg)]
    pub format: CliOutputFormat,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = 90)]
    pub quality: u8,

    /// Longest side of the working image in pixels
    #[arg(long, default_value_t = 1024)]
    pub max_dimension: u32,

    /// Mask values above this are background
    #[arg(long, default_value_t = 0.5)]
    pub threshold: f32,

    /// Background fill colour as #rrggbb
    #[arg(long, default_value = "#000000")]
    pub fill_color: String,

    /// Which mask is the background: first, index:N or label:NAME
    #[arg(long, default_value = "first")]
    pub mask: String,

    /// Model URL, model directory, or cached model id [default: SegFormer ADE20K]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model variant (fp32, quantized, fp16) [default: first available]
    #[arg(long)]
    pub variant: Option<String>,

    /// Inference backend (onnx, tract)
    #[arg(short, long, default_value = "onnx")]
    pub backend: String,

    /// ONNX Runtime execution provider (auto, cpu, cuda, coreml)
    #[arg(short, long, default_value = "auto")]
    pub execution_provider: String,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Enable verbose logging (-v: INFO, -vv: DEBUG, -vvv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON
    #[cfg(feature = "tracing-json")]
    #[arg(long)]
    pub json_logs: bool,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Download the model given by --model (or the default model) and exit
    #[arg(long)]
    pub only_download: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Clear cached models (combine with --model to clear one model)
    #[arg(long)]
    pub clear_cache: bool,

    /// Show the model cache directory and exit
    #[arg(long)]
    pub show_cache_dir: bool,

    /// Use a custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Jpeg,
    Png,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    if cli.show_cache_dir {
        return show_current_cache_dir(&cli);
    }

    if cli.list_models {
        return list_cached_models(&cli);
    }

    if cli.clear_cache {
        return clear_cache_models(&cli);
    }

    if cli.only_download {
        return download_model_only(&cli).await;
    }

    if cli.input.is_empty() {
        anyhow::bail!("At least one input is required");
    }
    if cli.input.len() > 1 && cli.output.is_some() {
        anyhow::bail!("--output can only be used with a single input");
    }

    let config = CliConfigBuilder::pipeline_config(&cli)?;
    let inference = CliConfigBuilder::inference_config(&cli)?;
    let backend_type = CliConfigBuilder::backend_type(&cli)?;
    let cache = CliConfigBuilder::model_cache(&cli)?;
    let model = CliConfigBuilder::resolve_model(&cli);

    ensure_model_available(&cache, &model)
        .await
        .context("Failed to ensure model is available")?;

    let manager = match &model.spec.source {
        ModelSource::External(path) => ModelManager::with_external_model(path, model.spec.variant.clone()),
        ModelSource::Downloaded(model_id) => {
            ModelManager::with_downloaded_model(&cache, model_id, model.spec.variant.clone())
        },
    }
    .context("Failed to load model")?;

    info!(
        "Model: {} ({}), backend: {}, provider: {}",
        manager.name(),
        manager.variant(),
        backend_type,
        inference.execution_provider
    );

    let segmenter = DefaultBackendFactory
        .create_segmenter(backend_type, &manager, &inference)
        .context("Failed to initialize segmenter")?;

    let reporter: Arc<dyn ProgressReporter> = if cli.verbose == 0 {
        Arc::new(SpinnerReporter::default())
    } else {
        Arc::new(ConsoleProgressReporter::new(cli.verbose >= 2))
    };
    let pipeline = BackgroundReplacementPipeline::new(config, segmenter)
        .context("Failed to create pipeline")?
        .with_reporter(reporter);

    let start_time = Instant::now();
    let mut failed = 0usize;
    for input in &cli.input {
        if let Err(e) = process_input(&cli, &pipeline, input).await {
            error!("{}: {:#}", input, e);
            failed += 1;
        }
    }

    info!(
        "Processed {} image(s) in {:.2}s",
        cli.input.len() - failed,
        start_time.elapsed().as_secs_f64()
    );

    if failed > 0 {
        anyhow::bail!("{} of {} input(s) failed", failed, cli.input.len());
    }
    Ok(())
}

fn init_tracing(cli: &Cli) -> Result<()> {
    #[cfg(feature = "tracing-json")]
    let format = if cli.json_logs {
        TracingFormat::Json
    } else {
        TracingFormat::Console
    };
    #[cfg(not(feature = "tracing-json"))]
    let format = TracingFormat::Console;

    init_cli_tracing(cli.verbose, format)
}

/// Download the model when it is missing and we know where it lives
async fn ensure_model_available(cache: &ModelCache, model: &ResolvedModel) -> Result<()> {
    let ModelSource::Downloaded(model_id) = &model.spec.source else {
        return Ok(());
    };
    if cache.is_model_cached(model_id) {
        return Ok(());
    }

    let Some(url) = &model.download_url else {
        anyhow::bail!(
            "Model '{}' not found in cache. Use --only-download --model <URL> to download it, or --list-models to see cached models.",
            model_id
        );
    };

    eprintln!("📦 Model not cached. Downloading {} ...", url);
    let downloader =
        ModelDownloader::with_cache(cache.clone()).context("Failed to create model downloader")?;
    let downloaded_id = downloader
        .download_model(url, true)
        .await
        .with_context(|| format!("Failed to download {}", url))?;

    if downloaded_id != *model_id {
        anyhow::bail!(
            "Downloaded model ID '{}' doesn't match expected '{}'",
            downloaded_id,
            model_id
        );
    }
    eprintln!("✅ Model downloaded successfully!");
    Ok(())
}

async fn process_input(cli: &Cli, pipeline: &BackgroundReplacementPipeline, input: &str) -> Result<()> {
    let source = if input == "-" {
        ImageSource::Bytes(read_stdin().await?)
    } else {
        ImageSource::parse(input)
    };

    let output = pipeline.run(&source).await?;
    let encoded = &output.encoded;
    if output.was_resized() {
        info!(
            "{}: resized {}x{} -> {}x{}",
            input,
            output.original_dimensions.0,
            output.original_dimensions.1,
            output.working_dimensions.0,
            output.working_dimensions.1
        );
    }

    match CliConfigBuilder::output_target(cli, &source, encoded.format) {
        OutputTarget::Stdout => write_stdout(&encoded.data)?,
        OutputTarget::File(path) => {
            encoded
                .save(&path)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if cli.verbose == 0 {
                eprintln!("✅ {} -> {}", input, path.display());
            }
            info!(
                "Saved {} ({}x{}, {})",
                path.display(),
                encoded.dimensions.0,
                encoded.dimensions.1,
                format_size(encoded.len() as u64)
            );
        },
    }
    Ok(())
}

async fn read_stdin() -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut buffer)
        .await
        .context("Failed to read image from stdin")?;
    Ok(buffer)
}

fn write_stdout(data: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(data).context("Failed to write to stdout")?;
    stdout.flush().context("Failed to flush stdout")
}

/// Spinner on stderr, one per invocation
#[derive(Default)]
struct SpinnerReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl SpinnerReporter {
    fn spinner() -> ProgressBar {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }

    fn take(&self) -> Option<ProgressBar> {
        self.bar.lock().ok().and_then(|mut bar| bar.take())
    }
}

impl ProgressReporter for SpinnerReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if let Ok(mut bar) = self.bar.lock() {
            bar.get_or_insert_with(Self::spinner)
                .set_message(format!("{} ({}%)", update.description, update.progress));
        }
    }

    fn report_completion(&self, _timings: &ProcessingTimings) {
        if let Some(bar) = self.take() {
            bar.finish_and_clear();
        }
    }

    fn report_failure(&self, stage: PipelineStage, error: &str) {
        if let Some(bar) = self.take() {
            bar.abandon_with_message(format!(
                "❌ Failed while {}: {}",
                stage.description().to_lowercase(),
                error
            ));
        }
    }
}

fn show_provider_diagnostics() {
    println!("🔍 Backend and Execution Provider Diagnostics");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("💻 System: {} CPU cores detected", cpu_count);

    let available = DefaultBackendFactory.available_backends();
    println!(
        "\n🔧 Compiled backends: {}",
        available
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    #[cfg(feature = "onnx")]
    print_providers("onnx", crate::backends::OnnxBackend::list_providers());
    #[cfg(feature = "tract")]
    print_providers("tract", crate::backends::TractBackend::list_providers());

    println!("\n💡 Usage Examples:");
    println!("  bgfill -b onnx -e auto input.jpg     # Best available ONNX provider (default)");
    println!("  bgfill -b onnx -e cuda input.jpg     # NVIDIA CUDA");
    println!("  bgfill -b onnx -e coreml input.jpg   # Apple CoreML");
    println!("  bgfill -b tract input.jpg            # Pure Rust CPU inference");
}

#[allow(dead_code)]
fn print_providers(backend: &str, providers: Vec<(String, bool, String)>) {
    println!("\n🚀 {} execution providers:", backend);
    for (name, available, description) in providers {
        let status = if available { "✅ Available" } else { "❌ Not Available" };
        println!("  • {}: {} - {}", name, status, description);
    }
}

fn list_cached_models(cli: &Cli) -> Result<()> {
    let cache = CliConfigBuilder::model_cache(cli)?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("📦 Cached Models ({})", cache.cache_dir().display());

    if models.is_empty() {
        println!("No cached models found.");
        println!("\n💡 To download the default model, use:");
        println!("  bgfill --only-download");
        return Ok(());
    }

    for model in models {
        println!("📁 {}", model.model_id);
        println!("  └─ Location: {}", model.path.display());
        if !model.variants.is_empty() {
            println!("  └─ Variants: {}", model.variants.join(", "));
        }
        println!("  └─ Size: {}", format_size(model.size_bytes));
    }

    println!("\n💡 To use a cached model:");
    println!("  bgfill --model MODEL_ID input.jpg");
    Ok(())
}

async fn download_model_only(cli: &Cli) -> Result<()> {
    let model_url = match cli.model.as_deref() {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => url.to_string(),
        Some(_) => anyhow::bail!(
            "--only-download requires a URL, e.g. --model {}",
            DEFAULT_MODEL_URL
        ),
        None => DEFAULT_MODEL_URL.to_string(),
    };
    validate_model_url(&model_url).context("Invalid model URL")?;

    let cache = CliConfigBuilder::model_cache(cli)?;
    let downloader = ModelDownloader::with_cache(cache).context("Failed to create model downloader")?;

    println!("📦 Downloading model from: {}", model_url);
    let model_id = downloader
        .download_model(&model_url, true)
        .await
        .context("Failed to download model")?;

    println!("✅ Model ready: {}", model_id);
    println!(
        "   Cache location: {}",
        downloader.cache().get_model_path(&model_id).display()
    );
    println!("\n💡 To use this model:");
    println!("   bgfill --model {} input.jpg", model_id);
    Ok(())
}

fn clear_cache_models(cli: &Cli) -> Result<()> {
    let cache = CliConfigBuilder::model_cache(cli)?;

    if let Some(model) = &cli.model {
        let model_id = if model.starts_with("http://") || model.starts_with("https://") {
            ModelCache::url_to_model_id(model)
        } else {
            model.clone()
        };

        if cache
            .clear_specific_model(&model_id)
            .with_context(|| format!("Failed to clear model '{}'", model_id))?
        {
            println!("✅ Removed model: {}", model_id);
        } else {
            println!("⚠️  Model '{}' not found in cache", model_id);
            println!("   Use --list-models to see available models");
        }
        return Ok(());
    }

    let removed = cache.clear_all_models().context("Failed to clear cache")?;
    if removed.is_empty() {
        println!("💡 Cache was already empty");
    } else {
        println!("✅ Removed {} model(s):", removed.len());
        for model_id in &removed {
            println!("   • {}", model_id);
        }
    }
    println!("   Cache location: {}", cache.cache_dir().display());
    Ok(())
}

fn show_current_cache_dir(cli: &Cli) -> Result<()> {
    let cache = CliConfigBuilder::model_cache(cli)?;
    println!("📁 Current cache directory:");
    println!("   Path: {}", cache.cache_dir().display());

    let source = if cli.cache_dir.is_some() {
        "--cache-dir argument".to_string()
    } else if std::env::var(CACHE_DIR_ENV).is_ok() {
        format!("{} environment variable", CACHE_DIR_ENV)
    } else {
        "platform cache directory".to_string()
    };
    println!("   Source: {}", source);

    println!("\n💡 To use a custom cache directory:");
    println!("   bgfill --cache-dir /path/to/cache ...");
    println!("   or set {}", CACHE_DIR_ENV);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_defaults() {
        let cli = Cli::try_parse_from(["bgfill", "photo.jpg"]).unwrap();
        assert_eq!(cli.input, vec!["photo.jpg"]);
        assert_eq!(cli.format, CliOutputFormat::Jpeg);
        assert_eq!(cli.quality, 90);
        assert_eq!(cli.max_dimension, 1024);
        assert_eq!(cli.fill_color, "#000000");
        assert_eq!(cli.backend, "onnx");
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_input_required_unless_maintenance_flag() {
        assert!(Cli::try_parse_from(["bgfill"]).is_err());
        assert!(Cli::try_parse_from(["bgfill", "--list-models"]).is_ok());
        assert!(Cli::try_parse_from(["bgfill", "--only-download"]).is_ok());
    }

    #[test]
    fn test_verbosity_counts() {
        let cli = Cli::try_parse_from(["bgfill", "-vvv", "a.png"]).unwrap();
        assert_eq!(cli.verbose, 3);
    }

    #[test]
    fn test_spinner_reporter_resets_between_invocations() {
        let reporter = SpinnerReporter::default();
        reporter.report_progress(ProgressUpdate::new(PipelineStage::Loading, instant::Instant::now()));
        assert!(reporter.bar.lock().unwrap().is_some());
        reporter.report_completion(&ProcessingTimings::default());
        assert!(reporter.bar.lock().unwrap().is_none());
        reporter.report_failure(PipelineStage::Encoding, "boom");
        assert!(reporter.bar.lock().unwrap().is_none());
    }
}
