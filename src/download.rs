//! Model downloading from Hugging Face repositories
//!
//! Files are streamed into a hidden staging directory inside the cache and
//! renamed into place only once every required file has arrived, so a
//! failed download never leaves a half-populated model behind.

use crate::cache::ModelCache;
use crate::error::{BgFillError, Result};
use crate::models::ONNX_VARIANTS;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Configuration files every model needs
const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// Download progress display that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    fn new(show_progress: bool) -> Self {
        #[cfg(feature = "cli")]
        if show_progress {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            return Self::Indicatif(pb);
        }
        #[cfg(not(feature = "cli"))]
        let _ = show_progress;
        Self::NoOp
    }

    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => drop(msg),
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => drop(msg),
        }
    }
}

/// Downloads model repositories into the cache
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Downloader for the default cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - Failed to open the model cache
    pub fn new() -> Result<Self> {
        Self::with_cache(ModelCache::new()?)
    }

    /// Downloader for a specific cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgFillError::network_error("Failed to create HTTP client", e))?;
        Ok(Self { client, cache })
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Download a repository unless it is already cached; returns the model id
    ///
    /// # Errors
    /// - URL is not a Hugging Face repository
    /// - Network errors, or no ONNX variant could be fetched
    /// - File system errors while staging or moving files
    pub async fn download_model(&self, url: &str, show_progress: bool) -> Result<String> {
        validate_model_url(url)?;
        let model_id = ModelCache::url_to_model_id(url);

        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {}", model_id);
            return Ok(model_id);
        }

        log::info!("Downloading model {} from {}", model_id, url);
        let staging = self.create_staging_dir(&model_id)?;
        let progress = ProgressIndicator::new(show_progress);

        let result = self.download_model_files(url, &staging, &progress).await;
        if let Err(e) = result {
            if let Err(cleanup_err) = fs::remove_dir_all(&staging) {
                log::warn!("Failed to clean up {}: {}", staging.display(), cleanup_err);
            }
            progress.finish_with_message("Download failed".to_string());
            return Err(e);
        }

        let final_dir = self.cache.get_model_path(&model_id);
        if final_dir.exists() {
            fs::remove_dir_all(&final_dir).map_err(|e| {
                BgFillError::file_io_error("remove stale model directory", &final_dir, &e)
            })?;
        }
        fs::rename(&staging, &final_dir)
            .map_err(|e| BgFillError::file_io_error("move model into cache", &final_dir, &e))?;

        progress.finish_with_message(format!("Downloaded {}", model_id));
        log::info!("Model cached at {}", final_dir.display());
        Ok(model_id)
    }

    fn create_staging_dir(&self, model_id: &str) -> Result<PathBuf> {
        let staging = self.cache.cache_dir().join(format!(".download-{}", model_id));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(|e| {
                BgFillError::file_io_error("remove old staging directory", &staging, &e)
            })?;
        }
        fs::create_dir_all(staging.join("onnx"))
            .map_err(|e| BgFillError::file_io_error("create staging directory", &staging, &e))?;
        Ok(staging)
    }

    async fn download_model_files(
        &self,
        url: &str,
        staging: &Path,
        progress: &ProgressIndicator,
    ) -> Result<()> {
        let raw_base = format!("{}/resolve/main/", url.trim_end_matches('/'));

        for file_name in REQUIRED_FILES {
            progress.set_message(format!("Downloading {}", file_name));
            self.download_file(&format!("{}{}", raw_base, file_name), &staging.join(file_name), progress)
                .await?;
        }

        let mut downloaded_variants = 0;
        for (variant, file_path) in ONNX_VARIANTS {
            progress.set_message(format!("Downloading {} model", variant));
            let target = staging.join(file_path);
            match self
                .download_file(&format!("{}{}", raw_base, file_path), &target, progress)
                .await
            {
                Ok(()) => downloaded_variants += 1,
                Err(e) => {
                    log::debug!("Variant {} unavailable: {}", variant, e);
                    // A failed variant must not leave a truncated file behind
                    let _ = fs::remove_file(&target);
                },
            }
        }

        if downloaded_variants == 0 {
            return Err(BgFillError::network_error(
                "Failed to download any ONNX model variant",
                url,
            ));
        }
        log::info!("Downloaded {} model variant(s)", downloaded_variants);
        Ok(())
    }

    async fn download_file(&self, url: &str, target: &Path, progress: &ProgressIndicator) -> Result<()> {
        log::debug!("Downloading {} -> {}", url, target.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BgFillError::network_error(format!("Failed to download {}", url), e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BgFillError::network_error(
                format!("Failed to download {}", url),
                format!("HTTP {}", status),
            ));
        }

        if let Some(total) = response.content_length() {
            progress.set_length(total);
        }

        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|e| BgFillError::file_io_error("create file", target, &e))?;
        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| BgFillError::network_error("Failed to read download stream", e))?;
            if read == 0 {
                break;
            }
            file.write_all(buffer.get(..read).unwrap_or_default())
                .await
                .map_err(|e| BgFillError::file_io_error("write to file", target, &e))?;
            downloaded += read as u64;
            progress.set_position(downloaded);
        }

        file.flush()
            .await
            .map_err(|e| BgFillError::file_io_error("flush file", target, &e))?;
        log::debug!("Downloaded {} bytes to {}", downloaded, target.display());
        Ok(())
    }
}

/// Check that `url` names a Hugging Face repository (`https://huggingface.co/<owner>/<repo>`)
///
/// # Errors
/// - Empty URL, another host, or a path without owner and repository
pub fn validate_model_url(url: &str) -> Result<()> {
    let Some(repo) = url.strip_prefix(HUGGINGFACE_PREFIX) else {
        return Err(BgFillError::invalid_config(format!(
            "Unsupported model URL '{}'. Only Hugging Face repositories are supported ({}owner/repo)",
            url, HUGGINGFACE_PREFIX
        )));
    };

    let mut parts = repo.trim_end_matches('/').split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => Ok(()),
        _ => Err(BgFillError::invalid_config(format!(
            "Invalid Hugging Face repository URL '{}'. Expected {}owner/repo",
            url, HUGGINGFACE_PREFIX
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/Xenova/segformer-b0-finetuned-ade-512-512").is_ok());
        assert!(validate_model_url("https://huggingface.co/owner/repo/").is_ok());

        assert!(validate_model_url("").is_err());
        assert!(validate_model_url("https://github.com/owner/repo").is_err());
        assert!(validate_model_url("https://huggingface.co/").is_err());
        assert!(validate_model_url("https://huggingface.co/single").is_err());
        assert!(validate_model_url("https://huggingface.co/a/b/c").is_err());
    }

    #[tokio::test]
    async fn test_cached_model_skips_network() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let dir = cache.get_model_path("owner--repo");
        fs::create_dir_all(dir.join("onnx")).unwrap();
        fs::write(dir.join("config.json"), "{}").unwrap();
        fs::write(dir.join("preprocessor_config.json"), "{}").unwrap();

        let downloader = ModelDownloader::with_cache(cache).unwrap();
        let model_id = downloader
            .download_model("https://huggingface.co/owner/repo", false)
            .await
            .unwrap();
        assert_eq!(model_id, "owner--repo");
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_download() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let downloader = ModelDownloader::with_cache(cache).unwrap();
        let err = downloader
            .download_model("https://example.com/model", false)
            .await
            .unwrap_err();
        assert!(matches!(err, BgFillError::InvalidConfig(_)));
    }

    #[test]
    fn test_staging_dir_is_hidden_in_cache() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp.path()).unwrap();
        let downloader = ModelDownloader::with_cache(cache).unwrap();
        let staging = downloader.create_staging_dir("owner--repo").unwrap();
        assert!(staging.join("onnx").is_dir());
        assert!(downloader.cache().scan_cached_models().unwrap().is_empty());
    }
}
