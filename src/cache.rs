//! Local cache of downloaded segmentation models
//!
//! Models live in one directory per model id under an XDG-style cache root.
//! A directory counts as a cached model once it holds the Hugging Face
//! configuration files and an `onnx/` folder.

use crate::error::{BgFillError, Result};
use crate::models::variant_from_file_name;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the cache root
pub const CACHE_DIR_ENV: &str = "BGFILL_CACHE_DIR";

/// Repository of the segmentation model used when none is given
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/Xenova/segformer-b0-finetuned-ade-512-512";

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Summary of one cached model directory
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (directory name)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// ONNX variants found under `onnx/`, sorted
    pub variants: Vec<String>,
    /// Total size of the directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the default cache, creating it if needed
    ///
    /// Uses `$BGFILL_CACHE_DIR/models` when set, otherwise
    /// `<user cache dir>/bgfill/models`.
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::default_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Open a cache rooted at `root` (models go in `root/models`)
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_custom_cache_dir(root: &Path) -> Result<Self> {
        let cache_dir = root.join("models");
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(root) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(root).join("models"));
        }

        dirs::cache_dir()
            .map(|dir| dir.join("bgfill").join("models"))
            .ok_or_else(|| {
                BgFillError::invalid_config(format!(
                    "Failed to determine cache directory. Set {} to choose one.",
                    CACHE_DIR_ENV
                ))
            })
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| BgFillError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    /// Derive a filesystem-safe model id from a repository URL
    ///
    /// ```
    /// use bgfill::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/Xenova/segformer-b0-finetuned-ade-512-512");
    /// assert_eq!(id, "Xenova--segformer-b0-finetuned-ade-512-512");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        if let Some(repo) = url.strip_prefix(HUGGINGFACE_PREFIX) {
            return repo.trim_end_matches('/').replace('/', "--");
        }

        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(url.as_bytes());
        let hex = format!("{:x}", digest);
        format!("url-{}", hex.get(..12).unwrap_or(&hex))
    }

    /// Id of the default segmentation model
    #[must_use]
    pub fn default_model_id() -> String {
        Self::url_to_model_id(DEFAULT_MODEL_URL)
    }

    /// Whether `model_id` has a complete directory in the cache
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        Self::is_model_directory(&self.get_model_path(model_id))
    }

    /// Directory a model id maps to (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// List cached models, sorted by id
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models: Vec<CachedModelInfo> = self
            .model_directories()?
            .into_iter()
            .filter(|path| Self::is_model_directory(path))
            .filter_map(|path| Self::describe(&path))
            .collect();

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// Remove directories that are missing required model files
    ///
    /// # Errors
    /// - Failed to read or remove cache directories
    pub fn cleanup_invalid_models(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for path in self.model_directories()? {
            if Self::is_model_directory(&path) {
                continue;
            }
            log::warn!("Removing incomplete model directory: {}", path.display());
            fs::remove_dir_all(&path)
                .map_err(|e| BgFillError::file_io_error("remove model directory", &path, &e))?;
            removed.push(Self::dir_name(&path));
        }
        Ok(removed)
    }

    /// Remove one cached model
    ///
    /// Returns `false` when the model was not cached.
    ///
    /// # Errors
    /// - Failed to remove the model directory
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        let path = self.get_model_path(model_id);
        if !path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {}", model_id);
        fs::remove_dir_all(&path)
            .map_err(|e| BgFillError::file_io_error("remove cached model", &path, &e))?;
        Ok(true)
    }

    /// Remove every cached model
    ///
    /// # Errors
    /// - Failed to read or remove cache directories
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for path in self.model_directories()? {
            log::info!("Removing cached model: {}", path.display());
            fs::remove_dir_all(&path)
                .map_err(|e| BgFillError::file_io_error("remove cached model", &path, &e))?;
            removed.push(Self::dir_name(&path));
        }
        Ok(removed)
    }

    fn model_directories(&self) -> Result<Vec<PathBuf>> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| BgFillError::file_io_error("read cache directory", &self.cache_dir, &e))?;

        let mut dirs = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| BgFillError::file_io_error("read cache entry", &self.cache_dir, &e))?
                .path();
            // Skip in-flight downloads
            if path.is_dir() && !Self::dir_name(&path).starts_with('.') {
                dirs.push(path);
            }
        }
        Ok(dirs)
    }

    fn is_model_directory(path: &Path) -> bool {
        path.join("config.json").is_file()
            && path.join("preprocessor_config.json").is_file()
            && path.join("onnx").is_dir()
    }

    fn describe(path: &Path) -> Option<CachedModelInfo> {
        let mut variants: Vec<String> = fs::read_dir(path.join("onnx"))
            .ok()?
            .flatten()
            .filter_map(|entry| variant_from_file_name(&entry.file_name().to_string_lossy()))
            .collect();
        variants.sort();

        Some(CachedModelInfo {
            model_id: Self::dir_name(path),
            path: path.to_path_buf(),
            variants,
            size_bytes: directory_size(path).unwrap_or(0),
        })
    }

    fn dir_name(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn directory_size(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        total += if path.is_dir() {
            directory_size(&path)?
        } else {
            entry.metadata()?.len()
        };
    }
    Ok(total)
}

/// Format a byte count for display
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    let label = UNITS.get(unit).copied().unwrap_or("B");
    if unit == 0 {
        format!("{} {}", bytes, label)
    } else {
        format!("{:.1} {}", size, label)
    }
}
