//! Model resolution and metadata
//!
//! Segmentation models are Hugging Face style directories:
//!
//! ```text
//! <model>/
//!   config.json               id2label
//!   preprocessor_config.json  size, image_mean, image_std, rescale_factor
//!   onnx/model.onnx           fp32
//!   onnx/model_quantized.onnx quantized
//!   onnx/model_fp16.onnx      fp16
//! ```

use crate::cache::ModelCache;
use crate::error::{BgFillError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Known ONNX variants and their file location, in preference order
pub const ONNX_VARIANTS: &[(&str, &str)] = &[
    ("fp32", "onnx/model.onnx"),
    ("quantized", "onnx/model_quantized.onnx"),
    ("fp16", "onnx/model_fp16.onnx"),
];

/// Map an ONNX file name inside `onnx/` to its variant name
#[must_use]
pub fn variant_from_file_name(file_name: &str) -> Option<String> {
    let stem = file_name.strip_suffix(".onnx")?;
    match stem {
        "model" => Some("fp32".to_string()),
        _ => stem.strip_prefix("model_").map(str::to_string),
    }
}

/// Where a model comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    /// Model directory on the filesystem
    External(PathBuf),
    /// Model id in the download cache
    Downloaded(String),
}

impl ModelSource {
    /// Short name for logs and spans
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::External(path) => format!(
                "external:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            Self::Downloaded(model_id) => format!("cached:{}", model_id),
        }
    }
}

/// Model source plus optional variant (`fp32`, `quantized`, `fp16`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(ModelCache::default_model_id()),
            variant: None,
        }
    }
}

/// Image preprocessing expected by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Model input size (height, width)
    pub target_size: (u32, u32),
    /// Multiplier applied to 0-255 channel values
    pub rescale_factor: f32,
    /// Per-channel mean (RGB), applied after rescaling
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation (RGB)
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    /// SegFormer ADE20k settings
    fn default() -> Self {
        Self {
            target_size: (512, 512),
            rescale_factor: 1.0 / 255.0,
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
        }
    }
}

impl PreprocessingConfig {
    /// Read from a `preprocessor_config.json` value, defaulting missing fields
    ///
    /// # Errors
    /// - Present fields with the wrong shape
    pub fn from_json(value: &Value) -> Result<Self> {
        let defaults = Self::default();

        let target_size = match value.get("size") {
            None => defaults.target_size,
            Some(Value::Number(n)) => {
                let side = json_u32(n.as_u64(), "size")?;
                (side, side)
            },
            Some(Value::Object(size)) => {
                let height = json_u32(size.get("height").and_then(Value::as_u64), "size.height")?;
                let width = json_u32(size.get("width").and_then(Value::as_u64), "size.width")?;
                (height, width)
            },
            Some(other) => {
                return Err(BgFillError::model(format!(
                    "Unsupported 'size' in preprocessor config: {}",
                    other
                )))
            },
        };

        let do_rescale = value.get("do_rescale").and_then(Value::as_bool).unwrap_or(true);
        let rescale_factor = if do_rescale {
            value
                .get("rescale_factor")
                .and_then(Value::as_f64)
                .map_or(defaults.rescale_factor, |f| f as f32)
        } else {
            1.0
        };

        let do_normalize = value.get("do_normalize").and_then(Value::as_bool).unwrap_or(true);
        let (normalization_mean, normalization_std) = if do_normalize {
            (
                json_triplet(value.get("image_mean"), "image_mean")?
                    .unwrap_or(defaults.normalization_mean),
                json_triplet(value.get("image_std"), "image_std")?
                    .unwrap_or(defaults.normalization_std),
            )
        } else {
            ([0.0; 3], [1.0; 3])
        };

        if normalization_std.iter().any(|&s| s == 0.0) {
            return Err(BgFillError::model("image_std contains a zero entry"));
        }

        Ok(Self {
            target_size,
            rescale_factor,
            normalization_mean,
            normalization_std,
        })
    }
}

fn json_u32(value: Option<u64>, field: &str) -> Result<u32> {
    value
        .and_then(|v| u32::try_from(v).ok())
        .filter(|&v| v > 0)
        .ok_or_else(|| BgFillError::model(format!("Invalid '{}' in preprocessor config", field)))
}

fn json_triplet(value: Option<&Value>, field: &str) -> Result<Option<[f32; 3]>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let invalid = || BgFillError::model(format!("'{}' must be three numbers", field));
    let items = value.as_array().ok_or_else(invalid)?;
    if items.len() != 3 {
        return Err(invalid());
    }
    let mut out = [0.0; 3];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = item.as_f64().ok_or_else(invalid)? as f32;
    }
    Ok(Some(out))
}

/// Class labels indexed by class id, from `config.json`'s `id2label`
///
/// Ids missing from the map get `LABEL_<id>`.
#[must_use]
pub fn parse_labels(config: &Value) -> Vec<String> {
    let Some(map) = config.get("id2label").and_then(Value::as_object) else {
        return Vec::new();
    };

    let entries: Vec<(usize, String)> = map
        .iter()
        .filter_map(|(id, label)| Some((id.parse().ok()?, label.as_str()?.to_string())))
        .collect();
    let count = entries.iter().map(|(id, _)| id + 1).max().unwrap_or(0);

    let mut labels: Vec<String> = (0..count).map(|id| format!("LABEL_{}", id)).collect();
    for (id, label) in entries {
        if let Some(slot) = labels.get_mut(id) {
            *slot = label;
        }
    }
    labels
}

/// Model metadata for logs and the CLI
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub variant: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub num_labels: usize,
}

/// A resolved model directory and variant
#[derive(Debug, Clone)]
pub struct ModelManager {
    name: String,
    model_dir: PathBuf,
    variant: String,
    model_file: PathBuf,
    labels: Vec<String>,
    preprocessing: PreprocessingConfig,
}

impl ModelManager {
    /// Resolve a model spec against the default cache
    ///
    /// # Errors
    /// - Model directory missing or incomplete
    /// - Requested variant not present
    /// - Malformed configuration files
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        match &spec.source {
            ModelSource::External(path) => Self::with_external_model(path, spec.variant.clone()),
            ModelSource::Downloaded(model_id) => {
                let cache = ModelCache::new()?;
                Self::with_downloaded_model(&cache, model_id, spec.variant.clone())
            },
        }
    }

    /// Use a model directory on disk
    ///
    /// # Errors
    /// - Directory missing, or no ONNX variant found
    /// - Malformed configuration files
    pub fn with_external_model<P: AsRef<Path>>(path: P, variant: Option<String>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(BgFillError::model(format!(
                "Model directory does not exist: {}",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self::load(name, path.to_path_buf(), variant)
    }

    /// Use a model from the download cache
    ///
    /// # Errors
    /// - Model not cached (download it first)
    /// - Malformed configuration files
    pub fn with_downloaded_model(
        cache: &ModelCache,
        model_id: &str,
        variant: Option<String>,
    ) -> Result<Self> {
        if !cache.is_model_cached(model_id) {
            return Err(BgFillError::model(format!(
                "Model '{}' is not cached. Download it first (cache: {})",
                model_id,
                cache.cache_dir().display()
            )));
        }
        Self::load(model_id.to_string(), cache.get_model_path(model_id), variant)
    }

    fn load(name: String, model_dir: PathBuf, variant: Option<String>) -> Result<Self> {
        let (variant, model_file) = Self::resolve_variant(&model_dir, variant)?;

        let labels = match read_json(&model_dir.join("config.json"))? {
            Some(config) => parse_labels(&config),
            None => Vec::new(),
        };
        let preprocessing = match read_json(&model_dir.join("preprocessor_config.json"))? {
            Some(config) => PreprocessingConfig::from_json(&config)?,
            None => PreprocessingConfig::default(),
        };

        log::debug!(
            "Resolved model '{}' variant {} ({} labels, input {}x{})",
            name,
            variant,
            labels.len(),
            preprocessing.target_size.1,
            preprocessing.target_size.0
        );

        Ok(Self {
            name,
            model_dir,
            variant,
            model_file,
            labels,
            preprocessing,
        })
    }

    fn resolve_variant(model_dir: &Path, requested: Option<String>) -> Result<(String, PathBuf)> {
        let available: Vec<(&str, PathBuf)> = ONNX_VARIANTS
            .iter()
            .map(|(variant, file)| (*variant, model_dir.join(file)))
            .filter(|(_, path)| path.is_file())
            .collect();

        if let Some(requested) = requested {
            return available
                .into_iter()
                .find(|(variant, _)| *variant == requested)
                .map(|(variant, path)| (variant.to_string(), path))
                .ok_or_else(|| {
                    BgFillError::model(format!(
                        "Variant '{}' not found in {}",
                        requested,
                        model_dir.display()
                    ))
                });
        }

        available
            .into_iter()
            .next()
            .map(|(variant, path)| (variant.to_string(), path))
            .ok_or_else(|| {
                BgFillError::model(format!(
                    "No ONNX model found in {}/onnx",
                    model_dir.display()
                ))
            })
    }

    /// Read the ONNX file
    ///
    /// # Errors
    /// - File I/O errors
    pub fn load_model(&self) -> Result<Vec<u8>> {
        fs::read(&self.model_file)
            .map_err(|e| BgFillError::file_io_error("read model", &self.model_file, &e))
    }

    #[must_use]
    pub fn get_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.name.clone(),
            variant: self.variant.clone(),
            path: self.model_file.clone(),
            size_bytes: fs::metadata(&self.model_file).map(|m| m.len()).unwrap_or(0),
            num_labels: self.labels.len(),
        }
    }

    #[must_use]
    pub fn preprocessing_config(&self) -> &PreprocessingConfig {
        &self.preprocessing
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_file
    }

    #[must_use]
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    #[must_use]
    pub fn variant(&self) -> &str {
        &self.variant
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn read_json(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)
        .map_err(|e| BgFillError::file_io_error("read model config", path, &e))?;
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| BgFillError::model(format!("Invalid JSON in {}: {}", path.display(), e)))
}
