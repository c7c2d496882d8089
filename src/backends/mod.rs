//! Inference backends and segmenter construction
//!
//! - ONNX Runtime backend (GPU acceleration via CUDA or `CoreML`)
//! - Tract backend (pure Rust, no external dependencies)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

use crate::{
    config::InferenceConfig,
    error::{BgFillError, Result},
    models::ModelManager,
    segmentation::SegmenterHandle,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Backend type enumeration for runtime selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl FromStr for BackendType {
    type Err = BgFillError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(BgFillError::invalid_config(format!(
                "Unknown backend '{}'. Expected onnx or tract",
                other
            ))),
        }
    }
}

/// Builds a ready segmenter for a backend type and model
pub trait BackendFactory: Send + Sync {
    /// Create and initialize a segmenter
    ///
    /// # Errors
    /// - Backend not compiled in
    /// - Backend initialization or model loading failures
    fn create_segmenter(
        &self,
        backend_type: BackendType,
        model: &ModelManager,
        config: &InferenceConfig,
    ) -> Result<SegmenterHandle>;

    /// Backend types this factory can build
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends enabled by crate features
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    #[allow(unused_variables)]
    fn create_segmenter(
        &self,
        backend_type: BackendType,
        model: &ModelManager,
        config: &InferenceConfig,
    ) -> Result<SegmenterHandle> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(std::sync::Arc::new(
                crate::segmentation::SegformerSegmenter::new(OnnxBackend::new(), model, config)?,
            )),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(std::sync::Arc::new(
                crate::segmentation::SegformerSegmenter::new(TractBackend::new(), model, config)?,
            )),
            #[allow(unreachable_patterns)]
            other => Err(BgFillError::invalid_config(format!(
                "Backend '{}' is not enabled in this build",
                other
            ))),
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_parsing() {
        assert_eq!("ONNX".parse::<BackendType>().unwrap(), BackendType::Onnx);
        assert_eq!("tract".parse::<BackendType>().unwrap(), BackendType::Tract);
        assert!("tensorrt".parse::<BackendType>().is_err());
        assert_eq!(BackendType::Tract.to_string(), "tract");
    }

    #[test]
    fn test_available_backends_follow_features() {
        let backends = DefaultBackendFactory.available_backends();
        assert_eq!(backends.contains(&BackendType::Onnx), cfg!(feature = "onnx"));
        assert_eq!(backends.contains(&BackendType::Tract), cfg!(feature = "tract"));
    }
}
