//! Tract inference backend
//!
//! Pure Rust ONNX inference on the CPU, with no native runtime to install.
//! The model input is pinned to the preprocessing size at load time so Tract
//! can fully optimize graphs exported with dynamic height and width.

use crate::config::InferenceConfig;
use crate::error::{BgFillError, Result};
use crate::inference::InferenceBackend;
use crate::models::ModelManager;
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

// Use instant crate for cross-platform time compatibility
use instant::{Duration, Instant};

/// Tract backend
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
}

impl TractBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tract only runs on the CPU
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    fn load_model(model: &ModelManager) -> Result<TractModel> {
        let model_data = model.load_model()?;
        let (height, width) = model.preprocessing_config().target_size;

        log::debug!(
            "Building Tract model '{}' ({}, {:.2} MB) for {}x{} input",
            model.name(),
            model.variant(),
            model_data.len() as f64 / (1024.0 * 1024.0),
            width,
            height
        );

        onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgFillError::model(format!("Failed to load ONNX model: {}", e)))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .map_err(|e| BgFillError::model(format!("Failed to set input shape: {}", e)))?
            .into_optimized()
            .map_err(|e| BgFillError::model(format!("Failed to optimize model: {}", e)))?
            .into_runnable()
            .map_err(|e| BgFillError::model(format!("Failed to create runnable model: {}", e)))
    }
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, model: &ModelManager, _config: &InferenceConfig) -> Result<Option<Duration>> {
        if self.model.is_some() {
            return Ok(None);
        }

        let start = Instant::now();
        self.model = Some(Self::load_model(model)?);
        Ok(Some(start.elapsed()))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BgFillError::model("Tract model not initialized"))?;

        let start = Instant::now();
        let data: Vec<f32> = input.iter().copied().collect();
        let input_tensor = Tensor::from_shape(input.shape(), &data)
            .map_err(|e| BgFillError::model(format!("Failed to build input tensor: {}", e)))?;

        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgFillError::model(format!("Tract inference failed: {}", e)))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgFillError::model("No output tensor found"))?;

        let &[batch, channels, height, width] = output.shape() else {
            return Err(BgFillError::model(format!(
                "Expected 4D output tensor, got {}D",
                output.shape().len()
            )));
        };
        let values = output
            .as_slice::<f32>()
            .map_err(|e| BgFillError::model(format!("Failed to read output tensor: {}", e)))?
            .to_vec();
        let result = Array4::from_shape_vec((batch, channels, height, width), values)
            .map_err(|e| BgFillError::model(format!("Failed to reshape output tensor: {}", e)))?;

        log::debug!(
            "Tract inference {:?} -> {:?} in {}ms",
            input.shape(),
            result.shape(),
            start.elapsed().as_millis()
        );
        Ok(result)
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_uninitialized_backend_rejects_inference() {
        let mut backend = TractBackend::new();
        assert!(!backend.is_initialized());
        let input = Array4::<f32>::zeros((1, 3, 2, 2));
        assert!(matches!(backend.infer(&input), Err(BgFillError::Model(_))));
        assert_eq!(TractBackend::list_providers().len(), 1);
    }

    #[test]
    fn test_invalid_model_bytes_fail_initialization() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("onnx")).unwrap();
        fs::write(dir.path().join("onnx/model.onnx"), b"not an onnx graph").unwrap();
        let manager = ModelManager::with_external_model(dir.path(), None).unwrap();

        let mut backend = TractBackend::new();
        let result = backend.initialize(&manager, &InferenceConfig::default());
        assert!(matches!(result, Err(BgFillError::Model(_))));
        assert!(!backend.is_initialized());
    }
}
