//! Inference backend abstraction

use crate::{config::InferenceConfig, error::Result, models::ModelManager};
use ndarray::Array4;

// Use instant crate for cross-platform time compatibility
use instant::Duration;

/// A loaded model that maps an NCHW input tensor to an output tensor
pub trait InferenceBackend: Send {
    /// Load the model and build the session
    ///
    /// Returns the time spent loading when the backend measures it.
    ///
    /// # Errors
    /// - Model file unreadable or not a valid ONNX graph
    /// - Execution provider setup failures
    fn initialize(&mut self, model: &ModelManager, config: &InferenceConfig) -> Result<Option<Duration>>;

    /// Run the model on one input tensor
    ///
    /// # Errors
    /// - Backend not initialized
    /// - Model inference failures
    /// - Output is not a rank-4 `f32` tensor
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Check if backend is initialized
    fn is_initialized(&self) -> bool;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BgFillError;

    struct ScalingBackend {
        initialized: bool,
        factor: f32,
    }

    impl InferenceBackend for ScalingBackend {
        fn initialize(
            &mut self,
            _model: &ModelManager,
            _config: &InferenceConfig,
        ) -> Result<Option<Duration>> {
            self.initialized = true;
            Ok(None)
        }

        fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
            if !self.initialized {
                return Err(BgFillError::model("not initialized"));
            }
            Ok(input.mapv(|v| v * self.factor))
        }

        fn is_initialized(&self) -> bool {
            self.initialized
        }

        fn name(&self) -> &'static str {
            "scaling"
        }
    }

    #[test]
    fn test_backend_is_object_safe() {
        let mut backend: Box<dyn InferenceBackend> = Box::new(ScalingBackend {
            initialized: false,
            factor: 2.0,
        });
        let input = Array4::<f32>::ones((1, 1, 2, 2));
        assert!(backend.infer(&input).is_err());
        assert!(!backend.is_initialized());
        assert_eq!(backend.name(), "scaling");
    }
}
