//! ONNX Runtime inference backend
//!
//! Runs segmentation models through ONNX Runtime with CPU, CUDA or `CoreML`
//! execution providers.

use crate::config::{ExecutionProvider, InferenceConfig};
use crate::error::{BgFillError, Result};
use crate::inference::InferenceBackend;
use crate::models::ModelManager;
use instant::{Duration, Instant};
use ndarray::{Array4, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;

/// ONNX Runtime backend
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
}

impl OnnxBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Execution providers with availability and a short description
    ///
    /// ```rust
    /// use bgfill::backends::OnnxBackend;
    ///
    /// for (name, available, description) in OnnxBackend::list_providers() {
    ///     println!("{}: {} - {}", name, available, description);
    /// }
    /// ```
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
                    .unwrap_or(false),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                    .unwrap_or(false),
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Providers to register for the requested choice, skipping unavailable ones
    fn execution_providers(requested: ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
        let cuda = || {
            let provider = CUDAExecutionProvider::default();
            if OrtExecutionProvider::is_available(&provider).unwrap_or(false) {
                Some(provider.build())
            } else {
                None
            }
        };
        let coreml = || {
            let provider = CoreMLExecutionProvider::default();
            if OrtExecutionProvider::is_available(&provider).unwrap_or(false) {
                Some(provider.with_subgraphs(true).build())
            } else {
                None
            }
        };

        let providers: Vec<ExecutionProviderDispatch> = match requested {
            ExecutionProvider::Cpu => Vec::new(),
            ExecutionProvider::Cuda => cuda().into_iter().collect(),
            ExecutionProvider::CoreMl => coreml().into_iter().collect(),
            ExecutionProvider::Auto => cuda().into_iter().chain(coreml()).collect(),
        };

        if providers.is_empty() && requested != ExecutionProvider::Cpu {
            log::warn!(
                "Execution provider '{}' not available, falling back to CPU",
                requested
            );
        }
        providers
    }

    fn thread_counts(config: &InferenceConfig) -> (usize, usize) {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        let intra = if config.intra_threads > 0 {
            config.intra_threads
        } else {
            cores
        };
        let inter = if config.inter_threads > 0 {
            config.inter_threads
        } else {
            (cores / 4).max(1)
        };
        (intra, inter)
    }

    fn build_session(model: &ModelManager, config: &InferenceConfig) -> Result<Session> {
        let model_data = model.load_model()?;
        let providers = Self::execution_providers(config.execution_provider);
        let (intra_threads, inter_threads) = Self::thread_counts(config);

        let mut builder = Session::builder()
            .map_err(|e| session_error("Failed to create session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| session_error("Failed to set optimization level", e))?;

        if !providers.is_empty() {
            builder = builder
                .with_execution_providers(providers)
                .map_err(|e| session_error("Failed to set execution providers", e))?;
        }

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| session_error("Failed to set intra threads", e))?
            .with_inter_threads(inter_threads)
            .map_err(|e| session_error("Failed to set inter threads", e))?
            .commit_from_memory(&model_data)
            .map_err(|e| session_error("Failed to create session from model data", e))?;

        log::debug!(
            "ONNX session ready: provider {}, {} intra / {} inter threads, model {:.2} MB",
            config.execution_provider,
            intra_threads,
            inter_threads,
            model_data.len() as f64 / (1024.0 * 1024.0)
        );
        Ok(session)
    }
}

fn session_error<E: std::fmt::Display>(step: &str, error: E) -> BgFillError {
    BgFillError::model(format!("{}: {}", step, error))
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, model: &ModelManager, config: &InferenceConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }

        let start = Instant::now();
        self.session = Some(Self::build_session(model, config)?);
        Ok(Some(start.elapsed()))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BgFillError::model("ONNX session not initialized"))?;

        let start = Instant::now();
        let input_value = Value::from_array(input.clone())
            .map_err(|e| BgFillError::model(format!("Failed to convert input tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgFillError::model(format!("ONNX inference failed: {}", e)))?;

        // Positional access: the first output holds the logits
        let first_key = outputs
            .keys()
            .next()
            .map(str::to_string)
            .ok_or_else(|| BgFillError::model("No output tensors found"))?;
        let output = outputs
            .get(&first_key)
            .ok_or_else(|| BgFillError::model("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| BgFillError::model(format!("Failed to extract output tensor: {}", e)))?
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|e| BgFillError::model(format!("Expected 4D output tensor: {}", e)))?;

        log::debug!(
            "ONNX inference {:?} -> {:?} in {:.2}ms",
            input.shape(),
            output.shape(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(output)
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_backend_rejects_inference() {
        let mut backend = OnnxBackend::new();
        assert!(!backend.is_initialized());
        assert_eq!(backend.name(), "onnx");
        let input = Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(matches!(backend.infer(&input), Err(BgFillError::Model(_))));
    }

    #[test]
    fn test_thread_counts() {
        let config = InferenceConfig::default().with_threads(6);
        assert_eq!(OnnxBackend::thread_counts(&config), (6, 3));

        let (intra, inter) = OnnxBackend::thread_counts(&InferenceConfig::default());
        assert!(intra >= 1);
        assert!(inter >= 1);
    }

    #[test]
    fn test_cpu_requests_no_accelerators() {
        assert!(OnnxBackend::execution_providers(ExecutionProvider::Cpu).is_empty());
        let providers = OnnxBackend::list_providers();
        assert_eq!(providers[0].0, "CPU");
        assert!(providers[0].1);
    }
}
