//! Semantic segmentation with SegFormer-style models
//!
//! The model sees a fixed-size normalized RGB tensor and returns per-class
//! logits at reduced resolution. Logits are upsampled back to the working
//! size, each pixel takes its highest-scoring class, and every class present
//! becomes one binary mask.

use super::Segmenter;
use crate::{
    config::InferenceConfig,
    error::{BgFillError, Result},
    inference::InferenceBackend,
    models::{ModelManager, PreprocessingConfig},
    types::{Bitmap, SegmentationMask},
};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use ndarray::Array4;
use std::sync::Mutex;
use tracing::{debug_span, instrument};

/// Segmenter running a semantic segmentation model on an inference backend
pub struct SegformerSegmenter<B: InferenceBackend> {
    backend: Mutex<B>,
    preprocessing: PreprocessingConfig,
    labels: Vec<String>,
    name: String,
}

impl<B: InferenceBackend> SegformerSegmenter<B> {
    /// Initialize `backend` with the model and wrap it
    ///
    /// # Errors
    /// - Backend initialization failures
    pub fn new(mut backend: B, model: &ModelManager, config: &InferenceConfig) -> Result<Self> {
        if !backend.is_initialized() {
            if let Some(load_time) = backend.initialize(model, config)? {
                log::info!(
                    "Loaded model '{}' ({}) on {} in {:.2}s",
                    model.name(),
                    model.variant(),
                    backend.name(),
                    load_time.as_secs_f64()
                );
            }
        }

        Ok(Self::from_parts(
            backend,
            model.preprocessing_config().clone(),
            model.labels().to_vec(),
        ))
    }

    /// Wrap a ready backend with explicit preprocessing and labels
    pub fn from_parts(backend: B, preprocessing: PreprocessingConfig, labels: Vec<String>) -> Self {
        let name = format!("segformer/{}", backend.name());
        Self {
            backend: Mutex::new(backend),
            preprocessing,
            labels,
            name,
        }
    }

    /// Resize to the model input size and normalize into an NCHW tensor
    #[must_use]
    pub fn preprocess(&self, bitmap: &Bitmap) -> Array4<f32> {
        let (target_height, target_width) = self.preprocessing.target_size;
        let source = bitmap.as_image();
        let rgb = RgbImage::from_fn(source.width(), source.height(), |x, y| {
            let [r, g, b, _] = source.get_pixel(x, y).0;
            Rgb([r, g, b])
        });
        let resized = imageops::resize(&rgb, target_width, target_height, FilterType::Triangle);

        let rescale = self.preprocessing.rescale_factor;
        let mean = self.preprocessing.normalization_mean;
        let std = self.preprocessing.normalization_std;

        let mut tensor = Array4::<f32>::zeros((1, 3, target_height as usize, target_width as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for (channel, &value) in pixel.0.iter().enumerate() {
                tensor[[0, channel, y as usize, x as usize]] =
                    (f32::from(value) * rescale - mean[channel]) / std[channel];
            }
        }
        tensor
    }

    /// Turn logits into one binary mask per class present
    ///
    /// Masks are ordered by ascending class id, so the first mask is the
    /// lowest-numbered class present in the image.
    ///
    /// # Errors
    /// - `Segmentation` if the logits are not `[1, classes, h, w]` with non-zero sizes
    pub fn postprocess(
        &self,
        logits: &Array4<f32>,
        width: u32,
        height: u32,
    ) -> Result<Vec<SegmentationMask>> {
        let class_map = upsampled_argmax(logits, width, height)?;

        let mut present = vec![false; logits.shape()[1]];
        for &class in &class_map {
            if let Some(flag) = present.get_mut(class) {
                *flag = true;
            }
        }

        Ok(present
            .iter()
            .enumerate()
            .filter(|(_, &found)| found)
            .map(|(class, _)| {
                let data = class_map
                    .iter()
                    .map(|&c| if c == class { 1.0 } else { 0.0 })
                    .collect();
                SegmentationMask::new(data, (width, height)).with_label(self.label_for(class))
            })
            .collect())
    }

    fn label_for(&self, class: usize) -> String {
        self.labels
            .get(class)
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{}", class))
    }
}

impl<B: InferenceBackend> Segmenter for SegformerSegmenter<B> {
    #[instrument(skip(self, bitmap), fields(segmenter = %self.name, width = bitmap.width(), height = bitmap.height()))]
    fn segment(&self, bitmap: &Bitmap) -> Result<Vec<SegmentationMask>> {
        let input = {
            let _span = debug_span!("preprocess").entered();
            self.preprocess(bitmap)
        };

        let logits = {
            let _span = debug_span!("inference").entered();
            let mut backend = self
                .backend
                .lock()
                .map_err(|_| BgFillError::segmentation("inference backend lock poisoned"))?;
            backend
                .infer(&input)
                .map_err(|e| BgFillError::segmentation(format!("{} inference failed: {}", self.name, e)))?
        };

        let _span = debug_span!("postprocess").entered();
        let masks = self.postprocess(&logits, bitmap.width(), bitmap.height())?;
        log::debug!(
            "Segmentation found {} classes: {}",
            masks.len(),
            masks
                .iter()
                .filter_map(|m| m.label.as_deref())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(masks)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Source sample for one output coordinate: (low index, high index, weight of high)
type Sample = (usize, usize, f32);

/// Bilinear sample positions with half-pixel centres
fn sample_positions(input_len: usize, output_len: usize) -> Vec<Sample> {
    let scale = input_len as f32 / output_len as f32;
    let last = input_len.saturating_sub(1);
    (0..output_len)
        .map(|o| {
            let src = ((o as f32 + 0.5) * scale - 0.5).max(0.0);
            let low = (src.floor() as usize).min(last);
            let high = (low + 1).min(last);
            (low, high, src - low as f32)
        })
        .collect()
}

#[allow(clippy::indexing_slicing)]
fn upsampled_argmax(logits: &Array4<f32>, width: u32, height: u32) -> Result<Vec<usize>> {
    let &[batch, classes, in_height, in_width] = logits.shape() else {
        return Err(BgFillError::segmentation("logits must be rank 4"));
    };
    if batch != 1 || classes == 0 || in_height == 0 || in_width == 0 {
        return Err(BgFillError::segmentation(format!(
            "unexpected logits shape {:?}",
            logits.shape()
        )));
    }

    let columns = sample_positions(in_width, width as usize);
    let rows = sample_positions(in_height, height as usize);

    let mut class_map = Vec::with_capacity(columns.len() * rows.len());
    for &(y0, y1, fy) in &rows {
        for &(x0, x1, fx) in &columns {
            let mut best_class = 0;
            let mut best_score = f32::NEG_INFINITY;
            for class in 0..classes {
                let top = logits[[0, class, y0, x0]]
                    + (logits[[0, class, y0, x1]] - logits[[0, class, y0, x0]]) * fx;
                let bottom = logits[[0, class, y1, x0]]
                    + (logits[[0, class, y1, x1]] - logits[[0, class, y1, x0]]) * fx;
                let score = top + (bottom - top) * fy;
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }
            class_map.push(best_class);
        }
    }
    Ok(class_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use instant::Duration;
    use std::sync::Arc;

    struct FixedLogits {
        logits: Array4<f32>,
        seen_shapes: Arc<Mutex<Vec<Vec<usize>>>>,
    }

    impl FixedLogits {
        fn new(classes: usize, height: usize, width: usize, values: Vec<f32>) -> Self {
            Self {
                logits: Array4::from_shape_vec((1, classes, height, width), values).unwrap(),
                seen_shapes: Arc::default(),
            }
        }
    }

    impl InferenceBackend for FixedLogits {
        fn initialize(
            &mut self,
            _model: &ModelManager,
            _config: &InferenceConfig,
        ) -> Result<Option<Duration>> {
            Ok(None)
        }

        fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
            self.seen_shapes.lock().unwrap().push(input.shape().to_vec());
            Ok(self.logits.clone())
        }

        fn is_initialized(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct FailingBackend;

    impl InferenceBackend for FailingBackend {
        fn initialize(
            &mut self,
            _model: &ModelManager,
            _config: &InferenceConfig,
        ) -> Result<Option<Duration>> {
            Ok(None)
        }

        fn infer(&mut self, _input: &Array4<f32>) -> Result<Array4<f32>> {
            Err(BgFillError::model("session exploded"))
        }

        fn is_initialized(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn labels() -> Vec<String> {
        vec!["wall".to_string(), "person".to_string()]
    }

    #[test]
    fn test_sample_positions_half_pixel() {
        let samples = sample_positions(2, 4);
        assert_eq!(samples[0], (0, 1, 0.0));
        assert_eq!(samples[1], (0, 1, 0.25));
        assert_eq!(samples[2], (0, 1, 0.75));
        assert_eq!(samples[3].0, 1);
        assert_eq!(samples[3].1, 1);

        let identity = sample_positions(3, 3);
        for (i, &(low, _, weight)) in identity.iter().enumerate() {
            assert_eq!(low, i);
            assert!(weight.abs() < 1e-6);
        }
    }

    #[test]
    fn test_preprocess_normalizes_nchw() {
        let backend = FixedLogits::new(1, 1, 1, vec![0.0]);
        let preprocessing = PreprocessingConfig {
            target_size: (2, 3),
            rescale_factor: 1.0 / 255.0,
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [0.5, 0.5, 0.5],
        };
        let segmenter = SegformerSegmenter::from_parts(backend, preprocessing, labels());

        let bitmap = Bitmap::from_raw(4, 4, [255u8, 0, 255, 255].repeat(16)).unwrap();
        let tensor = segmenter.preprocess(&bitmap);
        assert_eq!(tensor.shape(), &[1, 3, 2, 3]);
        for value in tensor.index_axis(ndarray::Axis(1), 0).iter() {
            assert!((value - 1.0).abs() < 1e-2);
        }
        for value in tensor.index_axis(ndarray::Axis(1), 1).iter() {
            assert!((value + 1.0).abs() < 1e-2);
        }
    }

    #[test]
    fn test_masks_ordered_by_class_id() {
        // 3 classes on a 2x2 grid, argmax per pixel = [2, 0, 0, 1]
        let logits = vec![
            0.0, 5.0, 5.0, 0.0, // class 0
            0.0, 0.0, 0.0, 5.0, // class 1
            5.0, 0.0, 0.0, 0.0, // class 2
        ];
        let backend = FixedLogits::new(3, 2, 2, logits);
        let seen = backend.seen_shapes.clone();
        let segmenter = SegformerSegmenter::from_parts(
            backend,
            PreprocessingConfig {
                target_size: (8, 8),
                ..PreprocessingConfig::default()
            },
            labels(),
        );

        let bitmap = Bitmap::from_raw(2, 2, vec![128; 16]).unwrap();
        let masks = segmenter.segment(&bitmap).unwrap();

        let names: Vec<&str> = masks.iter().filter_map(|m| m.label.as_deref()).collect();
        assert_eq!(names, vec!["wall", "person", "LABEL_2"]);
        assert_eq!(masks[0].data, vec![0.0, 1.0, 1.0, 0.0]);
        assert_eq!(masks[1].data, vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(masks[2].data, vec![1.0, 0.0, 0.0, 0.0]);
        for mask in &masks {
            assert!(mask.ensure_matches(2, 2).is_ok());
        }
        assert_eq!(*seen.lock().unwrap(), vec![vec![1, 3, 8, 8]]);
    }

    #[test]
    fn test_logits_upsampled_to_bitmap_size() {
        // 2 classes over a 2x1 grid: left favours class 0, right class 1
        let backend = FixedLogits::new(2, 1, 2, vec![1.0, 0.0, 0.0, 1.0]);
        let segmenter =
            SegformerSegmenter::from_parts(backend, PreprocessingConfig::default(), labels());

        let bitmap = Bitmap::from_raw(4, 1, vec![0; 16]).unwrap();
        let masks = segmenter.segment(&bitmap).unwrap();
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0].label.as_deref(), Some("wall"));
        assert_eq!(masks[0].data, vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(masks[1].data, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_backend_failure_is_segmentation_error() {
        let segmenter =
            SegformerSegmenter::from_parts(FailingBackend, PreprocessingConfig::default(), labels());
        let bitmap = Bitmap::from_raw(1, 1, vec![0; 4]).unwrap();
        let err = segmenter.segment(&bitmap).unwrap_err();
        assert!(matches!(err, BgFillError::Segmentation(_)));
        assert!(err.to_string().contains("session exploded"));
        assert_eq!(segmenter.name(), "segformer/failing");
    }

    #[test]
    fn test_malformed_logits_rejected() {
        let backend = FixedLogits::new(1, 1, 1, vec![0.0]);
        let segmenter =
            SegformerSegmenter::from_parts(backend, PreprocessingConfig::default(), labels());
        let empty = Array4::<f32>::zeros((1, 0, 1, 1));
        assert!(segmenter.postprocess(&empty, 2, 2).is_err());
        let batched = Array4::<f32>::zeros((2, 1, 1, 1));
        assert!(segmenter.postprocess(&batched, 2, 2).is_err());
    }
}
