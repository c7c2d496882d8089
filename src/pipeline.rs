//! Background replacement pipeline
//!
//! Loader, resizer, segmenter, compositor and encoder run strictly in that
//! order for each invocation. The bitmap is moved from stage to stage, so no
//! stage can observe a later stage's writes. The first failing stage ends
//! the invocation and its error is returned unchanged.

use crate::{
    config::PipelineConfig,
    error::{BgFillError, Result},
    segmentation::SegmenterHandle,
    services::{
        Compositor, ImageEncoder, ImageLoader, NoOpProgressReporter, PipelineStage,
        ProgressReporter, ProgressTracker, Resizer,
    },
    types::{Bitmap, ImageSource, PipelineOutput, ProcessingTimings, SegmentationMask},
};
use instant::Instant;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug_span, info, instrument, Instrument};

/// Replaces the background of images with a solid fill
///
/// One pipeline can serve any number of invocations, concurrently or in
/// sequence. Each invocation owns its bitmaps; only the segmenter is shared.
///
/// ```rust,no_run
/// use bgfill::{BackgroundReplacementPipeline, ImageSource, PipelineConfig};
/// use bgfill::segmentation::FnSegmenter;
/// use std::sync::Arc;
///
/// # async fn example() -> bgfill::Result<()> {
/// // Treat everything right of centre as background
/// let segmenter = Arc::new(FnSegmenter::from_pattern(|x, _y, w, _h| {
///     if x >= w / 2 { 1.0 } else { 0.0 }
/// }));
/// let pipeline = BackgroundReplacementPipeline::new(PipelineConfig::default(), segmenter)?;
/// let output = pipeline.run(&ImageSource::parse("photo.png")).await?;
/// output.encoded.save("photo-black-bg.jpg").await?;
/// # Ok(())
/// # }
/// ```
pub struct BackgroundReplacementPipeline {
    config: PipelineConfig,
    loader: ImageLoader,
    segmenter: SegmenterHandle,
    reporter: Arc<dyn ProgressReporter>,
}

impl BackgroundReplacementPipeline {
    /// Create a pipeline around a segmenter
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Failed to create the loader's HTTP client
    pub fn new(config: PipelineConfig, segmenter: SegmenterHandle) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            loader: ImageLoader::new()?,
            segmenter,
            reporter: Arc::new(NoOpProgressReporter),
        })
    }

    /// Replace the loader, e.g. to change the fetch timeout
    #[must_use]
    pub fn with_loader(mut self, loader: ImageLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Report stage transitions to `reporter`
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn segmenter_name(&self) -> &str {
        self.segmenter.name()
    }

    /// Load `source`, replace its background and encode the result
    ///
    /// # Errors
    /// - `Decode` when the source cannot be fetched or decoded
    /// - `Segmentation` when the segmenter fails, returns no masks, or the
    ///   selected mask does not match the working bitmap
    /// - `Encode` when the result cannot be serialized
    #[instrument(
        skip(self, source),
        fields(source = %source, segmenter = %self.segmenter.name())
    )]
    pub async fn run(&self, source: &ImageSource) -> Result<PipelineOutput> {
        self.load_and_process(self.loader.load(source)).await
    }

    /// Run the pipeline on already fetched image bytes
    ///
    /// The bytes move straight to the decoder without being copied.
    ///
    /// # Errors
    /// Same as [`run`](Self::run)
    #[instrument(
        skip(self, bytes),
        fields(bytes = bytes.len(), segmenter = %self.segmenter.name())
    )]
    pub async fn process_bytes(&self, bytes: Vec<u8>) -> Result<PipelineOutput> {
        self.load_and_process(self.loader.load_bytes(bytes)).await
    }

    /// Run the pipeline on a decoded bitmap, skipping the load stage
    ///
    /// # Errors
    /// - `Segmentation` or `Encode` as for [`run`](Self::run)
    #[instrument(skip(self, bitmap), fields(segmenter = %self.segmenter.name()))]
    pub async fn process_bitmap(&self, bitmap: Bitmap) -> Result<PipelineOutput> {
        let mut tracker = ProgressTracker::new(Arc::clone(&self.reporter));
        let mut timings = ProcessingTimings::default();
        let start = Instant::now();
        let result = self.process(bitmap, &mut tracker, &mut timings, start).await;
        self.finish(result, &mut tracker)
    }

    async fn load_and_process<F>(&self, load: F) -> Result<PipelineOutput>
    where
        F: Future<Output = Result<Bitmap>>,
    {
        let mut tracker = ProgressTracker::new(Arc::clone(&self.reporter));
        let mut timings = ProcessingTimings::default();
        let start = Instant::now();

        tracker.report_stage(PipelineStage::Loading);
        let loaded = load.instrument(debug_span!("load")).await;
        timings.load_ms = tracker.stage_elapsed_ms();

        let result = match loaded {
            Ok(bitmap) => self.process(bitmap, &mut tracker, &mut timings, start).await,
            Err(e) => Err(e),
        };
        self.finish(result, &mut tracker)
    }

    fn finish(
        &self,
        result: Result<PipelineOutput>,
        tracker: &mut ProgressTracker,
    ) -> Result<PipelineOutput> {
        match &result {
            Ok(output) => {
                info!(timings = %output.timings.summary(), "Background replaced");
                tracker.report_completion(&output.timings);
            },
            Err(e) => tracker.report_failure(&e.to_string()),
        }
        result
    }

    async fn process(
        &self,
        bitmap: Bitmap,
        tracker: &mut ProgressTracker,
        timings: &mut ProcessingTimings,
        start: Instant,
    ) -> Result<PipelineOutput> {
        let original_dimensions = bitmap.dimensions();

        tracker.report_stage(PipelineStage::Resizing);
        let working = {
            let _span = debug_span!(
                "resize",
                width = original_dimensions.0,
                height = original_dimensions.1,
                max = self.config.max_dimension
            )
            .entered();
            Resizer::bound(bitmap, self.config.max_dimension)
        };
        timings.resize_ms = tracker.stage_elapsed_ms();
        let working_dimensions = working.dimensions();

        tracker.report_stage(PipelineStage::Segmenting);
        let (working, masks) = self.segment(working).await?;
        timings.segmentation_ms = tracker.stage_elapsed_ms();

        let mask_count = masks.len();
        let mask = self.config.mask_selection.select(&masks)?;
        log::debug!(
            "Selected mask {:?} of {} ({:.1}% above threshold)",
            mask.label,
            mask_count,
            mask.coverage(self.config.mask_threshold) * 100.0
        );
        let selected_mask_label = mask.label.clone();

        tracker.report_stage(PipelineStage::Compositing);
        let composited = {
            let _span = debug_span!("composite").entered();
            Compositor::composite(
                working,
                mask,
                self.config.mask_threshold,
                self.config.fill_color,
            )?
        };
        timings.composite_ms = tracker.stage_elapsed_ms();

        tracker.report_stage(PipelineStage::Encoding);
        let encoded = {
            let _span = debug_span!("encode", format = ?self.config.output_format).entered();
            ImageEncoder::encode(&composited, self.config.output_format, self.config.jpeg_quality)?
        };
        timings.encode_ms = tracker.stage_elapsed_ms();
        timings.total_ms = start.elapsed().as_millis() as u64;

        Ok(PipelineOutput {
            encoded,
            original_dimensions,
            working_dimensions,
            selected_mask_label,
            mask_count,
            timings: timings.clone(),
        })
    }

    /// Run the segmenter off the async runtime, handing the bitmap back afterwards
    async fn segment(&self, bitmap: Bitmap) -> Result<(Bitmap, Vec<SegmentationMask>)> {
        let segmenter = Arc::clone(&self.segmenter);
        let span = debug_span!("segment", segmenter = %segmenter.name());

        let (bitmap, masks) = tokio::task::spawn_blocking(move || {
            let _guard = span.enter();
            let masks = segmenter.segment(&bitmap);
            (bitmap, masks)
        })
        .await
        .map_err(|e| BgFillError::segmentation(format!("Segmentation task failed: {}", e)))?;

        let masks = masks.map_err(as_segmentation_error)?;
        if masks.is_empty() {
            return Err(BgFillError::segmentation("Segmenter returned no masks"));
        }
        Ok((bitmap, masks))
    }
}

impl std::fmt::Debug for BackgroundReplacementPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundReplacementPipeline")
            .field("config", &self.config)
            .field("segmenter", &self.segmenter.name())
            .finish_non_exhaustive()
    }
}

fn as_segmentation_error(error: BgFillError) -> BgFillError {
    match error {
        BgFillError::Segmentation(_) => error,
        other => BgFillError::segmentation(other.to_string()),
    }
}
