//! Progress reporting service
//!
//! Keeps stage reporting out of the pipeline logic so each frontend can
//! render progress its own way.

use crate::types::ProcessingTimings;
use instant::Instant;
use std::sync::Arc;

/// States one pipeline invocation moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Not started
    Idle,
    /// Fetching and decoding the source
    Loading,
    /// Bounding the working bitmap
    Resizing,
    /// Running the segmentation model
    Segmenting,
    /// Masking and flattening onto the fill colour
    Compositing,
    /// Serializing the final bitmap
    Encoding,
    /// Output produced
    Done,
    /// Aborted by the first stage failure
    Failed,
}

impl PipelineStage {
    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Idle => "Waiting to start",
            Self::Loading => "Loading source image",
            Self::Resizing => "Bounding image size",
            Self::Segmenting => "Running segmentation model",
            Self::Compositing => "Replacing background",
            Self::Encoding => "Encoding output image",
            Self::Done => "Processing completed",
            Self::Failed => "Processing failed",
        }
    }

    /// Typical progress percentage when entering this stage
    #[must_use]
    pub fn progress_percentage(self) -> u8 {
        match self {
            Self::Idle | Self::Failed => 0,
            Self::Loading => 5,
            Self::Resizing => 15,
            Self::Segmenting => 25,
            Self::Compositing => 85,
            Self::Encoding => 92,
            Self::Done => 100,
        }
    }

    /// Whether no further transitions happen from this stage
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current stage
    pub stage: PipelineStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since the invocation started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: PipelineStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }
}

/// Receives stage transitions from the pipeline
pub trait ProgressReporter: Send + Sync {
    /// Report that a stage has started
    fn report_progress(&self, update: ProgressUpdate);

    /// Report a finished invocation with its timings
    fn report_completion(&self, timings: &ProcessingTimings);

    /// Report the failure that aborted an invocation
    ///
    /// # Arguments
    /// * `stage` - Stage the failure happened in
    /// * `error` - Error description
    fn report_failure(&self, stage: PipelineStage, error: &str);
}

/// Discards all progress updates
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: &ProcessingTimings) {}

    fn report_failure(&self, _stage: PipelineStage, _error: &str) {}
}

/// Logs progress through the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether to include elapsed time and per-stage timings
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: &ProcessingTimings) {
        log::info!("Background replaced in {}ms", timings.total_ms);

        if self.verbose {
            log::info!("  load: {}ms", timings.load_ms);
            log::info!("  resize: {}ms", timings.resize_ms);
            log::info!("  segmentation: {}ms", timings.segmentation_ms);
            log::info!("  composite: {}ms", timings.composite_ms);
            log::info!("  encode: {}ms", timings.encode_ms);
        }
    }

    fn report_failure(&self, stage: PipelineStage, error: &str) {
        log::error!("Failed while {}: {}", stage.description().to_lowercase(), error);
    }
}

/// Per-invocation stage tracker
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    start_time: Instant,
    current_stage: PipelineStage,
    stage_started: Instant,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        let now = Instant::now();
        Self {
            reporter,
            start_time: now,
            current_stage: PipelineStage::Idle,
            stage_started: now,
        }
    }

    /// Tracker that reports nowhere
    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Arc::new(NoOpProgressReporter))
    }

    /// Enter a stage and report it
    pub fn report_stage(&mut self, stage: PipelineStage) {
        self.current_stage = stage;
        self.stage_started = Instant::now();
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    /// Mark the invocation done
    pub fn report_completion(&mut self, timings: &ProcessingTimings) {
        self.report_stage(PipelineStage::Done);
        self.reporter.report_completion(timings);
    }

    /// Report a failure in the current stage and move to `Failed`
    pub fn report_failure(&mut self, error: &str) {
        let stage = self.current_stage;
        self.current_stage = PipelineStage::Failed;
        self.reporter.report_failure(stage, error);
    }

    /// Milliseconds spent in the current stage so far
    #[must_use]
    pub fn stage_elapsed_ms(&self) -> u64 {
        self.stage_started.elapsed().as_millis() as u64
    }

    /// Milliseconds since the tracker was created
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> PipelineStage {
        self.current_stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        stages: Mutex<Vec<PipelineStage>>,
        completions: Mutex<Vec<ProcessingTimings>>,
        failures: Mutex<Vec<(PipelineStage, String)>>,
    }

    impl ProgressReporter for RecordingReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.stages.lock().unwrap().push(update.stage);
        }

        fn report_completion(&self, timings: &ProcessingTimings) {
            self.completions.lock().unwrap().push(timings.clone());
        }

        fn report_failure(&self, stage: PipelineStage, error: &str) {
            self.failures.lock().unwrap().push((stage, error.to_string()));
        }
    }

    #[test]
    fn test_stage_percentages_increase() {
        let order = [
            PipelineStage::Loading,
            PipelineStage::Resizing,
            PipelineStage::Segmenting,
            PipelineStage::Compositing,
            PipelineStage::Encoding,
            PipelineStage::Done,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].progress_percentage() < pair[1].progress_percentage());
        }
        assert!(PipelineStage::Done.is_terminal());
        assert!(PipelineStage::Failed.is_terminal());
        assert!(!PipelineStage::Segmenting.is_terminal());
    }

    #[test]
    fn test_tracker_records_stage_sequence() {
        let reporter = Arc::new(RecordingReporter::default());
        let mut tracker = ProgressTracker::new(reporter.clone());
        assert_eq!(tracker.current_stage(), PipelineStage::Idle);

        tracker.report_stage(PipelineStage::Loading);
        tracker.report_stage(PipelineStage::Resizing);
        tracker.report_completion(&ProcessingTimings::default());

        assert_eq!(
            *reporter.stages.lock().unwrap(),
            vec![
                PipelineStage::Loading,
                PipelineStage::Resizing,
                PipelineStage::Done
            ]
        );
        assert_eq!(reporter.completions.lock().unwrap().len(), 1);
        assert_eq!(tracker.current_stage(), PipelineStage::Done);
    }

    #[test]
    fn test_tracker_failure_reports_stage() {
        let reporter = Arc::new(RecordingReporter::default());
        let mut tracker = ProgressTracker::new(reporter.clone());

        tracker.report_stage(PipelineStage::Loading);
        tracker.report_stage(PipelineStage::Segmenting);
        tracker.report_failure("no masks");

        let failures = reporter.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, PipelineStage::Segmenting);
        assert_eq!(failures[0].1, "no masks");
        assert_eq!(tracker.current_stage(), PipelineStage::Failed);
    }

    #[test]
    fn test_no_op_and_console_reporters() {
        let mut tracker = ProgressTracker::no_op();
        tracker.report_stage(PipelineStage::Loading);
        tracker.report_failure("ignored");

        let console = ConsoleProgressReporter::new(true);
        console.report_progress(ProgressUpdate::new(PipelineStage::Encoding, Instant::now()));
        console.report_completion(&ProcessingTimings::default());
        console.report_failure(PipelineStage::Loading, "boom");
    }
}
