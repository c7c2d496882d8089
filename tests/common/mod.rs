//! Shared fixtures for integration tests

#![allow(dead_code)]

use bgfill::{
    segmentation::FnSegmenter, PipelineStage, ProcessingTimings, ProgressReporter, ProgressUpdate,
};
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Mutex;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Opaque image whose pixels all differ from black
pub fn gradient_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (16 + x * 200 / width.max(1)) as u8,
            (16 + y * 200 / height.max(1)) as u8,
            (64 + (x + y) % 128) as u8,
            255,
        ])
    })
}

pub fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageFormat::Png).unwrap();
    cursor.into_inner()
}

pub fn decode_rgba(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes).unwrap().to_rgba8()
}

/// Whether `(x, y)` lies inside a border band 8.4% of each dimension wide
///
/// The band covers about 30% of the image area.
pub fn is_inner(x: u32, y: u32, width: u32, height: u32) -> bool {
    let inset_x = width * 21 / 250;
    let inset_y = height * 21 / 250;
    x >= inset_x && x < width - inset_x && y >= inset_y && y < height - inset_y
}

/// Share of a `width` x `height` image that falls in the border band
pub fn border_fraction(width: u32, height: u32) -> f64 {
    let border = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .filter(|&(x, y)| !is_inner(x, y, width, height))
        .count();
    border as f64 / f64::from(width * height)
}

/// Segmenter that marks the outer 30% border as background (0.9) and the centre as foreground (0.1)
pub fn border_segmenter() -> FnSegmenter {
    FnSegmenter::from_pattern(|x, y, w, h| if is_inner(x, y, w, h) { 0.1 } else { 0.9 })
}

/// Records every callback it receives
#[derive(Default)]
pub struct RecordingReporter {
    pub stages: Mutex<Vec<PipelineStage>>,
    pub completions: Mutex<Vec<ProcessingTimings>>,
    pub failures: Mutex<Vec<(PipelineStage, String)>>,
}

impl RecordingReporter {
    pub fn stages(&self) -> Vec<PipelineStage> {
        self.stages.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<(PipelineStage, String)> {
        self.failures.lock().unwrap().clone()
    }
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
