//! Segmentation capability
//!
//! The pipeline only knows the [`Segmenter`] contract: one bitmap in, a list
//! of per-pixel masks out. Model-backed and scripted implementations plug in
//! through a shared [`SegmenterHandle`].

pub mod mock;
pub mod segformer;

use crate::{error::Result, types::{Bitmap, SegmentationMask}};
use std::sync::Arc;

pub use mock::{FnSegmenter, StaticSegmenter};
pub use segformer::SegformerSegmenter;

/// Produces segmentation masks for a bitmap
pub trait Segmenter: Send + Sync {
    /// Segment `bitmap` into masks aligned with it
    ///
    /// An empty list is allowed here; the pipeline treats it as a failure.
    ///
    /// # Errors
    /// - Model or preprocessing failures
    fn segment(&self, bitmap: &Bitmap) -> Result<Vec<SegmentationMask>>;

    /// Name for logs
    fn name(&self) -> &str;
}

/// Shared segmentation capability injected into the pipeline
pub type SegmenterHandle = Arc<dyn Segmenter>;
