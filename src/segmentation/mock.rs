//! Scripted segmenters for tests, benchmarks and dry runs

use super::Segmenter;
use crate::{
    error::Result,
    types::{Bitmap, SegmentationMask},
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Returns the same masks for every bitmap
#[derive(Debug, Default)]
pub struct StaticSegmenter {
    masks: Vec<SegmentationMask>,
    calls: AtomicUsize,
}

impl StaticSegmenter {
    #[must_use]
    pub fn new(masks: Vec<SegmentationMask>) -> Self {
        Self {
            masks,
            calls: AtomicUsize::new(0),
        }
    }

    /// Segmenter that finds nothing
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of `segment` calls so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Segmenter for StaticSegmenter {
    fn segment(&self, _bitmap: &Bitmap) -> Result<Vec<SegmentationMask>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.masks.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

type SegmentFn = dyn Fn(&Bitmap) -> Result<Vec<SegmentationMask>> + Send + Sync;

/// Computes masks with a closure, typically from the bitmap's size
pub struct FnSegmenter {
    segment_fn: Box<SegmentFn>,
    calls: AtomicUsize,
}

impl FnSegmenter {
    pub fn new<F>(segment_fn: F) -> Self
    where
        F: Fn(&Bitmap) -> Result<Vec<SegmentationMask>> + Send + Sync + 'static,
    {
        Self {
            segment_fn: Box::new(segment_fn),
            calls: AtomicUsize::new(0),
        }
    }

    /// One mask where each pixel's value comes from `value_at(x, y, width, height)`
    pub fn from_pattern<F>(value_at: F) -> Self
    where
        F: Fn(u32, u32, u32, u32) -> f32 + Send + Sync + 'static,
    {
        Self::new(move |bitmap| {
            let (width, height) = bitmap.dimensions();
            let data = (0..height)
                .flat_map(|y| (0..width).map(move |x| (x, y)))
                .map(|(x, y)| value_at(x, y, width, height))
                .collect();
            Ok(vec![SegmentationMask::new(data, (width, height))])
        })
    }

    /// Number of `segment` calls so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FnSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSegmenter")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

impl Segmenter for FnSegmenter {
    fn segment(&self, bitmap: &Bitmap) -> Result<Vec<SegmentationMask>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.segment_fn)(bitmap)
    }

    fn name(&self) -> &str {
        "fn"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_segmenter_counts_calls() {
        let segmenter = StaticSegmenter::new(vec![SegmentationMask::filled((1, 1), 0.9)]);
        let bitmap = Bitmap::from_raw(1, 1, vec![0, 0, 0, 255]).unwrap();
        assert_eq!(segmenter.segment(&bitmap).unwrap().len(), 1);
        assert_eq!(segmenter.segment(&bitmap).unwrap().len(), 1);
        assert_eq!(segmenter.calls(), 2);
        assert!(StaticSegmenter::empty().segment(&bitmap).unwrap().is_empty());
    }

    #[test]
    fn test_pattern_segmenter_matches_bitmap_size() {
        let segmenter = FnSegmenter::from_pattern(|x, _y, _w, _h| if x == 0 { 1.0 } else { 0.0 });
        let bitmap = Bitmap::from_raw(3, 2, vec![0; 24]).unwrap();
        let masks = segmenter.segment(&bitmap).unwrap();
        assert_eq!(masks.len(), 1);
        assert_eq!(masks[0].dimensions, (3, 2));
        assert_eq!(masks[0].data, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(segmenter.calls(), 1);
    }
}
