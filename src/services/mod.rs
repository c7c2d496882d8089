//! Pipeline stage services
//!
//! Each stage is a direct bitmap transform with ownership passed along:
//! - loader: fetch and decode a source
//! - resize: bound the working bitmap
//! - compositor: mask the background and flatten onto the fill colour
//! - encoder: serialize the result
//! - progress: stage reporting for frontends

pub mod compositor;
pub mod encoder;
pub mod loader;
pub mod progress;
pub mod resize;

pub use compositor::Compositor;
pub use encoder::ImageEncoder;
pub use loader::ImageLoader;
pub use progress::{
    ConsoleProgressReporter, NoOpProgressReporter, PipelineStage, ProgressReporter,
    ProgressTracker, ProgressUpdate,
};
pub use resize::Resizer;
