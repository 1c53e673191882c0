//! Contract between the pipeline and the ML kernels it drives.
//!
//! The pipeline never owns an inference implementation: engines are loaded
//! from stored [`ModelRecord`]s through an injected [`InferenceProvider`] at
//! task start, so a start request fails cleanly when a model cannot be
//! loaded instead of thirty seconds into a stream.

mod stub;

pub use stub::StubInferenceProvider;

use std::sync::Arc;

use beltrex_model::ModelRecord;
use image::RgbImage;

use crate::error::Result;

/// One raw detection as produced by an object detector, already restricted
/// to the particle class.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// Bounding box `[x1, y1, x2, y2]` in pixels.
    pub xyxy: [f64; 4],
    pub conf: f64,
}

/// Object-detection kernel. Implementations must be safe to share across
/// worker tasks; the pipeline hands over RGB frames.
pub trait ObjectDetector: Send + Sync + std::fmt::Debug {
    fn detect(&self, image: &RgbImage, min_conf: f64) -> Result<Vec<RawDetection>>;
}

/// Belt-status classification kernel. The pipeline resizes frames to
/// [`BeltClassifier::input_size`] before calling.
pub trait BeltClassifier: Send + Sync {
    fn input_size(&self) -> (u32, u32) {
        (150, 150)
    }

    /// Return the predicted class index.
    fn classify(&self, image: &RgbImage) -> Result<usize>;
}

/// Turns stored model records into live engines.
pub trait InferenceProvider: Send + Sync {
    fn load_detector(&self, record: &ModelRecord) -> Result<Arc<dyn ObjectDetector>>;

    fn load_classifier(&self, record: &ModelRecord) -> Result<Arc<dyn BeltClassifier>>;
}
