//! Scripted inference backend for the `stub` model type.
//!
//! The model blob is a JSON script of fixed outputs, which is what the
//! file-backed simulator deployments and the test-suite run against. Real
//! backends implement [`InferenceProvider`] in the embedding binary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use beltrex_model::ModelRecord;
use image::RgbImage;
use serde::Deserialize;

use crate::error::{PipelineError, Result};

use super::{BeltClassifier, InferenceProvider, ObjectDetector, RawDetection};

pub const STUB_MODEL_TYPE: &str = "stub";

#[derive(Debug, Deserialize)]
struct DetectorScript {
    /// `[x1, y1, x2, y2, conf]` per detection, replayed for every frame.
    detections: Vec<[f64; 5]>,
}

#[derive(Debug, Deserialize)]
struct ClassifierScript {
    /// Class indices replayed in a cycle, one per frame.
    classes: Vec<usize>,
    #[serde(default)]
    input_size: Option<(u32, u32)>,
}

#[derive(Debug)]
struct StubDetector {
    detections: Vec<RawDetection>,
}

impl ObjectDetector for StubDetector {
    fn detect(&self, _image: &RgbImage, min_conf: f64) -> Result<Vec<RawDetection>> {
        Ok(self
            .detections
            .iter()
            .filter(|d| d.conf >= min_conf)
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
struct StubClassifier {
    sequence: Vec<usize>,
    cursor: AtomicUsize,
    input_size: (u32, u32),
}

impl BeltClassifier for StubClassifier {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn classify(&self, _image: &RgbImage) -> Result<usize> {
        let at = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(self.sequence[at % self.sequence.len()])
    }
}

/// Provider understanding only the `stub` model type.
#[derive(Debug, Default, Clone)]
pub struct StubInferenceProvider;

impl StubInferenceProvider {
    fn check_type(record: &ModelRecord) -> Result<()> {
        if record.model_type != STUB_MODEL_TYPE {
            return Err(PipelineError::Config(format!(
                "no inference backend for model type '{}'",
                record.model_type
            )));
        }
        Ok(())
    }
}

impl InferenceProvider for StubInferenceProvider {
    fn load_detector(&self, record: &ModelRecord) -> Result<Arc<dyn ObjectDetector>> {
        Self::check_type(record)?;
        let script: DetectorScript = serde_json::from_slice(&record.blob)
            .map_err(|e| PipelineError::Config(format!("detector script: {e}")))?;
        let detections = script
            .detections
            .into_iter()
            .map(|[x1, y1, x2, y2, conf]| RawDetection {
                xyxy: [x1, y1, x2, y2],
                conf,
            })
            .collect();
        Ok(Arc::new(StubDetector { detections }))
    }

    fn load_classifier(&self, record: &ModelRecord) -> Result<Arc<dyn BeltClassifier>> {
        Self::check_type(record)?;
        let script: ClassifierScript = serde_json::from_slice(&record.blob)
            .map_err(|e| PipelineError::Config(format!("classifier script: {e}")))?;
        if script.classes.is_empty() {
            return Err(PipelineError::Config(
                "classifier script has no classes".into(),
            ));
        }
        Ok(Arc::new(StubClassifier {
            sequence: script.classes,
            cursor: AtomicUsize::new(0),
            input_size: script.input_size.unwrap_or((150, 150)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(model_type: &str, blob: &str) -> ModelRecord {
        ModelRecord {
            name: "m".into(),
            version: "1.0.0".into(),
            model_type: model_type.into(),
            description: None,
            blob: blob.as_bytes().to_vec(),
        }
    }

    #[test]
    fn detector_replays_script_filtered_by_confidence() {
        let provider = StubInferenceProvider;
        let detector = provider
            .load_detector(&record(
                "stub",
                r#"{"detections": [[0, 0, 10, 10, 0.95], [5, 5, 20, 20, 0.4]]}"#,
            ))
            .unwrap();
        let image = RgbImage::new(4, 4);
        let found = detector.detect(&image, 0.8).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].xyxy, [0.0, 0.0, 10.0, 10.0]);
    }

    #[test]
    fn classifier_cycles_through_sequence() {
        let provider = StubInferenceProvider;
        let classifier = provider
            .load_classifier(&record("stub", r#"{"classes": [0, 2]}"#))
            .unwrap();
        let image = RgbImage::new(4, 4);
        assert_eq!(classifier.classify(&image).unwrap(), 0);
        assert_eq!(classifier.classify(&image).unwrap(), 2);
        assert_eq!(classifier.classify(&image).unwrap(), 0);
    }

    #[test]
    fn unknown_model_type_is_a_config_error() {
        let provider = StubInferenceProvider;
        let err = provider
            .load_detector(&record("yolo", "{}"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
