//! Belt-status classification worker: resizes sampled frames to the
//! classifier's input, resolves the predicted index through the class-status
//! table, and forwards the tag to the CSV aggregator.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local};
use image::imageops::FilterType;
use tracing::{debug, error};

use crate::error::{PipelineError, Result};
use crate::inference::BeltClassifier;
use crate::iris::CsvRecord;
use crate::queue::{QueueProcessor, WorkQueue};

use super::decode_frame;

pub struct ClassificationJob {
    pub source_key: String,
    pub frame: Bytes,
    pub captured_at: DateTime<Local>,
    pub classifier: Arc<dyn BeltClassifier>,
    /// Class-status names ordered by id.
    pub class_names: Arc<Vec<String>>,
}

impl std::fmt::Debug for ClassificationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassificationJob")
            .field("source_key", &self.source_key)
            .field("frame_bytes", &self.frame.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ClassifierProcessor {
    csv: WorkQueue<CsvRecord>,
}

impl ClassifierProcessor {
    pub fn new(csv: WorkQueue<CsvRecord>) -> Self {
        Self { csv }
    }
}

#[async_trait]
impl QueueProcessor for ClassifierProcessor {
    type Item = ClassificationJob;

    fn name(&self) -> &'static str {
        "classifier_processor"
    }

    async fn process(&mut self, job: ClassificationJob) -> Result<()> {
        let image = decode_frame(&job.frame)?;
        let (width, height) = job.classifier.input_size();
        let resized = image::imageops::resize(&image, width, height, FilterType::Triangle);

        let index = job.classifier.classify(&resized)?;
        let tag = resolve_class_tag(&job.class_names, index, &job.source_key)?;
        debug!("[{}] belt status: {tag}", job.source_key);

        self.csv.enqueue(CsvRecord::Classification {
            source_key: job.source_key,
            at: job.captured_at,
            tag,
        });
        Ok(())
    }
}

/// Resolve a class index through the ordered status table. An index beyond
/// the table clamps to the last entry and logs an error.
pub fn resolve_class_tag(names: &[String], index: usize, source_key: &str) -> Result<String> {
    if names.is_empty() {
        return Err(PipelineError::Config(
            "class-status table is empty".into(),
        ));
    }
    if index >= names.len() {
        let clamped = names.len() - 1;
        error!(
            "[{source_key}] classifier index {index} exceeds status table (len {}), \
             clamping to {clamped}",
            names.len()
        );
        return Ok(names[clamped].clone());
    }
    Ok(names[index].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueWorker;
    use crate::workers::encode_test_jpeg;
    use std::sync::Mutex;
    use std::time::Duration;

    fn names() -> Vec<String> {
        vec!["stopped".into(), "running".into(), "obstructed".into()]
    }

    #[test]
    fn resolves_in_range_indices() {
        assert_eq!(resolve_class_tag(&names(), 1, "t").unwrap(), "running");
    }

    #[test]
    fn clamps_overflow_to_last_entry() {
        // Index == len is the boundary case; both clamp to the last tag.
        assert_eq!(resolve_class_tag(&names(), 3, "t").unwrap(), "obstructed");
        assert_eq!(resolve_class_tag(&names(), 5, "t").unwrap(), "obstructed");
    }

    #[test]
    fn empty_table_is_a_config_error() {
        let err = resolve_class_tag(&[], 0, "t").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    struct Collect {
        records: Arc<Mutex<Vec<CsvRecord>>>,
    }

    #[async_trait]
    impl QueueProcessor for Collect {
        type Item = CsvRecord;

        fn name(&self) -> &'static str {
            "collect"
        }

        async fn process(&mut self, record: CsvRecord) -> Result<()> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    struct FixedClassifier(usize);

    impl BeltClassifier for FixedClassifier {
        fn classify(&self, image: &image::RgbImage) -> Result<usize> {
            // The pipeline resized to our declared input before calling.
            assert_eq!(image.dimensions(), (150, 150));
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn forwards_resolved_tag_to_csv() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let csv_worker = QueueWorker::spawn(
            Collect {
                records: Arc::clone(&records),
            },
            16,
        );

        let mut processor = ClassifierProcessor::new(csv_worker.queue());
        processor
            .process(ClassificationJob {
                source_key: "simulator_0".into(),
                frame: encode_test_jpeg(32, 24),
                captured_at: Local::now(),
                classifier: Arc::new(FixedClassifier(5)),
                class_names: Arc::new(names()),
            })
            .await
            .unwrap();

        assert!(csv_worker.stop(Duration::from_secs(1)).await);
        let records = records.lock().unwrap();
        match &records[0] {
            CsvRecord::Classification { tag, .. } => assert_eq!(tag, "obstructed"),
            other => panic!("unexpected record {other:?}"),
        }
    }
}
