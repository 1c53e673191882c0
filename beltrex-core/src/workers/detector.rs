//! Object-detection worker: consumes sampled frames, runs the detector, and
//! forwards measured particles in the reported dimension window to the CSV
//! aggregator.

use std::sync::Arc;

use async_trait::async_trait;
use beltrex_model::{DetectorParams, Particle};
use bytes::Bytes;
use chrono::{DateTime, Local};
use tracing::debug;

use crate::error::Result;
use crate::inference::{ObjectDetector, RawDetection};
use crate::iris::CsvRecord;
use crate::queue::{QueueProcessor, WorkQueue};

use super::decode_frame;

/// Everything one detection pass needs; engines and parameters are loaded at
/// task start and shared by reference.
pub struct DetectionJob {
    pub source_key: String,
    pub frame: Bytes,
    pub captured_at: DateTime<Local>,
    pub image_filename: String,
    pub detector: Arc<dyn ObjectDetector>,
    pub params: Arc<DetectorParams>,
}

impl std::fmt::Debug for DetectionJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionJob")
            .field("source_key", &self.source_key)
            .field("image_filename", &self.image_filename)
            .field("frame_bytes", &self.frame.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct DetectorProcessor {
    csv: WorkQueue<CsvRecord>,
}

impl DetectorProcessor {
    pub fn new(csv: WorkQueue<CsvRecord>) -> Self {
        Self { csv }
    }
}

#[async_trait]
impl QueueProcessor for DetectorProcessor {
    type Item = DetectionJob;

    fn name(&self) -> &'static str {
        "model_detector"
    }

    async fn process(&mut self, job: DetectionJob) -> Result<()> {
        let image = decode_frame(&job.frame)?;
        let raw = job.detector.detect(&image, job.params.min_conf)?;

        let measured: Vec<Particle> = raw.iter().map(|d| measure(d, &job.params)).collect();
        let (to_detect, to_save) = split_windows(measured, &job.params);
        debug!(
            "[{}] {} detections, {} reported, {} stored",
            job.source_key,
            raw.len(),
            to_detect.len(),
            to_save.len()
        );

        self.csv.enqueue(CsvRecord::Detection {
            source_key: job.source_key,
            at: job.captured_at,
            image: job.image_filename,
            particles: to_detect,
        });
        Ok(())
    }
}

/// Derive the per-particle measurement fields from one raw detection.
pub fn measure(detection: &RawDetection, params: &DetectorParams) -> Particle {
    let [x1, y1, x2, y2] = detection.xyxy;
    let width = x2 - x1;
    let height = y2 - y1;
    let ppm = params.pixels_per_mm();

    let width_mm = (width / ppm) as i64;
    let height_mm = (height / ppm) as i64;
    let max_d_mm = (width_mm.max(height_mm) as f64 * params.particle_bb_dimension_factor)
        .round() as i64;
    let volume_est =
        params.est_particle_volume_x * (max_d_mm as f64).powf(params.est_particle_volume_exp);

    Particle {
        xyxy: detection.xyxy,
        conf: detection.conf,
        width_px: width as i64,
        height_px: height as i64,
        width_mm,
        height_mm,
        max_d_mm,
        volume_est,
    }
}

/// Split measured particles into the reported and the stored dimension
/// windows. Both bounds are inclusive.
pub fn split_windows(
    particles: Vec<Particle>,
    params: &DetectorParams,
) -> (Vec<Particle>, Vec<Particle>) {
    let to_detect = particles
        .iter()
        .filter(|p| params.min_d_detect <= p.max_d_mm && p.max_d_mm <= params.max_d_detect)
        .cloned()
        .collect();
    let to_save = particles
        .into_iter()
        .filter(|p| params.min_d_save <= p.max_d_mm && p.max_d_mm <= params.max_d_save)
        .collect();
    (to_detect, to_save)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueWorker;
    use crate::workers::encode_test_jpeg;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn measure_derives_millimetre_fields() {
        let params = DetectorParams::default();
        let detection = RawDetection {
            xyxy: [0.0, 0.0, 100.0, 220.0],
            conf: 0.9,
        };
        let particle = measure(&detection, &params);
        assert_eq!(particle.width_px, 100);
        assert_eq!(particle.height_px, 220);
        // 900 px / 240 mm field of view.
        assert_eq!(particle.width_mm, 375);
        assert_eq!(particle.height_mm, 825);
        assert_eq!(particle.max_d_mm, 743);
        assert!(particle.volume_est > 0.0);
    }

    #[test]
    fn volume_follows_the_power_law() {
        let params = DetectorParams {
            est_particle_volume_x: 2.0,
            est_particle_volume_exp: 3.0,
            particle_bb_dimension_factor: 1.0,
            ..DetectorParams::default()
        };
        let detection = RawDetection {
            // 4 px wide and tall -> 15 mm at 3.75 mm per px.
            xyxy: [0.0, 0.0, 4.0, 4.0],
            conf: 1.0,
        };
        let particle = measure(&detection, &params);
        assert_eq!(particle.max_d_mm, 15);
        assert_eq!(particle.volume_est, 2.0 * 15.0_f64.powi(3));
    }

    #[test]
    fn windows_are_inclusive_on_both_ends() {
        let params = DetectorParams {
            min_d_detect: 200,
            max_d_detect: 743,
            min_d_save: 300,
            max_d_save: 700,
            ..DetectorParams::default()
        };
        let at = |max_d_mm: i64| Particle {
            xyxy: [0.0; 4],
            conf: 1.0,
            width_px: 0,
            height_px: 0,
            width_mm: 0,
            height_mm: 0,
            max_d_mm,
            volume_est: 0.0,
        };
        let particles = vec![at(199), at(200), at(300), at(700), at(743), at(744)];
        let (to_detect, to_save) = split_windows(particles, &params);

        let dims = |list: &[Particle]| list.iter().map(|p| p.max_d_mm).collect::<Vec<_>>();
        assert_eq!(dims(&to_detect), vec![200, 300, 700, 743]);
        assert_eq!(dims(&to_save), vec![300, 700]);
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

    #[derive(Debug)]
    struct FixedDetector(Vec<RawDetection>);

    impl ObjectDetector for FixedDetector {
        fn detect(&self, _image: &image::RgbImage, min_conf: f64) -> Result<Vec<RawDetection>> {
            Ok(self.0.iter().filter(|d| d.conf >= min_conf).cloned().collect())
        }
    }

    #[tokio::test]
    async fn forwards_only_the_reported_window_to_csv() {
        let records = Arc::new(Mutex::new(Vec::new()));
        let csv_worker = QueueWorker::spawn(
            Collect {
                records: Arc::clone(&records),
            },
            16,
        );

        let mut processor = DetectorProcessor::new(csv_worker.queue());
        let detector = FixedDetector(vec![
            // 100x220 px -> max_d 743 mm, inside the default window.
            RawDetection {
                xyxy: [0.0, 0.0, 100.0, 220.0],
                conf: 0.95,
            },
            // 10x10 px -> 34 mm, below min_d_detect.
            RawDetection {
                xyxy: [0.0, 0.0, 10.0, 10.0],
                conf: 0.95,
            },
        ]);

        processor
            .process(DetectionJob {
                source_key: "webcam_0".into(),
                frame: encode_test_jpeg(16, 16),
                captured_at: Local::now(),
                image_filename: "frame_1.jpg".into(),
                detector: Arc::new(detector),
                params: Arc::new(DetectorParams::default()),
            })
            .await
            .unwrap();

        assert!(csv_worker.stop(Duration::from_secs(1)).await);
        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        match &records[0] {
            CsvRecord::Detection { particles, image, .. } => {
                assert_eq!(particles.len(), 1);
                assert_eq!(particles[0].max_d_mm, 743);
                assert_eq!(image, "frame_1.jpg");
            }
            other => panic!("unexpected record {other:?}"),
        }
    }
}
