//! CSV aggregator: accumulates per-stage records into one open artifact per
//! (stage, source) and rolls artifacts over by elapsed wall time.
//!
//! Rollover ordering is close-then-offer-then-open, so an uploader observing
//! the offers always sees a monotonic sequence per (stage, source).

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beltrex_model::{Particle, ProjectSettings, Stage};
use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::queue::QueueProcessor;

use super::{ClosedArtifact, ClosedArtifactSink};

const DETECTOR_HEADER: [&str; 12] = [
    "timestamp",
    "image",
    "xyxy",
    "conf",
    "width_px",
    "height_px",
    "width_mm",
    "height_mm",
    "max_d_mm",
    "volume_est",
    "time_diff",
    "images_per_second",
];

const CLASSIFIER_HEADER: [&str; 4] = [
    "ProjectTitle",
    "FileCreationTimestamp",
    "StatusTimestamp",
    "Data",
];

/// One arrival at the aggregator.
#[derive(Debug, Clone)]
pub enum CsvRecord {
    Detection {
        source_key: String,
        at: DateTime<Local>,
        image: String,
        particles: Vec<Particle>,
    },
    Classification {
        source_key: String,
        at: DateTime<Local>,
        tag: String,
    },
}

impl CsvRecord {
    pub fn stage(&self) -> Stage {
        match self {
            CsvRecord::Detection { .. } => Stage::Detector,
            CsvRecord::Classification { .. } => Stage::Classifier,
        }
    }

    pub fn source_key(&self) -> &str {
        match self {
            CsvRecord::Detection { source_key, .. }
            | CsvRecord::Classification { source_key, .. } => source_key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CsvAggregatorConfig {
    /// Local root the IRIS folder tree is created under.
    pub root: PathBuf,
    pub settings: ProjectSettings,
    /// Artifact rollover interval.
    pub interval: Duration,
}

impl CsvAggregatorConfig {
    pub fn new(root: impl Into<PathBuf>, settings: ProjectSettings) -> Self {
        let interval = Duration::from_secs(settings.csv_interval_seconds.max(0) as u64);
        Self {
            root: root.into(),
            settings,
            interval,
        }
    }
}

#[derive(Debug)]
struct OpenArtifact {
    path: PathBuf,
    created_at: DateTime<Local>,
    writer: csv::Writer<File>,
}

type ArtifactKey = (Stage, String);

/// Single consumer of the CSV queue; exclusively owns every open artifact's
/// file handle.
pub struct CsvAggregator {
    config: CsvAggregatorConfig,
    sink: Option<Arc<dyn ClosedArtifactSink>>,
    open: HashMap<ArtifactKey, OpenArtifact>,
    last_append: HashMap<ArtifactKey, DateTime<Local>>,
}

impl std::fmt::Debug for CsvAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvAggregator")
            .field("open", &self.open.len())
            .finish_non_exhaustive()
    }
}

impl CsvAggregator {
    pub fn new(config: CsvAggregatorConfig, sink: Option<Arc<dyn ClosedArtifactSink>>) -> Self {
        Self {
            config,
            sink,
            open: HashMap::new(),
            last_append: HashMap::new(),
        }
    }

    fn create_artifact(
        config: &CsvAggregatorConfig,
        key: &ArtifactKey,
        now: DateTime<Local>,
    ) -> Result<OpenArtifact> {
        let subfolder = match key.0 {
            Stage::Detector => &config.settings.iris_model_subfolder,
            Stage::Classifier => &config.settings.iris_classifier_subfolder,
        };
        let dir = config
            .root
            .join(&config.settings.iris_main_folder)
            .join(subfolder);
        std::fs::create_dir_all(&dir)?;

        let filename = format!("{subfolder}_{}.csv", now.format("%Y%m%d_%H%M%S_%6f"));
        let path = dir.join(filename);
        let mut writer = csv::Writer::from_path(&path)?;
        let header: &[&str] = match key.0 {
            Stage::Detector => &DETECTOR_HEADER,
            Stage::Classifier => &CLASSIFIER_HEADER,
        };
        writer.write_record(header)?;
        writer.flush()?;

        info!("[{}/{}] new csv artifact {}", key.0, key.1, path.display());
        Ok(OpenArtifact {
            path,
            created_at: now,
            writer,
        })
    }

    /// Close the current artifact for `key` and offer it exactly once.
    fn close_and_offer(&mut self, key: &ArtifactKey) {
        let Some(mut artifact) = self.open.remove(key) else {
            return;
        };
        if let Err(err) = artifact.writer.flush() {
            warn!(
                "[{}/{}] flush on close failed for {}: {err}",
                key.0,
                key.1,
                artifact.path.display()
            );
        }
        drop(artifact.writer);

        let closed = ClosedArtifact {
            path: artifact.path,
            stage: key.0,
            created_at: artifact.created_at,
        };
        match &self.sink {
            Some(sink) => {
                if !sink.offer(closed) {
                    warn!("[{}/{}] uploader rejected closed artifact", key.0, key.1);
                }
            }
            None => debug!(
                "[{}/{}] no uploader configured, keeping {} local",
                key.0,
                key.1,
                closed.path.display()
            ),
        }
    }

    fn timing(&mut self, key: &ArtifactKey, now: DateTime<Local>) -> (f64, f64) {
        let time_diff = self
            .last_append
            .get(key)
            .map(|last| (now - *last).as_seconds_f64())
            .unwrap_or(0.0);
        let images_per_second = if time_diff > 0.0 { 1.0 / time_diff } else { 0.0 };
        self.last_append.insert(key.clone(), now);
        (time_diff, images_per_second)
    }
}

#[async_trait]
impl QueueProcessor for CsvAggregator {
    type Item = CsvRecord;

    fn name(&self) -> &'static str {
        "csv_writer"
    }

    async fn process(&mut self, record: CsvRecord) -> Result<()> {
        let key = (record.stage(), record.source_key().to_string());
        let now = Local::now();

        if let Some(artifact) = self.open.get(&key) {
            let elapsed = (now - artifact.created_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed >= self.config.interval {
                debug!(
                    "[{}/{}] csv interval elapsed ({:.1?}), rolling over",
                    key.0, key.1, elapsed
                );
                self.close_and_offer(&key);
            }
        }

        let timing = match &record {
            CsvRecord::Detection { .. } => Some(self.timing(&key, now)),
            CsvRecord::Classification { .. } => None,
        };

        let artifact = match self.open.entry(key.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Self::create_artifact(&self.config, &key, now)?)
            }
        };

        match &record {
            CsvRecord::Detection {
                at,
                image,
                particles,
                ..
            } => {
                let (time_diff, images_per_second) = timing.unwrap_or((0.0, 0.0));
                let timestamp = at.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
                let image = if image.is_empty() { "frame" } else { image.as_str() };
                for particle in particles {
                    let row = [
                        timestamp.clone(),
                        image.to_string(),
                        particle.xyxy_field(),
                        format!("{:.2}", particle.conf),
                        particle.width_px.to_string(),
                        particle.height_px.to_string(),
                        particle.width_mm.to_string(),
                        particle.height_mm.to_string(),
                        particle.max_d_mm.to_string(),
                        particle.volume_est.to_string(),
                        time_diff.to_string(),
                        format!("{images_per_second:.2}"),
                    ];
                    artifact.writer.write_record(&row)?;
                }
            }
            CsvRecord::Classification { at, tag, .. } => {
                let created = artifact
                    .created_at
                    .format("%Y-%m-%d %H:%M:%S%.6f")
                    .to_string();
                let status = at.format("%Y-%m-%d %H:%M:%S%.6f").to_string();
                artifact.writer.write_record([
                    self.config.settings.title.as_str(),
                    created.as_str(),
                    status.as_str(),
                    tag.as_str(),
                ])?;
            }
        }

        artifact.writer.flush()?;
        Ok(())
    }

    async fn finish(&mut self) {
        let keys: Vec<ArtifactKey> = self.open.keys().cloned().collect();
        if !keys.is_empty() {
            info!("closing {} open csv artifacts on shutdown", keys.len());
        }
        for key in keys {
            self.close_and_offer(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        offered: Mutex<Vec<ClosedArtifact>>,
    }

    impl ClosedArtifactSink for RecordingSink {
        fn offer(&self, artifact: ClosedArtifact) -> bool {
            self.offered.lock().unwrap().push(artifact);
            true
        }
    }

    fn particle() -> Particle {
        Particle {
            xyxy: [10.0, 20.0, 110.0, 240.0],
            conf: 0.912,
            width_px: 100,
            height_px: 220,
            width_mm: 375,
            height_mm: 825,
            max_d_mm: 743,
            volume_est: 4.2,
        }
    }

    fn aggregator(
        root: &std::path::Path,
        interval: Duration,
    ) -> (CsvAggregator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let mut config = CsvAggregatorConfig::new(root, ProjectSettings::default());
        config.interval = interval;
        (
            CsvAggregator::new(config, Some(sink.clone() as Arc<dyn ClosedArtifactSink>)),
            sink,
        )
    }

    fn detection(particles: Vec<Particle>) -> CsvRecord {
        CsvRecord::Detection {
            source_key: "webcam_0".into(),
            at: Local::now(),
            image: "frame_x.jpg".into(),
            particles,
        }
    }

    #[tokio::test]
    async fn writes_header_once_and_one_row_per_particle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agg, _sink) = aggregator(dir.path(), Duration::from_secs(60));

        agg.process(detection(vec![particle(), particle()])).await.unwrap();
        agg.process(detection(vec![particle()])).await.unwrap();

        let path = agg.open.values().next().unwrap().path.clone();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("timestamp,image,xyxy,conf"));
        // The xyxy field contains commas, so the writer must quote it.
        assert!(lines[1].contains("\"10, 20, 110, 240\""));
        assert!(lines[1].contains("0.91"));
        assert!(lines[1].contains("743"));
    }

    #[tokio::test]
    async fn first_detection_row_has_zero_timing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agg, _sink) = aggregator(dir.path(), Duration::from_secs(60));
        agg.process(detection(vec![particle()])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        agg.process(detection(vec![particle()])).await.unwrap();

        let path = agg.open.values().next().unwrap().path.clone();
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines[1].ends_with(",0,0.00"));
        // The second append carries a positive delta.
        let fields: Vec<&str> = lines[2].rsplitn(3, ',').collect();
        let ips: f64 = fields[0].parse().unwrap();
        assert!(ips > 0.0);
    }

    #[tokio::test]
    async fn rollover_closes_offers_then_opens() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agg, sink) = aggregator(dir.path(), Duration::from_millis(50));

        agg.process(detection(vec![particle()])).await.unwrap();
        let first_path = agg.open.values().next().unwrap().path.clone();
        tokio::time::sleep(Duration::from_millis(80)).await;
        agg.process(detection(vec![particle()])).await.unwrap();
        let second_path = agg.open.values().next().unwrap().path.clone();

        assert_ne!(first_path, second_path);
        let offered = sink.offered.lock().unwrap();
        assert_eq!(offered.len(), 1);
        assert_eq!(offered[0].path, first_path);
        assert_eq!(offered[0].stage, Stage::Detector);

        // The boundary record landed in the fresh artifact.
        let second = std::fs::read_to_string(&second_path).unwrap();
        assert_eq!(second.lines().count(), 2);
    }

    #[tokio::test]
    async fn classifier_rows_use_artifact_creation_time() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agg, _sink) = aggregator(dir.path(), Duration::from_secs(60));
        agg.process(CsvRecord::Classification {
            source_key: "simulator_0".into(),
            at: Local::now(),
            tag: "running".into(),
        })
        .await
        .unwrap();

        let artifact = agg.open.values().next().unwrap();
        let created = artifact
            .created_at
            .format("%Y-%m-%d %H:%M:%S%.6f")
            .to_string();
        let content = std::fs::read_to_string(&artifact.path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "ProjectTitle,FileCreationTimestamp,StatusTimestamp,Data");
        assert!(lines[1].starts_with("Belt Vision Project,"));
        assert!(lines[1].contains(&created));
        assert!(lines[1].ends_with(",running"));
    }

    #[tokio::test]
    async fn stages_and_sources_keep_separate_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agg, _sink) = aggregator(dir.path(), Duration::from_secs(60));
        agg.process(detection(vec![particle()])).await.unwrap();
        agg.process(CsvRecord::Classification {
            source_key: "webcam_0".into(),
            at: Local::now(),
            tag: "running".into(),
        })
        .await
        .unwrap();
        agg.process(CsvRecord::Detection {
            source_key: "simulator_0".into(),
            at: Local::now(),
            image: "f.jpg".into(),
            particles: vec![particle()],
        })
        .await
        .unwrap();
        assert_eq!(agg.open.len(), 3);
    }

    #[tokio::test]
    async fn finish_closes_and_offers_everything() {
        let dir = tempfile::tempdir().unwrap();
        let (mut agg, sink) = aggregator(dir.path(), Duration::from_secs(60));
        agg.process(detection(vec![particle()])).await.unwrap();
        agg.process(CsvRecord::Classification {
            source_key: "webcam_0".into(),
            at: Local::now(),
            tag: "running".into(),
        })
        .await
        .unwrap();

        agg.finish().await;
        assert!(agg.open.is_empty());
        assert_eq!(sink.offered.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn without_uploader_artifacts_stay_local() {
        let dir = tempfile::tempdir().unwrap();
        let mut config =
            CsvAggregatorConfig::new(dir.path(), ProjectSettings::default());
        config.interval = Duration::ZERO;
        let mut agg = CsvAggregator::new(config, None);

        agg.process(detection(vec![particle()])).await.unwrap();
        agg.process(detection(vec![particle()])).await.unwrap();
        agg.finish().await;

        let dir = dir
            .path()
            .join("iris_data")
            .join("model");
        let files: Vec<_> = std::fs::read_dir(dir).unwrap().collect();
        assert_eq!(files.len(), 2);
    }
}
