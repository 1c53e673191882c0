//! Process-wide resource set. Everything is constructed up front with its
//! dependencies injected, and torn down in a fixed order: tasks first, then
//! the stage workers front-to-back so drained items still find a consumer
//! downstream, the uploader last among the workers, then the monitors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use beltrex_model::WorkerStatsSnapshot;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::health::HealthService;
use crate::inference::InferenceProvider;
use crate::iris::{
    ClosedArtifactSink, CsvAggregator, CsvAggregatorConfig, CsvRecord, SftpUploader, UploadJob,
};
use crate::queue::{QueueWorker, WorkQueue};
use crate::storage::{FrameSink, FrameSinkConfig};
use crate::stream::{FrameBroker, StreamClient, StreamClientConfig};
use crate::supervisor::{PipelineDeps, PipelineSupervisor, SupervisorConfig};
use crate::workers::{
    ClassificationJob, ClassifierProcessor, DetectionJob, DetectorProcessor,
};

#[derive(Debug, Clone)]
pub struct QueueCapacities {
    pub detector: usize,
    pub classifier: usize,
    pub csv: usize,
    pub uploader: usize,
}

impl Default for QueueCapacities {
    fn default() -> Self {
        Self {
            detector: 50,
            classifier: 50,
            csv: 200,
            uploader: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourcesConfig {
    /// Root for raw frame storage.
    pub frame_root: PathBuf,
    /// Root the local IRIS artifact tree is created under.
    pub artifact_root: PathBuf,
    pub client: StreamClientConfig,
    pub supervisor: SupervisorConfig,
    pub capacities: QueueCapacities,
    /// Per-worker drain timeout at shutdown.
    pub worker_stop_timeout: Duration,
    /// The uploader gets longer: jobs may be mid-transfer.
    pub uploader_stop_timeout: Duration,
}

impl ResourcesConfig {
    pub fn new(frame_root: impl Into<PathBuf>, artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            frame_root: frame_root.into(),
            artifact_root: artifact_root.into(),
            client: StreamClientConfig::default(),
            supervisor: SupervisorConfig::default(),
            capacities: QueueCapacities::default(),
            worker_stop_timeout: Duration::from_secs(5),
            uploader_stop_timeout: Duration::from_secs(30),
        }
    }
}

struct Workers {
    detector: QueueWorker<DetectionJob>,
    classifier: QueueWorker<ClassificationJob>,
    csv: QueueWorker<CsvRecord>,
    uploader: Option<QueueWorker<UploadJob>>,
}

/// Everything the aggregator process owns, with one shutdown path.
pub struct Resources {
    pub db: Database,
    pub client: StreamClient,
    pub supervisor: Arc<PipelineSupervisor>,
    pub health: Arc<HealthService>,
    /// Shares one upstream pull between concurrent viewers of a source.
    pub broker: Arc<FrameBroker>,
    config: ResourcesConfig,
    detector_queue: WorkQueue<DetectionJob>,
    classifier_queue: WorkQueue<ClassificationJob>,
    csv_queue: WorkQueue<CsvRecord>,
    uploader_queue: Option<WorkQueue<UploadJob>>,
    workers: Mutex<Option<Workers>>,
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources").finish_non_exhaustive()
    }
}

/// Stats surface exposed by the control adapter.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatsReport {
    pub model_detector: WorkerStatsSnapshot,
    pub classifier_processor: WorkerStatsSnapshot,
    pub csv_writer: WorkerStatsSnapshot,
    pub sftp_uploader: Option<WorkerStatsSnapshot>,
    pub tasks_active: usize,
    pub tasks_total: usize,
}

impl Resources {
    /// Build the full pipeline. Workers start immediately; ingest tasks are
    /// started later through the supervisor.
    pub async fn build(
        config: ResourcesConfig,
        db: Database,
        provider: Arc<dyn InferenceProvider>,
    ) -> Result<Arc<Self>> {
        let client = StreamClient::new(config.client.clone())?;
        let settings = db.projects().current().await?;

        let uploader_worker = match db.sftp().first().await? {
            Some(server) => {
                info!("using sftp server {}", server.server_name);
                Some(QueueWorker::spawn(
                    SftpUploader::new(server, &settings),
                    config.capacities.uploader,
                ))
            }
            None => {
                info!("no sftp server configured, closed artifacts stay local");
                None
            }
        };
        let uploader_queue = uploader_worker.as_ref().map(|w| w.queue());
        let artifact_sink = uploader_queue
            .clone()
            .map(|queue| Arc::new(queue) as Arc<dyn ClosedArtifactSink>);

        let csv_worker = QueueWorker::spawn(
            CsvAggregator::new(
                CsvAggregatorConfig::new(config.artifact_root.clone(), settings.clone()),
                artifact_sink,
            ),
            config.capacities.csv,
        );
        let csv_queue = csv_worker.queue();

        let detector_worker = QueueWorker::spawn(
            DetectorProcessor::new(csv_queue.clone()),
            config.capacities.detector,
        );
        let classifier_worker = QueueWorker::spawn(
            ClassifierProcessor::new(csv_queue.clone()),
            config.capacities.classifier,
        );

        let sink = Arc::new(FrameSink::new(
            FrameSinkConfig::new(config.frame_root.clone()),
            settings.title.clone(),
            db.frames(),
        ));

        let supervisor = Arc::new(PipelineSupervisor::new(
            config.supervisor.clone(),
            PipelineDeps {
                client: client.clone(),
                db: db.clone(),
                provider,
                sink,
                detector_queue: detector_worker.queue(),
                classifier_queue: classifier_worker.queue(),
            },
        ));
        let health = Arc::new(HealthService::new(client.clone()));
        let broker = Arc::new(FrameBroker::new(client.clone()));

        Ok(Arc::new(Self {
            db,
            client,
            supervisor,
            health,
            broker,
            detector_queue: detector_worker.queue(),
            classifier_queue: classifier_worker.queue(),
            csv_queue,
            uploader_queue,
            workers: Mutex::new(Some(Workers {
                detector: detector_worker,
                classifier: classifier_worker,
                csv: csv_worker,
                uploader: uploader_worker,
            })),
            config,
        }))
    }

    pub async fn worker_stats(&self) -> WorkerStatsReport {
        WorkerStatsReport {
            model_detector: self.detector_queue.stats(),
            classifier_processor: self.classifier_queue.stats(),
            csv_writer: self.csv_queue.stats(),
            sftp_uploader: self.uploader_queue.as_ref().map(|q| q.stats()),
            tasks_active: self.supervisor.active_count().await,
            tasks_total: self.supervisor.total_count().await,
        }
    }

    /// Fixed-order teardown. Safe to call once; later calls are no-ops.
    pub async fn shutdown(&self, grace: Duration) {
        info!("shutting down...");

        let task_timeout = self.config.supervisor.stop_timeout.min(grace);
        if !self.supervisor.stop_all(task_timeout).await {
            warn!("not all ingest tasks stopped cleanly");
        }

        let Some(workers) = self.workers.lock().await.take() else {
            return;
        };
        let worker_timeout = self.config.worker_stop_timeout;
        workers.detector.stop(worker_timeout).await;
        workers.classifier.stop(worker_timeout).await;
        // Closing the aggregator offers any still-open artifacts, so the
        // uploader must still be consuming at this point.
        workers.csv.stop(worker_timeout).await;
        if let Some(uploader) = workers.uploader {
            uploader.stop(self.config.uploader_stop_timeout).await;
        }

        self.health.stop_all().await;
        self.broker.shutdown();
        info!("shutdown complete");
    }
}
