//! Pipeline supervisor: owns the registry of per-source ingest tasks and
//! their lifecycle (start with pre-flight checks, stop with bounded waits,
//! retention of finished tasks for late status reads).

mod ingest;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use beltrex_model::{SourceDescriptor, StartOptions, TaskSnapshot, TaskStatus};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::db::Database;
use crate::error::{PipelineError, Result};
use crate::inference::InferenceProvider;
use crate::queue::WorkQueue;
use crate::storage::FrameSink;
use crate::stream::StreamClient;
use crate::workers::{ClassificationJob, DetectionJob};

use ingest::IngestContext;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Bounded wait for one ingest worker to exit after a stop signal.
    pub stop_timeout: Duration,
    /// Pre-start health probe timeout.
    pub probe_timeout: Duration,
    /// How long finished tasks stay visible before garbage collection.
    pub retention: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(2),
            retention: Duration::from_secs(60),
        }
    }
}

/// Collaborators injected into every ingest task.
pub struct PipelineDeps {
    pub client: StreamClient,
    pub db: Database,
    pub provider: Arc<dyn InferenceProvider>,
    pub sink: Arc<FrameSink>,
    pub detector_queue: WorkQueue<DetectionJob>,
    pub classifier_queue: WorkQueue<ClassificationJob>,
}

impl std::fmt::Debug for PipelineDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineDeps").finish_non_exhaustive()
    }
}

/// Shared state of one pipeline task. Status transitions are written by the
/// ingest worker itself (plus `Stopping` from the supervisor); readers take
/// snapshots.
pub(crate) struct TaskHandle {
    descriptor: SourceDescriptor,
    options: StartOptions,
    params_id: Option<String>,
    status: StdRwLock<TaskStatus>,
    frame_count: AtomicU64,
    started_at: Instant,
    last_activity: StdRwLock<Instant>,
    stopped_at: StdRwLock<Option<Instant>>,
    token: CancellationToken,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl TaskHandle {
    fn new(descriptor: SourceDescriptor, options: StartOptions, params_id: Option<String>) -> Self {
        Self {
            descriptor,
            options,
            params_id,
            status: StdRwLock::new(TaskStatus::Starting),
            frame_count: AtomicU64::new(0),
            started_at: Instant::now(),
            last_activity: StdRwLock::new(Instant::now()),
            stopped_at: StdRwLock::new(None),
            token: CancellationToken::new(),
            join: Mutex::new(None),
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.status.read().unwrap().clone()
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        let terminal = status.is_terminal();
        *self.status.write().unwrap() = status;
        if terminal {
            *self.stopped_at.write().unwrap() = Some(Instant::now());
        }
    }

    fn mark_stopping(&self) {
        let mut status = self.status.write().unwrap();
        if !status.is_terminal() {
            *status = TaskStatus::Stopping;
        }
    }

    pub(crate) fn running(&self) -> bool {
        !self.status().is_terminal()
    }

    pub(crate) fn count_frame(&self) {
        self.frame_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.write().unwrap() = Instant::now();
    }

    fn expired(&self, retention: Duration) -> bool {
        match *self.stopped_at.read().unwrap() {
            Some(stopped_at) => stopped_at.elapsed() > retention,
            None => false,
        }
    }

    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            key: self.descriptor.task_key(),
            source_kind: self.descriptor.kind,
            device_id: self.descriptor.device_id,
            detector_id: self.options.detector.clone(),
            classifier_id: self.options.classifier.clone(),
            params_id: self.params_id.clone(),
            status: self.status().to_string(),
            running: self.running(),
            frame_count: self.frame_count.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed().as_secs(),
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("key", &self.descriptor.task_key())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct PipelineSupervisor {
    config: SupervisorConfig,
    deps: PipelineDeps,
    tasks: RwLock<HashMap<String, Arc<TaskHandle>>>,
}

impl PipelineSupervisor {
    pub fn new(config: SupervisorConfig, deps: PipelineDeps) -> Self {
        Self {
            config,
            deps,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Start an ingest task for `descriptor`.
    ///
    /// Rejects duplicates, probes the source's health URL, and pre-loads
    /// every model the options name so a doomed start fails here instead of
    /// mid-stream.
    pub async fn start_task(
        &self,
        descriptor: SourceDescriptor,
        options: StartOptions,
    ) -> Result<String> {
        let key = descriptor.task_key();
        {
            let tasks = self.tasks.read().await;
            if tasks.get(&key).is_some_and(|t| t.running()) {
                return Err(PipelineError::Config(format!(
                    "task {key} is already running"
                )));
            }
        }

        let probe = self
            .deps
            .client
            .probe(&descriptor.health_url, Some(self.config.probe_timeout))
            .await?;
        if probe != reqwest::StatusCode::OK {
            return Err(PipelineError::Connect(format!(
                "{} health probe answered {probe}",
                descriptor.kind
            )));
        }

        let settings = self.deps.db.projects().current().await?;
        let interval = Duration::from_secs_f64(settings.image_processing_interval.max(0.0));

        let mut params_id = None;
        let detector = match &options.detector {
            Some(id) => {
                let record = self.deps.db.models().load(id).await?;
                let engine = self.deps.provider.load_detector(&record)?;
                let params = self
                    .deps
                    .db
                    .detector_params()
                    .resolve(options.params.as_deref())
                    .await?;
                params_id = Some(params.name.clone());
                info!("[{key}] detector {id} loaded with parameters '{}'", params.name);
                Some((engine, Arc::new(params)))
            }
            None => None,
        };
        let classifier = match &options.classifier {
            Some(id) => {
                let record = self.deps.db.models().load(id).await?;
                let engine = self.deps.provider.load_classifier(&record)?;
                let names: Vec<String> = self
                    .deps
                    .db
                    .statuses()
                    .all()
                    .await?
                    .into_iter()
                    .map(|s| s.name)
                    .collect();
                if names.is_empty() {
                    return Err(PipelineError::Config(
                        "class-status table is empty".into(),
                    ));
                }
                info!("[{key}] classifier {id} loaded with {} statuses", names.len());
                Some((engine, Arc::new(names)))
            }
            None => None,
        };

        let handle = Arc::new(TaskHandle::new(descriptor.clone(), options, params_id));
        {
            let mut tasks = self.tasks.write().await;
            if tasks.get(&key).is_some_and(|t| t.running()) {
                return Err(PipelineError::Config(format!(
                    "task {key} is already running"
                )));
            }
            tasks.insert(key.clone(), Arc::clone(&handle));
        }

        let ctx = IngestContext {
            key: key.clone(),
            url: descriptor.stream_url,
            client: self.deps.client.clone(),
            sink: Arc::clone(&self.deps.sink),
            detector_queue: self.deps.detector_queue.clone(),
            classifier_queue: self.deps.classifier_queue.clone(),
            detector,
            classifier,
            interval,
        };
        let join = tokio::spawn(ingest::run(ctx, Arc::clone(&handle)));
        *handle.join.lock().await = Some(join);

        info!("started task {key}");
        Ok(key)
    }

    /// Stop one task: signal cancellation (which force-closes the stream so
    /// any blocked read returns) and wait up to the configured timeout.
    /// Stopping an unknown or already-stopped task succeeds.
    pub async fn stop_task(&self, key: &str) -> Result<bool> {
        let handle = {
            let tasks = self.tasks.read().await;
            tasks.get(key).cloned()
        };
        let Some(handle) = handle else {
            info!("task {key} not found (already stopped and cleaned up)");
            return Ok(true);
        };

        handle.mark_stopping();
        handle.token.cancel();

        let join = handle.join.lock().await.take();
        let Some(join) = join else {
            return Ok(true);
        };
        match tokio::time::timeout(self.config.stop_timeout, join).await {
            Ok(_) => {
                info!("task {key} stopped");
                Ok(true)
            }
            Err(_) => {
                warn!(
                    "task {key} did not stop within {:?}",
                    self.config.stop_timeout
                );
                handle.set_status(TaskStatus::Error("shutdown-timeout".into()));
                Ok(false)
            }
        }
    }

    /// Signal every task, then wait for all of them within `timeout` total.
    pub async fn stop_all(&self, timeout: Duration) -> bool {
        let handles: Vec<(String, Arc<TaskHandle>)> = {
            let tasks = self.tasks.read().await;
            tasks
                .iter()
                .map(|(k, h)| (k.clone(), Arc::clone(h)))
                .collect()
        };

        // Signal everything first so the waits overlap.
        for (_, handle) in &handles {
            handle.mark_stopping();
            handle.token.cancel();
        }
        info!("stopping all {} tasks...", handles.len());

        let deadline = Instant::now() + timeout;
        let mut all_stopped = true;
        for (key, handle) in handles {
            let join = handle.join.lock().await.take();
            let Some(join) = join else { continue };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, join).await {
                Ok(_) => info!("task {key} stopped"),
                Err(_) => {
                    warn!("task {key} did not stop before the deadline");
                    handle.set_status(TaskStatus::Error("shutdown-timeout".into()));
                    all_stopped = false;
                }
            }
        }
        all_stopped
    }

    pub async fn status_of(&self, key: &str) -> Option<TaskStatus> {
        let tasks = self.tasks.read().await;
        tasks.get(key).map(|h| h.status())
    }

    /// Snapshot every tracked task, garbage-collecting those that finished
    /// longer than the retention window ago.
    pub async fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.gc_finished().await;
        let tasks = self.tasks.read().await;
        let mut snapshots: Vec<TaskSnapshot> = tasks.values().map(|h| h.snapshot()).collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    pub async fn active_count(&self) -> usize {
        let tasks = self.tasks.read().await;
        tasks.values().filter(|h| h.running()).count()
    }

    pub async fn total_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    async fn gc_finished(&self) {
        let retention = self.config.retention;
        let mut tasks = self.tasks.write().await;
        tasks.retain(|key, handle| {
            let keep = !handle.expired(retention);
            if !keep {
                info!("cleaned up stopped task {key}");
            }
            keep
        });
    }
}
