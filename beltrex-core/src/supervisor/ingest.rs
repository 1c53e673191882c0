//! Per-task ingest loop: stream, frame, gate, fan out into the ML stages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use beltrex_model::{DetectorParams, Stage, TaskStatus};
use chrono::Local;
use tracing::{error, info};

use crate::error::{PipelineError, Result};
use crate::gate::{GateLane, SamplingGate};
use crate::inference::{BeltClassifier, ObjectDetector};
use crate::queue::WorkQueue;
use crate::storage::FrameSink;
use crate::stream::{MjpegFramer, StreamClient, STREAM_CHUNK_CHECK_INTERVAL};
use crate::workers::{ClassificationJob, DetectionJob};

use super::TaskHandle;

/// Everything an ingest worker needs, resolved up front at task start.
pub(crate) struct IngestContext {
    pub key: String,
    pub url: String,
    pub client: StreamClient,
    pub sink: Arc<FrameSink>,
    pub detector_queue: WorkQueue<DetectionJob>,
    pub classifier_queue: WorkQueue<ClassificationJob>,
    pub detector: Option<(Arc<dyn ObjectDetector>, Arc<DetectorParams>)>,
    pub classifier: Option<(Arc<dyn BeltClassifier>, Arc<Vec<String>>)>,
    pub interval: Duration,
}

pub(crate) async fn run(ctx: IngestContext, handle: Arc<TaskHandle>) {
    info!("[{}] starting stream processing of {}", ctx.key, ctx.url);

    let outcome = run_inner(&ctx, &handle).await;
    let cancelled = handle.token().is_cancelled();
    match outcome {
        Err(PipelineError::Shutdown) => handle.set_status(TaskStatus::Stopped),
        // Stream teardown during shutdown is the expected exit path.
        Err(PipelineError::Closed) | Err(PipelineError::Connect(_)) if cancelled => {
            handle.set_status(TaskStatus::Stopped)
        }
        Err(err) => {
            error!("[{}] ingest failed: {err}", ctx.key);
            handle.set_status(TaskStatus::Error(err.status_reason()));
        }
        Ok(()) => handle.set_status(TaskStatus::Stopped),
    }

    ctx.sink.end_session(&ctx.key);
    info!("[{}] ingest worker finished ({})", ctx.key, handle.status());
}

async fn run_inner(ctx: &IngestContext, handle: &Arc<TaskHandle>) -> Result<()> {
    let mut stream = ctx
        .client
        .open_stream(&ctx.url, handle.token().clone())
        .await?;
    let mut framer = MjpegFramer::new();
    let mut gate = SamplingGate::new(ctx.interval);
    let mut chunk_count: u64 = 0;
    let mut connected = false;

    loop {
        let chunk = match stream.next_chunk().await? {
            Some(chunk) => chunk,
            // Remote EOF outside shutdown means the upstream went away.
            None => return Err(PipelineError::Closed),
        };
        if !connected {
            info!("[{}] connected, receiving frames", ctx.key);
            handle.set_status(TaskStatus::Running);
            connected = true;
        }

        chunk_count += 1;
        if chunk_count % STREAM_CHUNK_CHECK_INTERVAL == 0 && handle.token().is_cancelled() {
            return Err(PipelineError::Shutdown);
        }

        for frame in framer.push(&chunk) {
            let captured_at = Local::now();
            let now = Instant::now();
            let filename = format!("frame_{}.jpg", captured_at.format("%Y%m%d_%H%M%S_%6f"));

            if gate.admit(GateLane::Save, now) {
                if let Err(err) = ctx
                    .sink
                    .save_frame(&ctx.key, captured_at, &filename, &frame)
                    .await
                {
                    // Reported but never aborts ingest.
                    error!("[{}] failed to save frame: {err}", ctx.key);
                }
            }

            let mut sampled = false;
            if let Some((detector, params)) = &ctx.detector {
                if gate.admit(GateLane::Stage(Stage::Detector), now) {
                    sampled = true;
                    ctx.detector_queue.enqueue(DetectionJob {
                        source_key: ctx.key.clone(),
                        frame: frame.clone(),
                        captured_at,
                        image_filename: filename.clone(),
                        detector: Arc::clone(detector),
                        params: Arc::clone(params),
                    });
                }
            }
            if let Some((classifier, class_names)) = &ctx.classifier {
                if gate.admit(GateLane::Stage(Stage::Classifier), now) {
                    sampled = true;
                    ctx.classifier_queue.enqueue(ClassificationJob {
                        source_key: ctx.key.clone(),
                        frame: frame.clone(),
                        captured_at,
                        classifier: Arc::clone(classifier),
                        class_names: Arc::clone(class_names),
                    });
                }
            }

            // One frame sampled into either stage counts once.
            if sampled {
                handle.count_frame();
            }
            handle.touch();
        }
    }
}
