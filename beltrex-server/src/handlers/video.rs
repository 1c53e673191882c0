//! Visualization endpoints: pass upstream MJPEG through unchanged, or
//! decode-annotate-re-encode when a model or classifier is requested.
//!
//! Viewers of the same source share one upstream connection through the
//! fan-out broker. This path is independent of data collection: no frames
//! are persisted, no CSV rows are written, no uploads happen, and no task is
//! registered.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::Response;
use beltrex_core::inference::{BeltClassifier, ObjectDetector};
use beltrex_core::workers::classifier::resolve_class_tag;
use beltrex_core::workers::decode_frame;
use beltrex_core::PipelineError;
use beltrex_model::{DetectorParams, SourceKind};
use bytes::Bytes;
use image::{Rgb, RgbImage};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::errors::ApiError;
use crate::AppState;

const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// How long a viewer waits for the first frame before reporting the source
/// unreachable.
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Deserialize)]
pub struct VideoQuery {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub classifier: Option<String>,
    #[serde(default)]
    pub settings: Option<String>,
}

pub async fn webcam_video(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> Result<Response, ApiError> {
    stream_video(state, SourceKind::Webcam, 0, query).await
}

pub async fn legacy_video(
    State(state): State<AppState>,
    Path(device_id): Path<u32>,
    Query(query): Query<VideoQuery>,
) -> Result<Response, ApiError> {
    stream_video(state, SourceKind::Legacy, device_id, query).await
}

pub async fn simulator_video(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> Result<Response, ApiError> {
    stream_video(state, SourceKind::Simulator, 0, query).await
}

struct DetectorView {
    engine: Arc<dyn ObjectDetector>,
    params: DetectorParams,
}

struct ClassifierView {
    engine: Arc<dyn BeltClassifier>,
    class_names: Vec<String>,
}

async fn stream_video(
    state: AppState,
    kind: SourceKind,
    device_id: u32,
    query: VideoQuery,
) -> Result<Response, ApiError> {
    let url = state.config.video_url(kind, device_id);
    let model = query.model.filter(|v| !v.is_empty());
    let classifier = query.classifier.filter(|v| !v.is_empty());
    let settings = query.settings.filter(|v| !v.is_empty());

    let mut frames = state.resources.broker.subscribe(&url);
    let first = first_frame(&mut frames, &url).await?;

    // Plain pass-through when no processing is requested.
    if model.is_none() && classifier.is_none() {
        let body = async_stream::stream! {
            yield Ok::<Bytes, Infallible>(plain_part(&first));
            loop {
                match frames.recv().await {
                    Ok(frame) => yield Ok(plain_part(&frame)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("viewer lagging, skipped {skipped} frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        return multipart_response(Body::from_stream(body));
    }

    let db = &state.resources.db;
    let detector = match model {
        Some(id) => {
            let record = db.models().load(&id).await?;
            let engine = state.provider.load_detector(&record)?;
            let params = db.detector_params().resolve(settings.as_deref()).await?;
            Some(DetectorView { engine, params })
        }
        None => None,
    };
    let classifier = match classifier {
        Some(id) => {
            let record = db.models().load(&id).await?;
            let engine = state.provider.load_classifier(&record)?;
            let class_names: Vec<String> = db
                .statuses()
                .all()
                .await?
                .into_iter()
                .map(|s| s.name)
                .collect();
            if class_names.is_empty() {
                return Err(ApiError::bad_request("class-status table is empty"));
            }
            Some(ClassifierView { engine, class_names })
        }
        None => None,
    };

    let body = async_stream::stream! {
        let mut render = move |frame: Bytes| {
            match annotate_frame(&frame, detector.as_ref(), classifier.as_ref()) {
                Ok(part) => part,
                Err(err) => {
                    // A frame that will not decode is passed through as-is.
                    debug!("annotation failed: {err}");
                    plain_part(&frame)
                }
            }
        };
        yield Ok::<Bytes, Infallible>(render(first));
        loop {
            match frames.recv().await {
                Ok(frame) => yield Ok(render(frame)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("viewer lagging, skipped {skipped} frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    multipart_response(Body::from_stream(body))
}

/// Wait for the broker to deliver the first frame; a closed channel means
/// the producer never reached the upstream.
async fn first_frame(
    frames: &mut broadcast::Receiver<Bytes>,
    url: &str,
) -> Result<Bytes, ApiError> {
    let deadline = tokio::time::Instant::now() + FIRST_FRAME_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, frames.recv()).await {
            Ok(Ok(frame)) => return Ok(frame),
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                return Err(ApiError::from(PipelineError::Connect(format!(
                    "{url} is not streaming"
                ))))
            }
            Err(_) => {
                return Err(ApiError::from(PipelineError::Timeout(format!(
                    "no frames from {url}"
                ))))
            }
        }
    }
}

fn multipart_response(body: Body) -> Result<Response, ApiError> {
    Response::builder()
        .header(header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE)
        .body(body)
        .map_err(|e| {
            ApiError::new(
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                e.to_string(),
            )
        })
}

fn plain_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

fn annotate_frame(
    jpeg: &[u8],
    detector: Option<&DetectorView>,
    classifier: Option<&ClassifierView>,
) -> beltrex_core::Result<Bytes> {
    let mut image = decode_frame(jpeg)?;

    if let Some(view) = detector {
        for detection in view.engine.detect(&image, view.params.min_conf)? {
            let [x1, y1, x2, y2] = detection.xyxy;
            draw_box(&mut image, x1 as i64, y1 as i64, x2 as i64, y2 as i64);
        }
    }

    // Burned-in text needs a font rasterizer; the belt status travels as a
    // part header instead.
    let belt_status = match classifier {
        Some(view) => {
            let (width, height) = view.engine.input_size();
            let resized =
                image::imageops::resize(&image, width, height, image::imageops::FilterType::Triangle);
            let index = view.engine.classify(&resized)?;
            Some(resolve_class_tag(&view.class_names, index, "visualization")?)
        }
        None => None,
    };

    let mut encoded = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut encoded);
    image::codecs::jpeg::JpegEncoder::new(&mut cursor)
        .encode_image(&image)
        .map_err(|e| PipelineError::Decode(e.to_string()))?;

    let mut part = Vec::with_capacity(encoded.len() + 96);
    part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n");
    if let Some(status) = belt_status {
        part.extend_from_slice(format!("X-Belt-Status: {status}\r\n").as_bytes());
    }
    part.extend_from_slice(b"\r\n");
    part.extend_from_slice(&encoded);
    part.extend_from_slice(b"\r\n");
    Ok(Bytes::from(part))
}

/// Two-pixel bounding-box outline.
fn draw_box(image: &mut RgbImage, x1: i64, y1: i64, x2: i64, y2: i64) {
    const COLOR: Rgb<u8> = Rgb([255, 0, 0]);
    const THICKNESS: i64 = 2;

    let (width, height) = image.dimensions();
    let clamp_x = |x: i64| x.clamp(0, width as i64 - 1) as u32;
    let clamp_y = |y: i64| y.clamp(0, height as i64 - 1) as u32;

    for offset in 0..THICKNESS {
        let (top, bottom) = (clamp_y(y1 + offset), clamp_y(y2 - offset));
        for x in clamp_x(x1)..=clamp_x(x2) {
            image.put_pixel(x, top, COLOR);
            image.put_pixel(x, bottom, COLOR);
        }
        let (left, right) = (clamp_x(x1 + offset), clamp_x(x2 - offset));
        for y in clamp_y(y1)..=clamp_y(y2) {
            image.put_pixel(left, y, COLOR);
            image.put_pixel(right, y, COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_box_stays_in_bounds() {
        let mut image = RgbImage::new(32, 32);
        // Coordinates partly outside the frame must not panic.
        draw_box(&mut image, -5, -5, 40, 40);
        assert_eq!(*image.get_pixel(0, 0), Rgb([255, 0, 0]));
        assert_eq!(*image.get_pixel(31, 31), Rgb([255, 0, 0]));
    }

    #[test]
    fn plain_part_wraps_payload() {
        let part = plain_part(b"jpegdata");
        assert!(part.starts_with(b"--frame\r\n"));
        assert!(part.ends_with(b"jpegdata\r\n"));
    }
}
