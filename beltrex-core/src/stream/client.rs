//! Streaming HTTP client for upstream MJPEG producers and health probes.
//!
//! Connections are pooled per host. Opening a stream never sets a read
//! timeout (the body is open-ended); instead every chunk read observes the
//! task's cancellation token, and dropping the stream force-closes the
//! underlying connection so nothing stays blocked.

use std::pin::Pin;
use std::time::Duration;

use beltrex_model::DeviceEntry;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Connect-phase timeout; reads are unbounded.
    pub connect_timeout: Duration,
    /// Idle connections kept per upstream host.
    pub pool_max_per_host: usize,
    /// Default timeout for one-shot probes.
    pub probe_timeout: Duration,
}

impl Default for StreamClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_max_per_host: 4,
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Shared HTTP client; cheap to clone.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    probe_timeout: Duration,
}

impl StreamClient {
    pub fn new(config: StreamClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_per_host)
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            probe_timeout: config.probe_timeout,
        })
    }

    /// Open a streaming GET against `url`. The returned stream yields raw
    /// byte chunks until error or cancellation.
    pub async fn open_stream(&self, url: &str, token: CancellationToken) -> Result<ByteStream> {
        let request = self.http.get(url).send();
        let response = tokio::select! {
            _ = token.cancelled() => return Err(PipelineError::Shutdown),
            response = request => response.map_err(|e| PipelineError::from_reqwest(e, true))?,
        };
        if !response.status().is_success() {
            return Err(PipelineError::Connect(format!(
                "{url} answered {}",
                response.status()
            )));
        }
        debug!("stream opened: {url}");
        Ok(ByteStream {
            inner: Box::pin(response.bytes_stream()),
            token,
        })
    }

    /// One-shot GET used for health probes; returns the status code.
    pub async fn probe(&self, url: &str, timeout: Option<Duration>) -> Result<StatusCode> {
        let response = self
            .http
            .get(url)
            .timeout(timeout.unwrap_or(self.probe_timeout))
            .send()
            .await
            .map_err(|e| PipelineError::from_reqwest(e, true))?;
        Ok(response.status())
    }

    /// Fetch the device listing a source's health endpoint publishes.
    pub async fn devices(&self, url: &str, timeout: Option<Duration>) -> Result<Vec<DeviceEntry>> {
        let response = self
            .http
            .get(url)
            .timeout(timeout.unwrap_or(self.probe_timeout))
            .send()
            .await
            .map_err(|e| PipelineError::from_reqwest(e, true))?;
        if !response.status().is_success() {
            return Err(PipelineError::Connect(format!(
                "{url} answered {}",
                response.status()
            )));
        }
        response
            .json::<Vec<DeviceEntry>>()
            .await
            .map_err(|e| PipelineError::Transport(e.to_string()))
    }
}

/// Lazy sequence of raw byte chunks from one upstream stream.
pub struct ByteStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    token: CancellationToken,
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}

impl ByteStream {
    /// Read the next chunk. Returns `Ok(None)` on remote EOF and
    /// `Err(Shutdown)` as soon as the task's token is cancelled, even if the
    /// underlying read is blocked.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        tokio::select! {
            _ = self.token.cancelled() => Err(PipelineError::Shutdown),
            chunk = self.inner.next() => match chunk {
                Some(Ok(bytes)) => Ok(Some(bytes)),
                Some(Err(e)) => Err(PipelineError::from_reqwest(e, false)),
                None => Ok(None),
            },
        }
    }
}
