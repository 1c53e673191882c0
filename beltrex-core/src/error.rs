use thiserror::Error;

/// Everything a pipeline worker can fail on.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("upstream unreachable: {0}")]
    Connect(String),

    #[error("upstream connect timed out: {0}")]
    Timeout(String),

    #[error("stream closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("remote transfer failed: {0}")]
    Remote(String),

    #[error("queue {0} is full")]
    QueueFull(&'static str),

    #[error("shutdown in progress")]
    Shutdown,
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::Storage(std::io::Error::other(err))
    }
}

impl PipelineError {
    /// Classify a reqwest failure. `connecting` distinguishes the
    /// connect phase (where timeouts are meaningful) from mid-stream reads.
    pub fn from_reqwest(err: reqwest::Error, connecting: bool) -> Self {
        if err.is_timeout() && connecting {
            PipelineError::Timeout(err.to_string())
        } else if err.is_connect() {
            PipelineError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            // Remote hung up mid-body.
            PipelineError::Closed
        } else {
            PipelineError::Transport(err.to_string())
        }
    }

    /// Short reason suitable for a task status string.
    pub fn status_reason(&self) -> String {
        match self {
            PipelineError::Connect(_) => "server-unreachable".into(),
            PipelineError::Timeout(_) => "timeout".into(),
            PipelineError::Closed => "server-unreachable".into(),
            other => {
                let text = other.to_string();
                let mut reason: String = text.chars().take(50).collect();
                if text.len() > reason.len() {
                    reason.push('…');
                }
                reason
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
