use serde::{Deserialize, Serialize};
use std::fmt;

use crate::source::SourceKind;

/// Lifecycle state of a pipeline task.
///
/// Transitions are written by the ingest worker itself (plus `Stopping`, set
/// by the supervisor when a stop is signalled); readers always observe a
/// consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Registered, ingest worker not yet reading.
    Starting,
    /// At least one chunk received from upstream.
    Running,
    /// Stop signalled, worker still draining.
    Stopping,
    /// Worker exited cleanly.
    Stopped,
    /// Terminal error before stop.
    Error(String),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Stopped | TaskStatus::Error(_))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Starting => f.write_str("starting"),
            TaskStatus::Running => f.write_str("running"),
            TaskStatus::Stopping => f.write_str("stopping"),
            TaskStatus::Stopped => f.write_str("stopped"),
            TaskStatus::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Options accepted by a start-task request. Empty strings from the control
/// surface are normalized to `None` before they get here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartOptions {
    /// Detector model id, `name` or `name:version`.
    pub detector: Option<String>,
    /// Classifier model id, `name` or `name:version`.
    pub classifier: Option<String>,
    /// Detector-parameters record name.
    pub params: Option<String>,
}

/// Point-in-time view of one pipeline task, as exposed by the control
/// surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub key: String,
    pub source_kind: SourceKind,
    pub device_id: u32,
    pub detector_id: Option<String>,
    pub classifier_id: Option<String>,
    pub params_id: Option<String>,
    pub status: String,
    pub running: bool,
    pub frame_count: u64,
    pub uptime: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_control_surface() {
        assert_eq!(TaskStatus::Starting.to_string(), "starting");
        assert_eq!(TaskStatus::Running.to_string(), "running");
        assert_eq!(
            TaskStatus::Error("server-unreachable".into()).to_string(),
            "error: server-unreachable"
        );
    }

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Stopped.is_terminal());
        assert!(TaskStatus::Error("timeout".into()).is_terminal());
        assert!(!TaskStatus::Stopping.is_terminal());
    }
}
