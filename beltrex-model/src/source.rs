use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of upstream MJPEG producer.
///
/// `Legacy` is the industrial stereo-camera front-end; `Simulator` replays a
/// recorded sequence from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Webcam,
    Legacy,
    Simulator,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Webcam => "webcam",
            SourceKind::Legacy => "legacy",
            SourceKind::Simulator => "simulator",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = UnknownSourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webcam" => Ok(SourceKind::Webcam),
            "legacy" => Ok(SourceKind::Legacy),
            "simulator" => Ok(SourceKind::Simulator),
            other => Err(UnknownSourceKind(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown source kind: {0}")]
pub struct UnknownSourceKind(pub String);

/// Immutable description of one upstream source, fixed for the lifetime of a
/// pipeline task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub device_id: u32,
    pub stream_url: String,
    pub health_url: String,
}

impl SourceDescriptor {
    /// Task key for this source: `{source-kind}_{device-id}`.
    pub fn task_key(&self) -> String {
        format!("{}_{}", self.kind, self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_key_combines_kind_and_device() {
        let source = SourceDescriptor {
            kind: SourceKind::Legacy,
            device_id: 3,
            stream_url: "http://localhost:5002/video/3".into(),
            health_url: "http://localhost:5002/devices".into(),
        };
        assert_eq!(source.task_key(), "legacy_3");
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [SourceKind::Webcam, SourceKind::Legacy, SourceKind::Simulator] {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("stereo".parse::<SourceKind>().is_err());
    }
}
