use serde::{Deserialize, Serialize};
use std::fmt;

/// Observed availability of an upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Unknown,
    Available,
    Unavailable,
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Unknown => f.write_str("unknown"),
            ServerStatus::Available => f.write_str("available"),
            ServerStatus::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// One device entry as reported by an upstream health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub id: u32,
    pub info: String,
    pub status: String,
}
