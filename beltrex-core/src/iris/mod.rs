//! IRIS delivery path: time-bucketed CSV artifacts and their SFTP upload.

mod aggregator;
mod uploader;

pub use aggregator::{CsvAggregator, CsvAggregatorConfig, CsvRecord};
pub use uploader::{SftpUploader, UploadJob};

use std::path::PathBuf;

use beltrex_model::Stage;
use chrono::{DateTime, Local};

use crate::queue::WorkQueue;

/// A CSV artifact the aggregator has closed and will never touch again.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedArtifact {
    pub path: PathBuf,
    pub stage: Stage,
    pub created_at: DateTime<Local>,
}

/// Narrow interface through which the aggregator hands over closed
/// artifacts. The aggregator never sees the uploader's internals.
pub trait ClosedArtifactSink: Send + Sync {
    /// Offer an artifact once; returns whether it was accepted.
    fn offer(&self, artifact: ClosedArtifact) -> bool;
}

impl ClosedArtifactSink for WorkQueue<UploadJob> {
    fn offer(&self, artifact: ClosedArtifact) -> bool {
        self.enqueue(UploadJob { artifact })
    }
}
