//! # Beltrex Core
//!
//! Pipeline core of the Beltrex edge aggregator: connects to upstream MJPEG
//! video sources, extracts frames under backpressure, routes sampled frames
//! through object-detection and belt-status classification stages, persists
//! frames and derived measurements locally, accumulates results into
//! time-bucketed CSV artifacts, and ships closed artifacts to a remote SFTP
//! endpoint.
//!
//! ## Architecture
//!
//! Per source: stream client → MJPEG framer → sampling gate → {detector,
//! classifier} workers → CSV aggregator → SFTP uploader. Every long-lived
//! worker is the single consumer of its own bounded queue; enqueue never
//! blocks and overflow drops the newest item. The [`supervisor`] owns task
//! lifecycles, [`registry::Resources`] owns construction and the shutdown
//! order.

pub mod db;
pub mod error;
pub mod gate;
pub mod health;
pub mod inference;
pub mod iris;
pub mod queue;
pub mod registry;
pub mod storage;
pub mod stream;
pub mod supervisor;
pub mod workers;

pub use db::Database;
pub use error::{PipelineError, Result};
pub use registry::{Resources, ResourcesConfig};
pub use supervisor::{PipelineSupervisor, SupervisorConfig};
