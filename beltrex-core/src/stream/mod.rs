//! Upstream stream handling: HTTP client, MJPEG framing, and the shared
//! fan-out broker.

pub mod broker;
pub mod client;
pub mod framer;

pub use broker::FrameBroker;
pub use client::{ByteStream, StreamClient, StreamClientConfig};
pub use framer::{MjpegFramer, MAX_BUFFER_SIZE};

/// Cancellation is re-checked at least this often while consuming chunks.
pub const STREAM_CHUNK_CHECK_INTERVAL: u64 = 5;
