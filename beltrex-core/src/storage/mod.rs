//! Local persistence of raw frames.

mod frame_sink;

pub use frame_sink::{FrameSink, FrameSinkConfig};
