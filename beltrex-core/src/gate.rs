//! Per-task sampling gate: admits at most one frame per configured interval
//! into each processing stage (and into the frame sink).

use std::time::{Duration, Instant};

use beltrex_model::Stage;

/// What the gate is throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateLane {
    Save,
    Stage(Stage),
}

/// Wall-clock throttle, one tracker per lane. State is per-task.
#[derive(Debug)]
pub struct SamplingGate {
    interval: Duration,
    last_save: Option<Instant>,
    last_detector: Option<Instant>,
    last_classifier: Option<Instant>,
}

impl SamplingGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_save: None,
            last_detector: None,
            last_classifier: None,
        }
    }

    /// Admit a frame into `lane` if the interval has elapsed since the last
    /// admitted frame. The first frame is always admitted.
    pub fn admit(&mut self, lane: GateLane, now: Instant) -> bool {
        let slot = match lane {
            GateLane::Save => &mut self.last_save,
            GateLane::Stage(Stage::Detector) => &mut self.last_detector,
            GateLane::Stage(Stage::Classifier) => &mut self.last_classifier,
        };
        match slot {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                *slot = Some(now);
                true
            }
        }
    }
}
