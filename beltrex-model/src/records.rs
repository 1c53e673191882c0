use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing stage a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Detector,
    Classifier,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Detector => "detector",
            Stage::Classifier => "classifier",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected particle with all derived measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Bounding box `[x1, y1, x2, y2]` in pixels.
    pub xyxy: [f64; 4],
    pub conf: f64,
    pub width_px: i64,
    pub height_px: i64,
    pub width_mm: i64,
    pub height_mm: i64,
    /// Maximum dimension after the bounding-box correction factor, rounded.
    pub max_d_mm: i64,
    pub volume_est: f64,
}

impl Particle {
    /// Render the bounding box the way the CSV artifact stores it.
    pub fn xyxy_field(&self) -> String {
        format!(
            "{}, {}, {}, {}",
            self.xyxy[0], self.xyxy[1], self.xyxy[2], self.xyxy[3]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xyxy_field_is_comma_joined() {
        let particle = Particle {
            xyxy: [1.5, 2.0, 10.5, 20.0],
            conf: 0.91,
            width_px: 9,
            height_px: 18,
            width_mm: 33,
            height_mm: 67,
            max_d_mm: 60,
            volume_est: 1.0,
        };
        assert_eq!(particle.xyxy_field(), "1.5, 2, 10.5, 20");
    }
}
