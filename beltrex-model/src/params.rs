use serde::{Deserialize, Serialize};

/// Camera geometry is fixed by the belt installation: 900 px across a 240 mm
/// field of view.
pub const PIXELS_PER_MM: f64 = 1.0 / (900.0 / 240.0);

/// Named detector-parameters record.
///
/// Used both for filtering detections into the to-detect / to-save windows
/// and for deriving the per-particle millimetre fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct DetectorParams {
    pub name: String,
    /// Minimum confidence handed to the detector, 0..1.
    pub min_conf: f64,
    /// Reported-particle window, millimetres, inclusive on both ends.
    pub min_d_detect: i64,
    pub max_d_detect: i64,
    /// Stored-particle window, millimetres, inclusive on both ends.
    pub min_d_save: i64,
    pub max_d_save: i64,
    pub particle_bb_dimension_factor: f64,
    pub est_particle_volume_x: f64,
    pub est_particle_volume_exp: f64,
}

impl DetectorParams {
    pub fn pixels_per_mm(&self) -> f64 {
        PIXELS_PER_MM
    }
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            name: "default".into(),
            min_conf: 0.8,
            min_d_detect: 200,
            max_d_detect: 10_000,
            min_d_save: 200,
            max_d_save: 10_000,
            particle_bb_dimension_factor: 0.9,
            est_particle_volume_x: 8.357_470_139e-11,
            est_particle_volume_exp: 3.025_114_664_43,
        }
    }
}
