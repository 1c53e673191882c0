//! Configuration records read by the pipeline core. All of these live in
//! SQLite and are immutable once loaded into a task.

use serde::{Deserialize, Serialize};

/// Single-row project settings record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProjectSettings {
    pub vm_number: String,
    pub title: String,
    pub description: Option<String>,
    pub iris_main_folder: String,
    pub iris_classifier_subfolder: String,
    pub iris_model_subfolder: String,
    /// Seconds a CSV artifact accumulates rows before rollover.
    pub csv_interval_seconds: i64,
    /// Minimum seconds between frames sampled into a stage.
    pub image_processing_interval: f64,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            vm_number: "VM001".into(),
            title: "Belt Vision Project".into(),
            description: Some("Default project configuration".into()),
            iris_main_folder: "iris_data".into(),
            iris_classifier_subfolder: "classifier".into(),
            iris_model_subfolder: "model".into(),
            csv_interval_seconds: 60,
            image_processing_interval: 1.0,
        }
    }
}

/// SFTP endpoint credentials. The first stored row wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SftpServerInfo {
    pub server_name: String,
    pub username: String,
    pub password: String,
}

/// Stored ML model record, keyed `name:version`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ModelRecord {
    pub name: String,
    pub version: String,
    pub model_type: String,
    pub description: Option<String>,
    pub blob: Vec<u8>,
}

impl ModelRecord {
    /// Split a `name` or `name:version` id; a bare name implies `1.0.0`.
    pub fn parse_id(id: &str) -> (&str, &str) {
        match id.split_once(':') {
            Some((name, version)) => (name, version),
            None => (id, "1.0.0"),
        }
    }
}

/// One row of the ordered class-status table used to resolve classifier
/// indices into belt-status tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ClassStatus {
    pub id: i64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_id_defaults_version() {
        assert_eq!(ModelRecord::parse_id("boulder:2.1.0"), ("boulder", "2.1.0"));
        assert_eq!(ModelRecord::parse_id("boulder"), ("boulder", "1.0.0"));
    }
}
