//! SQLite persistence: configuration records read by the pipeline and the
//! frame index it writes. Schema is created on open; defaults are seeded the
//! first time so a fresh install starts usable.

mod detector_params;
mod frames;
mod models;
mod projects;
mod sftp;
mod statuses;

pub use detector_params::DetectorParamsRepository;
pub use frames::FrameRepository;
pub use models::ModelRepository;
pub use projects::ProjectSettingsRepository;
pub use sftp::SftpRepository;
pub use statuses::ClassStatusRepository;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS project_settings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vm_number TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    iris_main_folder TEXT NOT NULL DEFAULT 'iris_data',
    iris_classifier_subfolder TEXT NOT NULL DEFAULT 'classifier',
    iris_model_subfolder TEXT NOT NULL DEFAULT 'model',
    csv_interval_seconds INTEGER NOT NULL DEFAULT 60,
    image_processing_interval REAL NOT NULL DEFAULT 1.0,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS detector_params (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    min_conf REAL NOT NULL DEFAULT 0.8,
    min_d_detect INTEGER NOT NULL DEFAULT 200,
    max_d_detect INTEGER NOT NULL DEFAULT 10000,
    min_d_save INTEGER NOT NULL DEFAULT 200,
    max_d_save INTEGER NOT NULL DEFAULT 10000,
    particle_bb_dimension_factor REAL NOT NULL DEFAULT 0.9,
    est_particle_volume_x REAL NOT NULL DEFAULT 8.357470139e-11,
    est_particle_volume_exp REAL NOT NULL DEFAULT 3.02511466443,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS ml_models (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    version TEXT NOT NULL,
    model_type TEXT NOT NULL,
    description TEXT,
    blob BLOB NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(name, version)
);

CREATE TABLE IF NOT EXISTS model_status (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sftp_servers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_name TEXT NOT NULL,
    username TEXT NOT NULL,
    password TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS frame_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_key TEXT NOT NULL,
    captured_at TIMESTAMP NOT NULL,
    relative_path TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_frame_records_source
    ON frame_records(source_key, captured_at);
"#;

/// Handle to the aggregator database. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database file and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        info!("database ready at {}", path.display());
        Ok(db)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;

        // Seed single-row defaults so a fresh install is immediately usable.
        let settings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM project_settings")
            .fetch_one(&self.pool)
            .await?;
        if settings == 0 {
            let defaults = beltrex_model::ProjectSettings::default();
            self.projects().insert(&defaults).await?;
        }

        let params: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM detector_params")
            .fetch_one(&self.pool)
            .await?;
        if params == 0 {
            self.detector_params()
                .insert(&beltrex_model::DetectorParams::default())
                .await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn projects(&self) -> ProjectSettingsRepository {
        ProjectSettingsRepository::new(self.pool.clone())
    }

    pub fn detector_params(&self) -> DetectorParamsRepository {
        DetectorParamsRepository::new(self.pool.clone())
    }

    pub fn models(&self) -> ModelRepository {
        ModelRepository::new(self.pool.clone())
    }

    pub fn statuses(&self) -> ClassStatusRepository {
        ClassStatusRepository::new(self.pool.clone())
    }

    pub fn sftp(&self) -> SftpRepository {
        SftpRepository::new(self.pool.clone())
    }

    pub fn frames(&self) -> FrameRepository {
        FrameRepository::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_seeds_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("beltrex.db")).await.unwrap();

        let settings = db.projects().current().await.unwrap();
        assert_eq!(settings.vm_number, "VM001");
        assert_eq!(settings.csv_interval_seconds, 60);

        let params = db.detector_params().resolve(None).await.unwrap();
        assert_eq!(params.name, "default");
        assert_eq!(params.max_d_detect, 10_000);
    }
}
