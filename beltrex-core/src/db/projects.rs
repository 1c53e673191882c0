use beltrex_model::ProjectSettings;
use sqlx::SqlitePool;

use crate::error::Result;

/// Single-row project configuration; the latest row wins.
#[derive(Debug, Clone)]
pub struct ProjectSettingsRepository {
    pool: SqlitePool,
}

impl ProjectSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn current(&self) -> Result<ProjectSettings> {
        let settings = sqlx::query_as::<_, ProjectSettings>(
            "SELECT vm_number, title, description, iris_main_folder, \
             iris_classifier_subfolder, iris_model_subfolder, \
             csv_interval_seconds, image_processing_interval \
             FROM project_settings ORDER BY id DESC LIMIT 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(settings)
    }

    pub async fn insert(&self, settings: &ProjectSettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO project_settings (vm_number, title, description, \
             iris_main_folder, iris_classifier_subfolder, iris_model_subfolder, \
             csv_interval_seconds, image_processing_interval) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&settings.vm_number)
        .bind(&settings.title)
        .bind(&settings.description)
        .bind(&settings.iris_main_folder)
        .bind(&settings.iris_classifier_subfolder)
        .bind(&settings.iris_model_subfolder)
        .bind(settings.csv_interval_seconds)
        .bind(settings.image_processing_interval)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
