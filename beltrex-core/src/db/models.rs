use beltrex_model::ModelRecord;
use sqlx::SqlitePool;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct ModelRepository {
    pool: SqlitePool,
}

impl ModelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load a model record by `name` or `name:version` id.
    pub async fn load(&self, id: &str) -> Result<ModelRecord> {
        let (name, version) = ModelRecord::parse_id(id);
        let record = sqlx::query_as::<_, ModelRecord>(
            "SELECT name, version, model_type, description, blob \
             FROM ml_models WHERE name = ? AND version = ?",
        )
        .bind(name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        record.ok_or_else(|| PipelineError::Config(format!("model '{id}' not found")))
    }

    pub async fn insert(&self, record: &ModelRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO ml_models (name, version, model_type, description, blob) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.name)
        .bind(&record.version)
        .bind(&record.model_type)
        .bind(&record.description)
        .bind(&record.blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
