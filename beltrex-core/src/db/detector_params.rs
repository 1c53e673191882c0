use beltrex_model::DetectorParams;
use sqlx::SqlitePool;

use crate::error::{PipelineError, Result};

const COLUMNS: &str = "name, min_conf, min_d_detect, max_d_detect, \
     min_d_save, max_d_save, particle_bb_dimension_factor, \
     est_particle_volume_x, est_particle_volume_exp";

#[derive(Debug, Clone)]
pub struct DetectorParamsRepository {
    pool: SqlitePool,
}

impl DetectorParamsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, name: &str) -> Result<Option<DetectorParams>> {
        let params = sqlx::query_as::<_, DetectorParams>(&format!(
            "SELECT {COLUMNS} FROM detector_params WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(params)
    }

    pub async fn first(&self) -> Result<Option<DetectorParams>> {
        let params = sqlx::query_as::<_, DetectorParams>(&format!(
            "SELECT {COLUMNS} FROM detector_params ORDER BY id LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(params)
    }

    /// Resolve a named record, or fall back to the first stored one.
    pub async fn resolve(&self, name: Option<&str>) -> Result<DetectorParams> {
        match name {
            Some(name) => self.get(name).await?.ok_or_else(|| {
                PipelineError::Config(format!("detector parameters '{name}' not found"))
            }),
            None => self.first().await?.ok_or_else(|| {
                PipelineError::Config("no detector parameters configured".into())
            }),
        }
    }

    pub async fn insert(&self, params: &DetectorParams) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO detector_params ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&params.name)
        .bind(params.min_conf)
        .bind(params.min_d_detect)
        .bind(params.max_d_detect)
        .bind(params.min_d_save)
        .bind(params.max_d_save)
        .bind(params.particle_bb_dimension_factor)
        .bind(params.est_particle_volume_x)
        .bind(params.est_particle_volume_exp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
