use beltrex_model::ClassStatus;
use sqlx::SqlitePool;

use crate::error::Result;

/// Ordered class-status table: classifier indices resolve through it.
#[derive(Debug, Clone)]
pub struct ClassStatusRepository {
    pool: SqlitePool,
}

impl ClassStatusRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn all(&self) -> Result<Vec<ClassStatus>> {
        let rows = sqlx::query_as::<_, ClassStatus>(
            "SELECT id, name FROM model_status ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn insert(&self, id: i64, name: &str) -> Result<()> {
        sqlx::query("INSERT INTO model_status (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
