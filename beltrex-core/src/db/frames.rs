use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::Result;

/// Persistent index of every saved frame.
#[derive(Debug, Clone)]
pub struct FrameRepository {
    pool: SqlitePool,
}

impl FrameRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        source_key: &str,
        captured_at: DateTime<Utc>,
        relative_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO frame_records (source_key, captured_at, relative_path) \
             VALUES (?, ?, ?)",
        )
        .bind(source_key)
        .bind(captured_at)
        .bind(relative_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_for(&self, source_key: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM frame_records WHERE source_key = ?")
                .bind(source_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
