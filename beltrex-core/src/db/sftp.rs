use beltrex_model::SftpServerInfo;
use sqlx::SqlitePool;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SftpRepository {
    pool: SqlitePool,
}

impl SftpRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// First configured server, if any. No server means uploads are skipped.
    pub async fn first(&self) -> Result<Option<SftpServerInfo>> {
        let server = sqlx::query_as::<_, SftpServerInfo>(
            "SELECT server_name, username, password FROM sftp_servers ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(server)
    }

    pub async fn insert(&self, server: &SftpServerInfo) -> Result<()> {
        sqlx::query(
            "INSERT INTO sftp_servers (server_name, username, password) VALUES (?, ?, ?)",
        )
        .bind(&server.server_name)
        .bind(&server.username)
        .bind(&server.password)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
