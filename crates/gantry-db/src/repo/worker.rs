//! Advisory worker status messages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::protocol::WorkerStatus;

use super::PgStore;
use crate::DbResult;

#[async_trait]
pub trait WorkerRepo: Send + Sync {
    /// Replace the last status message of a worker.
    async fn record_worker_status(&self, status: &WorkerStatus) -> DbResult<()>;

    /// Every known worker with its last message, by worker name.
    async fn worker_statuses(&self) -> DbResult<Vec<(WorkerStatus, DateTime<Utc>)>>;
}

#[derive(sqlx::FromRow)]
struct WorkerStatusRow {
    worker: String,
    message: String,
    updated_at: DateTime<Utc>,
}

#[async_trait]
impl WorkerRepo for PgStore {
    async fn record_worker_status(&self, status: &WorkerStatus) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO worker_statuses (worker, message, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (worker) DO UPDATE SET message = EXCLUDED.message, updated_at = NOW()
            "#,
        )
        .bind(&status.worker)
        .bind(&status.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn worker_statuses(&self) -> DbResult<Vec<(WorkerStatus, DateTime<Utc>)>> {
        let rows = sqlx::query_as::<_, WorkerStatusRow>(
            "SELECT worker, message, updated_at FROM worker_statuses ORDER BY worker",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    WorkerStatus {
                        worker: row.worker,
                        message: row.message,
                    },
                    row.updated_at,
                )
            })
            .collect())
    }
}
