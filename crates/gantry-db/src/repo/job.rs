//! Job and step result repository, including the worker claim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::event::{Job, StepResult};
use gantry_core::protocol::WorkerIdentity;
use gantry_core::{EventId, JobId, Outcome, RecipeId};

use super::PgStore;
use crate::{DbError, DbResult};

#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Get or create the job for (event, recipe, config). New jobs start
    /// inactive, not ready, not complete and `NotStarted`.
    async fn get_or_create_job(
        &self,
        event: EventId,
        recipe: RecipeId,
        config: &str,
    ) -> DbResult<(Job, bool)>;

    async fn get_job(&self, id: JobId) -> DbResult<Job>;

    async fn jobs_for_event(&self, event: EventId) -> DbResult<Vec<Job>>;

    /// Put a job back into its initial state with the given `active` flag,
    /// dropping its step results and claim.
    async fn reset_job(&self, id: JobId, active: bool) -> DbResult<()>;

    async fn set_job_ready(&self, id: JobId, ready: bool) -> DbResult<()>;

    async fn set_job_active(&self, id: JobId, active: bool) -> DbResult<()>;

    /// Record a terminal outcome.
    async fn finish_job(&self, id: JobId, status: Outcome) -> DbResult<()>;

    /// Mark every incomplete job of an event `Canceled` and complete.
    /// Returns how many jobs changed.
    async fn cancel_incomplete_jobs(&self, event: EventId) -> DbResult<u64>;

    /// Atomically assign one claimable job to a worker.
    ///
    /// Claimable: ready, active, not complete, unclaimed, its event not
    /// complete, its config one the worker runs, and its recipe built for the
    /// user owning the worker's build key.
    async fn claim_job(&self, worker: &WorkerIdentity) -> DbResult<Option<Job>>;

    async fn step_results(&self, job: JobId) -> DbResult<Vec<StepResult>>;

    /// Step results of every job in an event.
    async fn step_results_for_event(&self, event: EventId) -> DbResult<Vec<StepResult>>;

    async fn start_step(&self, job: JobId, position: i32, name: &str) -> DbResult<()>;

    async fn append_step_output(&self, job: JobId, position: i32, chunk: &str) -> DbResult<()>;

    async fn finish_step(
        &self,
        job: JobId,
        position: i32,
        status: Outcome,
        exit_status: Option<i32>,
    ) -> DbResult<()>;
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: uuid::Uuid,
    event_id: uuid::Uuid,
    recipe_id: uuid::Uuid,
    config: String,
    active: bool,
    ready: bool,
    complete: bool,
    status: String,
    claimed_by: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            id: JobId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            recipe_id: RecipeId::from_uuid(row.recipe_id),
            config: row.config,
            active: row.active,
            ready: row.ready,
            complete: row.complete,
            status: Outcome::parse_lenient(&row.status).unwrap_or(Outcome::NotStarted),
            claimed_by: row.claimed_by,
            claimed_at: row.claimed_at,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    job_id: uuid::Uuid,
    position: i32,
    name: String,
    status: String,
    output: String,
    exit_status: Option<i32>,
}

impl From<StepRow> for StepResult {
    fn from(row: StepRow) -> Self {
        StepResult {
            job_id: JobId::from_uuid(row.job_id),
            position: row.position,
            name: row.name,
            status: Outcome::parse_lenient(&row.status).unwrap_or(Outcome::NotStarted),
            output: row.output,
            exit_status: row.exit_status,
        }
    }
}

const JOB_COLUMNS: &str =
    "id, event_id, recipe_id, config, active, ready, complete, status, claimed_by, claimed_at, created_at";

#[async_trait]
impl JobRepo for PgStore {
    async fn get_or_create_job(
        &self,
        event: EventId,
        recipe: RecipeId,
        config: &str,
    ) -> DbResult<(Job, bool)> {
        let inserted = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            INSERT INTO jobs (id, event_id, recipe_id, config, active, ready, complete, status, created_at)
            VALUES ($1, $2, $3, $4, FALSE, FALSE, FALSE, $5, NOW())
            ON CONFLICT (event_id, recipe_id, config) DO NOTHING
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(uuid::Uuid::now_v7())
        .bind(event.as_uuid())
        .bind(recipe.as_uuid())
        .bind(config)
        .bind(Outcome::NotStarted.as_str())
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok((row.into(), true));
        }

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE event_id = $1 AND recipe_id = $2 AND config = $3",
            JOB_COLUMNS
        ))
        .bind(event.as_uuid())
        .bind(recipe.as_uuid())
        .bind(config)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.into(), false))
    }

    async fn get_job(&self, id: JobId) -> DbResult<Job> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?;
        Ok(row.into())
    }

    async fn jobs_for_event(&self, event: EventId) -> DbResult<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE event_id = $1 ORDER BY created_at ASC, id ASC",
            JOB_COLUMNS
        ))
        .bind(event.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn reset_job(&self, id: JobId, active: bool) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM step_results WHERE job_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            UPDATE jobs SET active = $2, ready = FALSE, complete = FALSE, status = $3,
                claimed_by = NULL, claimed_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(active)
        .bind(Outcome::NotStarted.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_job_ready(&self, id: JobId, ready: bool) -> DbResult<()> {
        sqlx::query("UPDATE jobs SET ready = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(ready)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_job_active(&self, id: JobId, active: bool) -> DbResult<()> {
        sqlx::query("UPDATE jobs SET active = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish_job(&self, id: JobId, status: Outcome) -> DbResult<()> {
        sqlx::query("UPDATE jobs SET complete = TRUE, status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cancel_incomplete_jobs(&self, event: EventId) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET complete = TRUE, status = $2 WHERE event_id = $1 AND NOT complete",
        )
        .bind(event.as_uuid())
        .bind(Outcome::Canceled.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn claim_job(&self, worker: &WorkerIdentity) -> DbResult<Option<Job>> {
        // Concurrent claims never share a row.
        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE jobs
            SET claimed_by = $1, claimed_at = NOW(), status = $4
            WHERE id = (
                SELECT j.id FROM jobs j
                JOIN events e ON e.id = j.event_id
                JOIN recipes r ON r.id = j.recipe_id
                JOIN repositories rp ON rp.id = r.repository_id
                JOIN git_users owner ON owner.id = rp.user_id
                JOIN git_users builder ON builder.server = owner.server AND builder.name = r.creator
                WHERE j.ready AND j.active AND NOT j.complete AND j.claimed_by IS NULL
                  AND NOT e.complete
                  AND j.config = ANY($2)
                  AND builder.build_key = $3
                ORDER BY r.priority DESC, j.created_at ASC
                FOR UPDATE OF j SKIP LOCKED
                LIMIT 1
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(&worker.name)
        .bind(&worker.build_configs)
        .bind(&worker.build_key)
        .bind(Outcome::Running.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn step_results(&self, job: JobId) -> DbResult<Vec<StepResult>> {
        let rows = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT job_id, position, name, status, output, exit_status
            FROM step_results WHERE job_id = $1 ORDER BY position
            "#,
        )
        .bind(job.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn step_results_for_event(&self, event: EventId) -> DbResult<Vec<StepResult>> {
        let rows = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT s.job_id, s.position, s.name, s.status, s.output, s.exit_status
            FROM step_results s
            JOIN jobs j ON j.id = s.job_id
            WHERE j.event_id = $1
            ORDER BY s.job_id, s.position
            "#,
        )
        .bind(event.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn start_step(&self, job: JobId, position: i32, name: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO step_results (job_id, position, name, status, output)
            VALUES ($1, $2, $3, $4, '')
            ON CONFLICT (job_id, position) DO UPDATE SET
                name = EXCLUDED.name, status = EXCLUDED.status, output = '', exit_status = NULL
            "#,
        )
        .bind(job.as_uuid())
        .bind(position)
        .bind(name)
        .bind(Outcome::Running.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_step_output(&self, job: JobId, position: i32, chunk: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE step_results SET output = output || $3 WHERE job_id = $1 AND position = $2",
        )
        .bind(job.as_uuid())
        .bind(position)
        .bind(chunk)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("step {} of job {}", position, job)));
        }
        Ok(())
    }

    async fn finish_step(
        &self,
        job: JobId,
        position: i32,
        status: Outcome,
        exit_status: Option<i32>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE step_results SET status = $3, exit_status = $4 WHERE job_id = $1 AND position = $2",
        )
        .bind(job.as_uuid())
        .bind(position)
        .bind(status.as_str())
        .bind(exit_status)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("step {} of job {}", position, job)));
        }
        Ok(())
    }
}
