//! Event and pull request repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::event::{Event, EventKey, PullRequest};
use gantry_core::recipe::Cause;
use gantry_core::{CommitId, EventId, Outcome, PullRequestId, RepositoryId};

use super::PgStore;
use crate::{DbError, DbResult};

#[async_trait]
pub trait EventRepo: Send + Sync {
    async fn get_or_create_event(&self, key: &EventKey) -> DbResult<(Event, bool)>;

    async fn get_event(&self, id: EventId) -> DbResult<Event>;

    /// Attach trigger details to an event. `None` values leave the stored
    /// value untouched.
    async fn update_event_details(
        &self,
        id: EventId,
        pull_request: Option<PullRequestId>,
        comments_url: Option<&str>,
        payload: Option<&serde_json::Value>,
    ) -> DbResult<()>;

    async fn set_event_state(&self, id: EventId, complete: bool, status: Outcome) -> DbResult<()>;

    async fn events_for_pull_request(&self, pr: PullRequestId) -> DbResult<Vec<Event>>;

    async fn get_or_create_pull_request(
        &self,
        repository_id: RepositoryId,
        number: i64,
    ) -> DbResult<(PullRequest, bool)>;

    async fn find_pull_request(
        &self,
        repository_id: RepositoryId,
        number: i64,
    ) -> DbResult<Option<PullRequest>>;

    /// Store title, url and closed flag.
    async fn update_pull_request(&self, pr: &PullRequest) -> DbResult<()>;
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: uuid::Uuid,
    cause: String,
    build_user: String,
    base_id: uuid::Uuid,
    head_id: uuid::Uuid,
    pull_request_id: Option<uuid::Uuid>,
    complete: bool,
    status: String,
    comments_url: Option<String>,
    payload: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = DbError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let cause = row
            .cause
            .parse::<Cause>()
            .map_err(|e| DbError::Corrupt(format!("event {}: {}", row.id, e)))?;
        Ok(Event {
            id: EventId::from_uuid(row.id),
            cause,
            build_user: row.build_user,
            base: CommitId::from_uuid(row.base_id),
            head: CommitId::from_uuid(row.head_id),
            pull_request: row.pull_request_id.map(PullRequestId::from_uuid),
            complete: row.complete,
            status: Outcome::parse_lenient(&row.status).unwrap_or(Outcome::NotStarted),
            comments_url: row.comments_url,
            payload: row.payload,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PullRequestRow {
    id: uuid::Uuid,
    repository_id: uuid::Uuid,
    number: i64,
    title: String,
    url: Option<String>,
    closed: bool,
}

impl From<PullRequestRow> for PullRequest {
    fn from(row: PullRequestRow) -> Self {
        PullRequest {
            id: PullRequestId::from_uuid(row.id),
            repository_id: RepositoryId::from_uuid(row.repository_id),
            number: row.number,
            title: row.title,
            url: row.url,
            closed: row.closed,
        }
    }
}

const EVENT_COLUMNS: &str = "id, cause, build_user, base_id, head_id, pull_request_id, complete, \
                             status, comments_url, payload, created_at";

#[async_trait]
impl EventRepo for PgStore {
    async fn get_or_create_event(&self, key: &EventKey) -> DbResult<(Event, bool)> {
        let inserted = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            INSERT INTO events (id, cause, build_user, base_id, head_id, complete, status, created_at)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6, NOW())
            ON CONFLICT (build_user, base_id, head_id, cause) DO NOTHING
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(uuid::Uuid::now_v7())
        .bind(key.cause.as_str())
        .bind(&key.build_user)
        .bind(key.base.as_uuid())
        .bind(key.head.as_uuid())
        .bind(Outcome::NotStarted.as_str())
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok((row.try_into()?, true));
        }

        let row = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {} FROM events
            WHERE build_user = $1 AND base_id = $2 AND head_id = $3 AND cause = $4
            "#,
            EVENT_COLUMNS
        ))
        .bind(&key.build_user)
        .bind(key.base.as_uuid())
        .bind(key.head.as_uuid())
        .bind(key.cause.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_into()?, false))
    }

    async fn get_event(&self, id: EventId) -> DbResult<Event> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("event {}", id)))?;
        row.try_into()
    }

    async fn update_event_details(
        &self,
        id: EventId,
        pull_request: Option<PullRequestId>,
        comments_url: Option<&str>,
        payload: Option<&serde_json::Value>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE events SET
                pull_request_id = COALESCE($2, pull_request_id),
                comments_url = COALESCE($3, comments_url),
                payload = COALESCE($4, payload)
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(pull_request.map(uuid::Uuid::from))
        .bind(comments_url)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_event_state(&self, id: EventId, complete: bool, status: Outcome) -> DbResult<()> {
        sqlx::query("UPDATE events SET complete = $2, status = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(complete)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn events_for_pull_request(&self, pr: PullRequestId) -> DbResult<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM events WHERE pull_request_id = $1 ORDER BY created_at ASC",
            EVENT_COLUMNS
        ))
        .bind(pr.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Event::try_from).collect()
    }

    async fn get_or_create_pull_request(
        &self,
        repository_id: RepositoryId,
        number: i64,
    ) -> DbResult<(PullRequest, bool)> {
        let inserted = sqlx::query_as::<_, PullRequestRow>(
            r#"
            INSERT INTO pull_requests (id, repository_id, number)
            VALUES ($1, $2, $3)
            ON CONFLICT (repository_id, number) DO NOTHING
            RETURNING id, repository_id, number, title, url, closed
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(repository_id.as_uuid())
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok((row.into(), true));
        }

        let pr = self
            .find_pull_request(repository_id, number)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("pull request #{}", number)))?;
        Ok((pr, false))
    }

    async fn find_pull_request(
        &self,
        repository_id: RepositoryId,
        number: i64,
    ) -> DbResult<Option<PullRequest>> {
        let row = sqlx::query_as::<_, PullRequestRow>(
            r#"
            SELECT id, repository_id, number, title, url, closed
            FROM pull_requests WHERE repository_id = $1 AND number = $2
            "#,
        )
        .bind(repository_id.as_uuid())
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn update_pull_request(&self, pr: &PullRequest) -> DbResult<()> {
        sqlx::query("UPDATE pull_requests SET title = $2, url = $3, closed = $4 WHERE id = $1")
            .bind(pr.id.as_uuid())
            .bind(&pr.title)
            .bind(&pr.url)
            .bind(pr.closed)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
