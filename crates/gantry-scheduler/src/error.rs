//! Scheduler error types.

use gantry_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Db(DbError),
}

impl From<DbError> for SchedulerError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => SchedulerError::NotFound(what),
            other => SchedulerError::Db(other),
        }
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// Failure to ingest a trigger.
///
/// Only raised when the base state of an event (commits, pull request, the
/// event itself or its jobs) could not be stored. Remote notifications and
/// per-recipe activation failures are logged instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to materialize {what}: {source}")]
    Materialize {
        what: String,
        #[source]
        source: DbError,
    },
}

impl IngestError {
    pub(crate) fn materialize(what: impl Into<String>) -> impl FnOnce(DbError) -> IngestError {
        let what = what.into();
        move |source| IngestError::Materialize { what, source }
    }
}
