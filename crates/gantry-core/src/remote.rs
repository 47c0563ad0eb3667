//! Remote status API seam.
//!
//! Ingestion posts commit statuses and pull request comments, and asks the
//! git server whether a user collaborates on a repository. Every call may
//! fail; callers log and carry on.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::Outcome;
use crate::git::{Commit, RepoRef};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("parse error: {0}")]
    Parse(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// A commit status as posted to the git server.
#[derive(Debug, Clone)]
pub struct StatusUpdate<'a> {
    pub commit: &'a Commit,
    pub outcome: Outcome,
    pub target_url: Option<&'a str>,
    pub description: &'a str,
    pub context: &'a str,
}

#[async_trait]
pub trait RemoteStatusApi: Send + Sync {
    /// Set the status of a commit for one context.
    async fn update_status(&self, update: StatusUpdate<'_>) -> RemoteResult<()>;

    /// Post a comment on a discussion thread (a pull request's comments URL).
    async fn post_comment(&self, thread: &str, text: &str) -> RemoteResult<()>;

    /// Whether `user` collaborates on `repo`.
    async fn is_collaborator(&self, user: &str, repo: &RepoRef) -> RemoteResult<bool>;
}

/// A remote API that talks to nobody. Used when no git server token is set.
#[derive(Debug, Clone, Default)]
pub struct NullStatusApi;

#[async_trait]
impl RemoteStatusApi for NullStatusApi {
    async fn update_status(&self, update: StatusUpdate<'_>) -> RemoteResult<()> {
        debug!(
            commit = %update.commit,
            outcome = %update.outcome,
            context = update.context,
            "Skipping status update"
        );
        Ok(())
    }

    async fn post_comment(&self, thread: &str, _text: &str) -> RemoteResult<()> {
        debug!(thread, "Skipping comment");
        Ok(())
    }

    async fn is_collaborator(&self, _user: &str, _repo: &RepoRef) -> RemoteResult<bool> {
        Ok(false)
    }
}
