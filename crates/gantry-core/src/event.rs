//! Events, jobs and the normalized triggers that create them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::git::{CommitRef, RepoRef};
use crate::recipe::Cause;
use crate::{CommitId, Error, EventId, JobId, Outcome, PullRequestId, RecipeId, RepositoryId};

/// One trigger occurrence. Owns the jobs created for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub cause: Cause,
    pub build_user: String,
    pub base: CommitId,
    pub head: CommitId,
    pub pull_request: Option<PullRequestId>,
    pub complete: bool,
    /// Only meaningful once `complete` is set, or a fail-fast outcome was seen.
    pub status: Outcome,
    pub comments_url: Option<String>,
    /// The original trigger payload, kept for display.
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Natural key of an event; redelivered triggers map onto the same event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub build_user: String,
    pub base: CommitId,
    pub head: CommitId,
    pub cause: Cause,
}

/// One (recipe, build configuration, event) execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub event_id: EventId,
    pub recipe_id: RecipeId,
    pub config: String,
    /// Authorized to run.
    pub active: bool,
    /// Dependencies satisfied.
    pub ready: bool,
    pub complete: bool,
    pub status: Outcome,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Output and outcome of one recipe step within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub job_id: JobId,
    pub position: i32,
    pub name: String,
    pub status: Outcome,
    pub output: String,
    pub exit_status: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: PullRequestId,
    pub repository_id: RepositoryId,
    pub number: i64,
    pub title: String,
    pub url: Option<String>,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Closed,
    Reopened,
    Synchronize,
}

impl fmt::Display for PullRequestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PullRequestAction::Opened => "opened",
            PullRequestAction::Closed => "closed",
            PullRequestAction::Reopened => "reopened",
            PullRequestAction::Synchronize => "synchronize",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PullRequestAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opened" => Ok(PullRequestAction::Opened),
            "closed" => Ok(PullRequestAction::Closed),
            "reopened" => Ok(PullRequestAction::Reopened),
            "synchronize" => Ok(PullRequestAction::Synchronize),
            _ => Err(Error::unknown("pull request action", s)),
        }
    }
}

/// A push to a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTrigger {
    pub build_user: String,
    pub base: CommitRef,
    pub head: CommitRef,
    #[serde(default)]
    pub comments_url: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// An action on a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestTrigger {
    pub build_user: String,
    /// The user who opened or updated the pull request.
    pub author: String,
    pub number: i64,
    pub action: PullRequestAction,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    pub base: CommitRef,
    pub head: CommitRef,
    #[serde(default)]
    pub comments_url: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// A user asking to build the latest state of a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualTrigger {
    pub build_user: String,
    pub repository: RepoRef,
    pub branch: String,
    /// Sha of the latest commit on the branch.
    pub latest: String,
}

/// A normalized trigger, as delivered by provider-specific webhook parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Push(PushTrigger),
    PullRequest(PullRequestTrigger),
    Manual(ManualTrigger),
}

impl Trigger {
    pub fn cause(&self) -> Cause {
        match self {
            Trigger::Push(_) => Cause::Push,
            Trigger::PullRequest(_) => Cause::PullRequest,
            Trigger::Manual(_) => Cause::Manual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_tagged_json() {
        let json = serde_json::json!({
            "kind": "manual",
            "build_user": "moosebuild",
            "repository": { "server": "github.com", "owner": "idaholab", "name": "moose" },
            "branch": "devel",
            "latest": "abc123"
        });
        let trigger: Trigger = serde_json::from_value(json).unwrap();
        assert_eq!(trigger.cause(), Cause::Manual);
        match trigger {
            Trigger::Manual(m) => assert_eq!(m.branch, "devel"),
            other => panic!("unexpected trigger: {:?}", other),
        }
    }

    #[test]
    fn test_pull_request_action_parse() {
        assert_eq!(
            "synchronize".parse::<PullRequestAction>().unwrap(),
            PullRequestAction::Synchronize
        );
        assert!("labeled".parse::<PullRequestAction>().is_err());
    }
}
