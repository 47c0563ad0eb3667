//! GitHub implementation of the remote status API.

use async_trait::async_trait;
use gantry_core::Outcome;
use gantry_core::git::RepoRef;
use gantry_core::remote::{RemoteError, RemoteResult, RemoteStatusApi, StatusUpdate};
use reqwest::{RequestBuilder, StatusCode};
use serde::Serialize;
use tracing::debug;

const DEFAULT_API_URL: &str = "https://api.github.com";

/// Posts commit statuses and comments through the GitHub REST API.
pub struct GitHubStatusApi {
    client: reqwest::Client,
    api_url: String,
    access_token: String,
}

#[derive(Debug, Serialize)]
struct CreateStatus<'a> {
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_url: Option<&'a str>,
    description: &'a str,
    context: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateComment<'a> {
    body: &'a str,
}

impl GitHubStatusApi {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_api_url(DEFAULT_API_URL, access_token)
    }

    /// Talk to a GitHub Enterprise instance instead of github.com.
    pub fn with_api_url(api_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("User-Agent", "Gantry-CI")
            .header("Accept", "application/vnd.github+json")
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> RemoteResult<reqwest::Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(format!(
                "Failed to {}: {} - {}",
                what, status, text
            )));
        }
        Ok(response)
    }
}

/// Commit status state for an outcome.
fn status_state(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Success | Outcome::FailedOk => "success",
        Outcome::Failed => "failure",
        Outcome::Canceled => "error",
        Outcome::NotStarted | Outcome::Running => "pending",
    }
}

#[async_trait]
impl RemoteStatusApi for GitHubStatusApi {
    async fn update_status(&self, update: StatusUpdate<'_>) -> RemoteResult<()> {
        let repo = &update.commit.repository;
        let url = format!(
            "{}/repos/{}/{}/statuses/{}",
            self.api_url, repo.owner, repo.name, update.commit.sha
        );
        let body = CreateStatus {
            state: status_state(update.outcome),
            target_url: update.target_url,
            description: update.description,
            context: update.context,
        };

        self.send(self.client.post(&url).json(&body), "update status")
            .await?;
        debug!(commit = %update.commit, context = update.context, "Updated commit status");
        Ok(())
    }

    async fn post_comment(&self, thread: &str, text: &str) -> RemoteResult<()> {
        let body = CreateComment { body: text };
        self.send(self.client.post(thread).json(&body), "post comment")
            .await?;
        Ok(())
    }

    async fn is_collaborator(&self, user: &str, repo: &RepoRef) -> RemoteResult<bool> {
        let url = format!(
            "{}/repos/{}/{}/collaborators/{}",
            self.api_url, repo.owner, repo.name, user
        );
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(RemoteError::Api(format!(
                "Unexpected collaborator check response for {} on {}: {}",
                user, repo, status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_states() {
        assert_eq!(status_state(Outcome::Success), "success");
        assert_eq!(status_state(Outcome::FailedOk), "success");
        assert_eq!(status_state(Outcome::Failed), "failure");
        assert_eq!(status_state(Outcome::Canceled), "error");
        assert_eq!(status_state(Outcome::Running), "pending");
        assert_eq!(status_state(Outcome::NotStarted), "pending");
    }

    #[test]
    fn test_status_body_omits_missing_target() {
        let body = CreateStatus {
            state: "pending",
            target_url: None,
            description: "Waiting",
            context: "Build (linux)",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("target_url").is_none());
        assert_eq!(value["context"], "Build (linux)");
    }

    #[test]
    fn test_enterprise_url_trimmed() {
        let api = GitHubStatusApi::with_api_url("https://git.example.org/api/v3/", "token");
        assert_eq!(api.api_url, "https://git.example.org/api/v3");
    }
}
