//! Talking to a Gantry server.

use async_trait::async_trait;
use gantry_core::JobId;
use gantry_core::protocol::{
    ClaimRequest, ClaimResponse, ClaimedJob, ReportMessage, ReportReply, WorkerIdentity,
    WorkerStatus,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

use crate::error::{ClientError, ClientResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The worker-facing endpoints of one server.
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Where this server lives, for logs and notices.
    fn url(&self) -> &str;

    async fn claim(&self, worker: &WorkerIdentity) -> ClientResult<Option<ClaimedJob>>;

    async fn report(&self, job: JobId, message: &ReportMessage) -> ClientResult<ReportReply>;

    async fn post_status(&self, status: &WorkerStatus) -> ClientResult<()>;
}

/// [`ServerApi`] over HTTP.
pub struct HttpServerApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpServerApi {
    pub fn new(base: Url) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base: with_trailing_slash(base),
        })
    }

    async fn post<B>(&self, path: &str, body: &B) -> ClientResult<reqwest::Response>
    where
        B: Serialize + Sync,
    {
        let url = self.base.join(path)?;
        let response = self.client.post(url).json(body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api { status, message });
        }
        Ok(response)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> ClientResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self.post(path, body).await?;
        Ok(response.json().await?)
    }
}

/// `Url::join` drops the last path segment unless the base ends in `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[async_trait]
impl ServerApi for HttpServerApi {
    fn url(&self) -> &str {
        self.base.as_str()
    }

    async fn claim(&self, worker: &WorkerIdentity) -> ClientResult<Option<ClaimedJob>> {
        let request = ClaimRequest {
            worker: worker.clone(),
        };
        let response: ClaimResponse = self.post_json("client/claim", &request).await?;
        Ok(response.job)
    }

    async fn report(&self, job: JobId, message: &ReportMessage) -> ClientResult<ReportReply> {
        self.post_json(&format!("client/jobs/{}/report", job), message)
            .await
    }

    async fn post_status(&self, status: &WorkerStatus) -> ClientResult<()> {
        self.post("client/status", status).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_keep_base_path() {
        let api = HttpServerApi::new(Url::parse("https://ci.example.org/gantry").unwrap()).unwrap();
        assert_eq!(api.url(), "https://ci.example.org/gantry/");
        assert_eq!(
            api.base.join("client/claim").unwrap().as_str(),
            "https://ci.example.org/gantry/client/claim"
        );
    }

    #[test]
    fn test_root_base() {
        let api = HttpServerApi::new(Url::parse("http://localhost:3000").unwrap()).unwrap();
        assert_eq!(
            api.base.join("client/status").unwrap().as_str(),
            "http://localhost:3000/client/status"
        );
    }
}
