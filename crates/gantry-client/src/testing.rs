//! Shared fixtures for worker tests.

use async_trait::async_trait;
use gantry_core::protocol::{
    ClaimedJob, ReportMessage, ReportReply, ServerCommand, WorkerIdentity, WorkerStatus,
};
use gantry_core::recipe::RecipeStep;
use gantry_core::{EventId, JobId};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::api::ServerApi;
use crate::error::{ClientError, ClientResult};

/// In-process server that hands out queued jobs and records what it hears.
#[derive(Default)]
pub(crate) struct FakeServer {
    pub url: String,
    pub jobs: Mutex<VecDeque<ClaimedJob>>,
    pub claims: Mutex<usize>,
    pub reports: Mutex<Vec<(JobId, ReportMessage)>>,
    pub statuses: Mutex<Vec<WorkerStatus>>,
    /// Reply to every report with a cancel command.
    pub cancel_replies: bool,
    /// Fail every claim.
    pub broken: bool,
    /// Delay before each report is acknowledged.
    pub report_delay: Option<Duration>,
}

impl FakeServer {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn with_job(self, job: ClaimedJob) -> Self {
        self.jobs.lock().unwrap().push_back(job);
        self
    }

    pub fn reports(&self) -> Vec<(JobId, ReportMessage)> {
        self.reports.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<WorkerStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn claims(&self) -> usize {
        *self.claims.lock().unwrap()
    }
}

#[async_trait]
impl ServerApi for FakeServer {
    fn url(&self) -> &str {
        &self.url
    }

    async fn claim(&self, _worker: &WorkerIdentity) -> ClientResult<Option<ClaimedJob>> {
        *self.claims.lock().unwrap() += 1;
        if self.broken {
            return Err(ClientError::Api {
                status: 500,
                message: "database unavailable".to_string(),
            });
        }
        Ok(self.jobs.lock().unwrap().pop_front())
    }

    async fn report(&self, job: JobId, message: &ReportMessage) -> ClientResult<ReportReply> {
        if let Some(delay) = self.report_delay {
            tokio::time::sleep(delay).await;
        }
        self.reports.lock().unwrap().push((job, message.clone()));
        let command = self.cancel_replies.then_some(ServerCommand::Cancel);
        Ok(ReportReply { command })
    }

    async fn post_status(&self, status: &WorkerStatus) -> ClientResult<()> {
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }
}

pub(crate) fn step(name: &str, script: &str) -> RecipeStep {
    RecipeStep {
        name: name.to_string(),
        script: script.to_string(),
        abort_on_failure: true,
        allowed_to_fail: false,
    }
}

pub(crate) fn claimed_job(recipe: &str, steps: Vec<RecipeStep>) -> ClaimedJob {
    ClaimedJob {
        job_id: JobId::new(),
        event_id: EventId::new(),
        recipe_name: recipe.to_string(),
        config: "linux".to_string(),
        steps,
        env: BTreeMap::new(),
        base_sha: "base000".to_string(),
        head_sha: "head111".to_string(),
        head_branch: "main".to_string(),
        ssh_url: None,
    }
}
