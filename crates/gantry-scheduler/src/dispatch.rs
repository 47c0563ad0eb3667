//! Job dispatch: claims from workers and the reports they stream back.

use gantry_core::event::Job;
use gantry_core::git::Commit;
use gantry_core::protocol::{
    ClaimedJob, JobSnapshot, ReportMessage, ReportReply, ServerCommand, WorkerIdentity,
    WorkerStatus,
};
use gantry_core::recipe::Recipe;
use gantry_core::remote::{RemoteStatusApi, StatusUpdate};
use gantry_core::{EventId, JobId, Outcome};
use gantry_db::{CiStore, DbResult};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::ingest::job_context;
use crate::readiness::{cancel_event, make_jobs_ready};

/// Hands ready jobs to workers and applies their progress reports.
pub struct JobDispatcher {
    store: Arc<dyn CiStore>,
    remote: Arc<dyn RemoteStatusApi>,
}

impl JobDispatcher {
    pub fn new(store: Arc<dyn CiStore>, remote: Arc<dyn RemoteStatusApi>) -> Self {
        Self { store, remote }
    }

    /// Claim one job for a worker, with everything needed to run it.
    pub async fn claim(&self, worker: &WorkerIdentity) -> SchedulerResult<Option<ClaimedJob>> {
        let Some(job) = self.store.claim_job(worker).await? else {
            return Ok(None);
        };
        info!(job_id = %job.id, worker = %worker.name, config = %job.config, "Claimed job");

        match self.claimed_job(&job).await {
            Ok(claimed) => Ok(Some(claimed)),
            Err(e) => {
                // The job cannot be described to the worker; fail it rather
                // than leave it claimed forever.
                warn!(job_id = %job.id, error = %e, "Failed to load claimed job");
                self.job_finished(job.id, Outcome::Failed).await?;
                Err(e)
            }
        }
    }

    async fn claimed_job(&self, job: &Job) -> SchedulerResult<ClaimedJob> {
        let recipe = self.store.get_recipe(job.recipe_id).await?;
        let event = self.store.get_event(job.event_id).await?;
        let base = self.store.get_commit(event.base).await?;
        let head = self.store.get_commit(event.head).await?;
        Ok(ClaimedJob {
            job_id: job.id,
            event_id: job.event_id,
            recipe_name: recipe.name,
            config: job.config.clone(),
            steps: recipe.steps,
            env: recipe.env,
            base_sha: base.sha,
            head_sha: head.sha,
            head_branch: head.branch,
            ssh_url: head.ssh_url,
        })
    }

    /// Apply one report from the worker running a job.
    ///
    /// The reply tells the worker to cancel when the job was finished by
    /// someone else (canceled, reset, or its event completed).
    pub async fn report(&self, job_id: JobId, message: &ReportMessage) -> SchedulerResult<ReportReply> {
        let job = self.store.get_job(job_id).await?;
        let event = self.store.get_event(job.event_id).await?;
        if job.complete || job.claimed_by.is_none() || event.complete {
            info!(job_id = %job_id, "Report for a job that is no longer running");
            return Ok(ReportReply {
                command: Some(ServerCommand::Cancel),
            });
        }

        match message {
            ReportMessage::StepStarted { position, name } => {
                self.store.start_step(job_id, *position, name).await?;
            }
            ReportMessage::Output { position, chunk } => {
                self.store
                    .append_step_output(job_id, *position, chunk)
                    .await?;
            }
            ReportMessage::StepFinished {
                position,
                outcome,
                exit_status,
            } => {
                self.store
                    .finish_step(job_id, *position, *outcome, *exit_status)
                    .await?;
            }
            ReportMessage::JobFinished { outcome } => {
                if !outcome.is_terminal() {
                    return Err(SchedulerError::InvalidInput(format!(
                        "job cannot finish as {}",
                        outcome
                    )));
                }
                self.job_finished(job_id, *outcome).await?;
            }
        }
        Ok(ReportReply::default())
    }

    /// Record a job's terminal outcome and re-evaluate its event.
    pub async fn job_finished(&self, job_id: JobId, outcome: Outcome) -> SchedulerResult<()> {
        self.store.finish_job(job_id, outcome).await?;
        let job = self.store.get_job(job_id).await?;
        info!(job_id = %job_id, outcome = %outcome, "Job finished");
        make_jobs_ready(self.store.as_ref(), job.event_id).await?;
        self.post_status(&job, outcome, outcome.as_str()).await;
        Ok(())
    }

    /// Let a job that was held for a developer run.
    pub async fn activate_job(&self, job_id: JobId) -> SchedulerResult<Job> {
        let job = self.store.get_job(job_id).await?;
        if job.active {
            return Ok(job);
        }
        self.store.set_job_active(job_id, true).await?;
        info!(job_id = %job_id, "Activated job");
        make_jobs_ready(self.store.as_ref(), job.event_id).await?;
        let job = self.store.get_job(job_id).await?;
        self.post_status(&job, Outcome::NotStarted, "Waiting").await;
        Ok(job)
    }

    pub async fn cancel_event(&self, event_id: EventId) -> SchedulerResult<()> {
        self.store.get_event(event_id).await?;
        cancel_event(self.store.as_ref(), event_id).await?;
        Ok(())
    }

    pub async fn snapshot(&self, job_id: JobId) -> SchedulerResult<JobSnapshot> {
        let job = self.store.get_job(job_id).await?;
        let steps = self.store.step_results(job_id).await?;
        let event = self.store.get_event(job.event_id).await?;
        Ok(JobSnapshot {
            job,
            steps,
            event_complete: event.complete,
            event_status: event.status,
        })
    }

    pub async fn record_worker_status(&self, status: &WorkerStatus) -> SchedulerResult<()> {
        self.store.record_worker_status(status).await?;
        Ok(())
    }

    /// Mirror a job's state onto the head commit of a pull request event.
    async fn post_status(&self, job: &Job, outcome: Outcome, description: &str) {
        let (recipe, head) = match self.status_target(job).await {
            Ok(Some(found)) => found,
            Ok(None) => return,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to load job for status update");
                return;
            }
        };
        let context = job_context(&recipe, &job.config);
        let update = StatusUpdate {
            commit: &head,
            outcome,
            target_url: None,
            description,
            context: &context,
        };
        if let Err(e) = self.remote.update_status(update).await {
            warn!(job_id = %job.id, error = %e, "Failed to post job status");
        }
    }

    async fn status_target(&self, job: &Job) -> DbResult<Option<(Recipe, Commit)>> {
        let event = self.store.get_event(job.event_id).await?;
        if event.pull_request.is_none() {
            return Ok(None);
        }
        let recipe = self.store.get_recipe(job.recipe_id).await?;
        let head = self.store.get_commit(event.head).await?;
        Ok(Some((recipe, head)))
    }
}
