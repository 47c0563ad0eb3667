//! Event ingestion.
//!
//! Turns a normalized [`Trigger`] into stored commits, an event and one job
//! per (recipe, build configuration), then releases whatever is ready.
//! Redelivered triggers map onto the same records.

use gantry_core::event::{
    Event, EventKey, ManualTrigger, PullRequestAction, PullRequestTrigger, PushTrigger, Trigger,
};
use gantry_core::git::{Commit, CommitRef, RepoRef};
use gantry_core::recipe::{Activation, Cause, Recipe};
use gantry_core::remote::{RemoteStatusApi, StatusUpdate};
use gantry_core::{EventId, JobId, Outcome, PullRequestId};
use gantry_db::{CiStore, DbResult, RecipeFilter};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::readiness::{cancel_event, make_jobs_ready};

/// Materializes triggers into events and jobs.
pub struct EventIngestor {
    store: Arc<dyn CiStore>,
    remote: Arc<dyn RemoteStatusApi>,
    /// Public URL of the server, used to link commit statuses to jobs.
    base_url: Option<String>,
}

impl EventIngestor {
    pub fn new(store: Arc<dyn CiStore>, remote: Arc<dyn RemoteStatusApi>) -> Self {
        Self {
            store,
            remote,
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Store a trigger. Returns the event it maps to, or `None` when no
    /// recipe matches or the trigger only updates existing state.
    pub async fn materialize(&self, trigger: &Trigger) -> Result<Option<Event>, IngestError> {
        let event_id = match trigger {
            Trigger::Push(push) => self.push(push).await?,
            Trigger::PullRequest(pr) => self.pull_request(pr).await?,
            Trigger::Manual(manual) => self.manual(manual).await?,
        };
        match event_id {
            Some(id) => {
                let event = self
                    .store
                    .get_event(id)
                    .await
                    .map_err(IngestError::materialize("event"))?;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    async fn push(&self, push: &PushTrigger) -> Result<Option<EventId>, IngestError> {
        let base = self.commit(&push.base).await?;
        let head = self.commit(&push.head).await?;
        info!(base = %base, head = %head, "New push event");

        let filter = RecipeFilter {
            repository_id: base.repository_id,
            cause: Cause::Push,
            branch: Some(base.branch.clone()),
            creator: Some(push.build_user.clone()),
        };
        let recipes = self.recipes(&filter).await?;
        if recipes.is_empty() {
            info!(branch = %base.branch, repository = %base.repository, "No recipes for push");
            return Ok(None);
        }

        let key = EventKey {
            build_user: push.build_user.clone(),
            base: base.id,
            head: head.id,
            cause: Cause::Push,
        };
        let event = self.event(&key).await?;
        self.store
            .update_event_details(
                event.id,
                None,
                push.comments_url.as_deref(),
                push.payload.as_ref(),
            )
            .await
            .map_err(IngestError::materialize("event details"))?;

        for recipe in &recipes {
            for config in &recipe.build_configs {
                let (job, created) = self
                    .store
                    .get_or_create_job(event.id, recipe.id, config)
                    .await
                    .map_err(job_error(recipe, config))?;
                if created {
                    let active = recipe.activation != Activation::Manual;
                    self.store
                        .set_job_active(job.id, active)
                        .await
                        .map_err(job_error(recipe, config))?;
                    debug!(job_id = %job.id, recipe = %recipe.name, config, active, "Created job");
                }
            }
        }

        self.release(event.id).await;
        Ok(Some(event.id))
    }

    async fn pull_request(&self, pr: &PullRequestTrigger) -> Result<Option<EventId>, IngestError> {
        let base = self.commit(&pr.base).await?;
        let head = self.commit(&pr.head).await?;

        if pr.action == PullRequestAction::Closed {
            let existing = self
                .store
                .find_pull_request(base.repository_id, pr.number)
                .await
                .map_err(IngestError::materialize("pull request"))?;
            if let Some(mut stored) = existing {
                if !stored.closed {
                    stored.closed = true;
                    self.store
                        .update_pull_request(&stored)
                        .await
                        .map_err(IngestError::materialize("pull request"))?;
                    info!(number = pr.number, repository = %base.repository, "Closed pull request");
                }
            }
            return Ok(None);
        }

        info!(number = pr.number, action = %pr.action, base = %base, head = %head, "New pull request event");
        let filter = RecipeFilter {
            repository_id: base.repository_id,
            cause: Cause::PullRequest,
            branch: Some(base.branch.clone()),
            creator: Some(pr.build_user.clone()),
        };
        let recipes = self.recipes(&filter).await?;
        if recipes.is_empty() {
            info!(branch = %base.branch, repository = %base.repository, "No recipes for pull requests");
            return Ok(None);
        }

        let (mut stored, created) = self
            .store
            .get_or_create_pull_request(base.repository_id, pr.number)
            .await
            .map_err(IngestError::materialize("pull request"))?;
        if created {
            info!(number = pr.number, repository = %base.repository, "Created pull request");
        } else if stored.closed {
            info!(number = pr.number, repository = %base.repository, "Reopened pull request");
        }
        stored.title = pr.title.clone();
        stored.url = pr.url.clone();
        stored.closed = false;
        self.store
            .update_pull_request(&stored)
            .await
            .map_err(IngestError::materialize("pull request"))?;

        let key = EventKey {
            build_user: pr.build_user.clone(),
            base: base.id,
            head: head.id,
            cause: Cause::PullRequest,
        };
        let (event, event_created) = self
            .store
            .get_or_create_event(&key)
            .await
            .map_err(IngestError::materialize("event"))?;
        self.store
            .update_event_details(
                event.id,
                Some(stored.id),
                pr.comments_url.as_deref(),
                pr.payload.as_ref(),
            )
            .await
            .map_err(IngestError::materialize("event details"))?;

        // A head that was superseded earlier and is pushed again gets rebuilt.
        let revived = !event_created && event.complete && event.status == Outcome::Canceled;
        if event_created {
            info!(event_id = %event.id, number = pr.number, "Created pull request event");
        } else if revived {
            info!(event_id = %event.id, number = pr.number, "Rebuilding canceled pull request event");
            self.store
                .set_event_state(event.id, false, Outcome::NotStarted)
                .await
                .map_err(IngestError::materialize("event"))?;
        }
        if event_created || revived {
            self.supersede(&event, stored.id, pr.number).await;
        }

        for recipe in &recipes {
            let result = self
                .pull_request_recipe(pr, &event, &base, &head, recipe, revived)
                .await;
            if let Err(e) = result {
                warn!(recipe = %recipe.name, error = %e, "Failed to process recipe for pull request");
            }
        }

        self.release(event.id).await;
        Ok(Some(event.id))
    }

    /// Create and announce the jobs of one recipe for a pull request event.
    async fn pull_request_recipe(
        &self,
        pr: &PullRequestTrigger,
        event: &Event,
        base: &Commit,
        head: &Commit,
        recipe: &Recipe,
        revived: bool,
    ) -> DbResult<()> {
        let active = self.is_activated(recipe, &pr.author, &base.repository).await;
        let description = if active { "Waiting" } else { "Developer needed" };

        for config in &recipe.build_configs {
            let (job, created) = self
                .store
                .get_or_create_job(event.id, recipe.id, config)
                .await?;
            if created {
                self.store.set_job_active(job.id, active).await?;
                debug!(job_id = %job.id, recipe = %recipe.name, config, active, "Created job");
            } else if revived {
                self.store.reset_job(job.id, active).await?;
                debug!(job_id = %job.id, recipe = %recipe.name, config, active, "Reset job");
            } else {
                continue;
            }

            let context = job_context(recipe, config);
            let target_url = self.job_url(job.id);
            let update = StatusUpdate {
                commit: head,
                outcome: Outcome::NotStarted,
                target_url: target_url.as_deref(),
                description,
                context: &context,
            };
            if let Err(e) = self.remote.update_status(update).await {
                warn!(job_id = %job.id, error = %e, "Failed to post pending status");
            }

            if !active {
                if let Some(thread) = &pr.comments_url {
                    let text = format!(
                        "A developer needs to activate the `{}` job before it runs.",
                        context
                    );
                    if let Err(e) = self.remote.post_comment(thread, &text).await {
                        warn!(job_id = %job.id, error = %e, "Failed to post activation comment");
                    }
                }
            }
        }
        Ok(())
    }

    async fn is_activated(&self, recipe: &Recipe, author: &str, repo: &RepoRef) -> bool {
        match recipe.activation {
            Activation::FullAuto => true,
            Activation::Manual => false,
            Activation::AutoForAuthorized => {
                if recipe.authorized_users.iter().any(|u| u == author) {
                    return true;
                }
                match self.remote.is_collaborator(author, repo).await {
                    Ok(collaborator) => collaborator,
                    Err(e) => {
                        warn!(user = author, repository = %repo, error = %e, "Collaborator check failed");
                        false
                    }
                }
            }
        }
    }

    /// Cancel the other unfinished events of a pull request.
    async fn supersede(&self, event: &Event, pr_id: PullRequestId, number: i64) {
        let others = match self.store.events_for_pull_request(pr_id).await {
            Ok(events) => events,
            Err(e) => {
                warn!(number, error = %e, "Failed to load earlier pull request events");
                return;
            }
        };
        for other in others.iter().filter(|o| o.id != event.id && !o.complete) {
            match cancel_event(self.store.as_ref(), other.id).await {
                Ok(()) => info!(event_id = %other.id, number, "Canceled superseded event"),
                Err(e) => warn!(event_id = %other.id, error = %e, "Failed to cancel superseded event"),
            }
        }
    }

    async fn manual(&self, manual: &ManualTrigger) -> Result<Option<EventId>, IngestError> {
        let latest = CommitRef {
            repository: manual.repository.clone(),
            branch: manual.branch.clone(),
            sha: manual.latest.clone(),
            ssh_url: None,
        };
        let commit = self.commit(&latest).await?;

        let filter = RecipeFilter {
            repository_id: commit.repository_id,
            cause: Cause::Manual,
            branch: Some(commit.branch.clone()),
            creator: Some(manual.build_user.clone()),
        };
        let recipes = self.recipes(&filter).await?;
        if recipes.is_empty() {
            info!(branch = %commit.branch, repository = %commit.repository, "No recipes for manual");
            return Ok(None);
        }

        let key = EventKey {
            build_user: manual.build_user.clone(),
            base: commit.id,
            head: commit.id,
            cause: Cause::Manual,
        };
        let (event, created) = self
            .store
            .get_or_create_event(&key)
            .await
            .map_err(IngestError::materialize("event"))?;
        if created {
            info!(event_id = %event.id, commit = %commit, "Created manual event");
        } else {
            info!(event_id = %event.id, commit = %commit, "Restarting manual event");
            self.store
                .set_event_state(event.id, false, Outcome::NotStarted)
                .await
                .map_err(IngestError::materialize("event"))?;
        }

        // Manual runs start from scratch, with no activation gating.
        for recipe in &recipes {
            for config in &recipe.build_configs {
                let (job, _) = self
                    .store
                    .get_or_create_job(event.id, recipe.id, config)
                    .await
                    .map_err(job_error(recipe, config))?;
                self.store
                    .reset_job(job.id, true)
                    .await
                    .map_err(job_error(recipe, config))?;
            }
        }

        self.release(event.id).await;
        Ok(Some(event.id))
    }

    /// Store a commit along with its user, repository and branch.
    async fn commit(&self, data: &CommitRef) -> Result<Commit, IngestError> {
        self.materialize_commit(data)
            .await
            .map_err(IngestError::materialize(format!(
                "commit {}:{}",
                data.repository, data.sha
            )))
    }

    async fn materialize_commit(&self, data: &CommitRef) -> DbResult<Commit> {
        let repo = &data.repository;
        let (user, created) = self.store.get_or_create_user(&repo.server, &repo.owner).await?;
        if created {
            info!(server = %repo.server, user = %repo.owner, "Created git user");
        }
        let (repository, created) = self
            .store
            .get_or_create_repository(&user, &repo.name)
            .await?;
        if created {
            info!(repository = %repo, "Created repository");
        }
        let (branch, created) = self
            .store
            .get_or_create_branch(&repository, &data.branch)
            .await?;
        if created {
            info!(repository = %repo, branch = %data.branch, "Created branch");
        }
        let (mut commit, created) = self
            .store
            .get_or_create_commit(&repository, &branch, &data.sha)
            .await?;
        if created {
            info!(commit = %commit, "Created commit");
        }

        if let Some(ssh_url) = &data.ssh_url {
            if commit.ssh_url.as_ref() != Some(ssh_url) {
                self.store.set_commit_ssh_url(commit.id, ssh_url).await?;
                commit.ssh_url = Some(ssh_url.clone());
            }
        }
        Ok(commit)
    }

    async fn recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>, IngestError> {
        let mut recipes = self
            .store
            .matching_recipes(filter)
            .await
            .map_err(IngestError::materialize("recipes"))?;
        Recipe::sort_for_event(&mut recipes);
        Ok(recipes)
    }

    async fn event(&self, key: &EventKey) -> Result<Event, IngestError> {
        let (event, created) = self
            .store
            .get_or_create_event(key)
            .await
            .map_err(IngestError::materialize("event"))?;
        if created {
            info!(event_id = %event.id, cause = %key.cause, "Created event");
        }
        Ok(event)
    }

    /// Release ready jobs. Failures are logged; the event stays intact and
    /// is re-evaluated on the next job report.
    async fn release(&self, event_id: EventId) {
        if let Err(e) = make_jobs_ready(self.store.as_ref(), event_id).await {
            warn!(event_id = %event_id, error = %e, "Failed to update job readiness");
        }
    }

    fn job_url(&self, job_id: JobId) -> Option<String> {
        self.base_url
            .as_ref()
            .map(|base| format!("{}/jobs/{}", base.trim_end_matches('/'), job_id))
    }
}

/// Status context of a job on the git server.
pub(crate) fn job_context(recipe: &Recipe, config: &str) -> String {
    format!("{} ({})", recipe.name, config)
}

fn job_error(recipe: &Recipe, config: &str) -> impl FnOnce(gantry_db::DbError) -> IngestError {
    IngestError::materialize(format!("job {}", job_context(recipe, config)))
}
