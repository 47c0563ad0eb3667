//! In-memory store.
//!
//! Mirrors the PostgreSQL store's semantics closely enough to drive the
//! scheduler in tests and single-process setups: natural keys are unique,
//! get-or-create is atomic under the store lock, and claims are exclusive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::event::{Event, EventKey, Job, PullRequest, StepResult};
use gantry_core::git::{Branch, Commit, GitUser, RepoRef, Repository};
use gantry_core::protocol::{WorkerIdentity, WorkerStatus};
use gantry_core::recipe::{Recipe, RecipeSpec};
use gantry_core::{
    BranchId, CommitId, EventId, JobId, Outcome, PullRequestId, RecipeId, RepositoryId, UserId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::repo::new_build_key;
use crate::{
    DbError, DbResult, EventRepo, GitRepo, JobRepo, RecipeFilter, RecipeRepo, WorkerRepo,
};

#[derive(Default)]
struct Inner {
    users: Vec<GitUser>,
    repositories: Vec<Repository>,
    branches: Vec<Branch>,
    commits: Vec<StoredCommit>,
    /// Insertion order doubles as creation order.
    recipes: Vec<Recipe>,
    pull_requests: Vec<PullRequest>,
    events: Vec<Event>,
    jobs: Vec<Job>,
    steps: BTreeMap<(JobId, i32), StepResult>,
    workers: BTreeMap<String, (String, DateTime<Utc>)>,
}

struct StoredCommit {
    id: CommitId,
    branch_id: BranchId,
    sha: String,
    ssh_url: Option<String>,
}

impl Inner {
    fn commit(&self, stored: &StoredCommit) -> DbResult<Commit> {
        let branch = self
            .branches
            .iter()
            .find(|b| b.id == stored.branch_id)
            .ok_or_else(|| DbError::Corrupt(format!("commit {} has no branch", stored.id)))?;
        let repository = self
            .repositories
            .iter()
            .find(|r| r.id == branch.repository_id)
            .ok_or_else(|| DbError::Corrupt(format!("branch {} has no repository", branch.id)))?;
        Ok(Commit {
            id: stored.id,
            sha: stored.sha.clone(),
            ssh_url: stored.ssh_url.clone(),
            branch_id: branch.id,
            branch: branch.name.clone(),
            repository_id: repository.id,
            repository: repository.repo_ref(),
        })
    }

    fn job_mut(&mut self, id: JobId) -> DbResult<&mut Job> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))
    }

    fn recipe(&self, id: RecipeId) -> Option<&Recipe> {
        self.recipes.iter().find(|r| r.id == id)
    }

    /// Whether the worker's build key belongs to the user a recipe builds for.
    fn builds_for(&self, recipe: &Recipe, build_key: &str) -> bool {
        let Some(repository) = self.repositories.iter().find(|r| r.id == recipe.repository_id)
        else {
            return false;
        };
        self.users.iter().any(|u| {
            u.server == repository.server && u.name == recipe.creator && u.build_key == build_key
        })
    }
}

/// A [`CiStore`](crate::CiStore) kept in process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GitRepo for MemoryStore {
    async fn get_or_create_user(&self, server: &str, name: &str) -> DbResult<(GitUser, bool)> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner
            .users
            .iter()
            .find(|u| u.server == server && u.name == name)
        {
            return Ok((user.clone(), false));
        }
        let user = GitUser {
            id: UserId::new(),
            server: server.to_string(),
            name: name.to_string(),
            build_key: new_build_key(),
        };
        inner.users.push(user.clone());
        Ok((user, true))
    }

    async fn get_or_create_repository(
        &self,
        owner: &GitUser,
        name: &str,
    ) -> DbResult<(Repository, bool)> {
        let mut inner = self.inner.lock().await;
        if let Some(repository) = inner
            .repositories
            .iter()
            .find(|r| r.user_id == owner.id && r.name == name)
        {
            return Ok((repository.clone(), false));
        }
        let repository = Repository {
            id: RepositoryId::new(),
            user_id: owner.id,
            server: owner.server.clone(),
            owner: owner.name.clone(),
            name: name.to_string(),
        };
        inner.repositories.push(repository.clone());
        Ok((repository, true))
    }

    async fn get_or_create_branch(
        &self,
        repository: &Repository,
        name: &str,
    ) -> DbResult<(Branch, bool)> {
        let mut inner = self.inner.lock().await;
        if let Some(branch) = inner
            .branches
            .iter()
            .find(|b| b.repository_id == repository.id && b.name == name)
        {
            return Ok((branch.clone(), false));
        }
        let branch = Branch {
            id: BranchId::new(),
            repository_id: repository.id,
            name: name.to_string(),
        };
        inner.branches.push(branch.clone());
        Ok((branch, true))
    }

    async fn get_or_create_commit(
        &self,
        _repository: &Repository,
        branch: &Branch,
        sha: &str,
    ) -> DbResult<(Commit, bool)> {
        let mut inner = self.inner.lock().await;
        if let Some(stored) = inner
            .commits
            .iter()
            .find(|c| c.branch_id == branch.id && c.sha == sha)
        {
            return Ok((inner.commit(stored)?, false));
        }
        let stored = StoredCommit {
            id: CommitId::new(),
            branch_id: branch.id,
            sha: sha.to_string(),
            ssh_url: None,
        };
        let commit = inner.commit(&stored)?;
        inner.commits.push(stored);
        Ok((commit, true))
    }

    async fn set_commit_ssh_url(&self, id: CommitId, ssh_url: &str) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .commits
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| DbError::NotFound(format!("commit {}", id)))?;
        stored.ssh_url = Some(ssh_url.to_string());
        Ok(())
    }

    async fn get_commit(&self, id: CommitId) -> DbResult<Commit> {
        let inner = self.inner.lock().await;
        let stored = inner
            .commits
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| DbError::NotFound(format!("commit {}", id)))?;
        inner.commit(stored)
    }

    async fn find_repository(&self, repo: &RepoRef) -> DbResult<Option<Repository>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .repositories
            .iter()
            .find(|r| r.server == repo.server && r.owner == repo.owner && r.name == repo.name)
            .cloned())
    }
}

#[async_trait]
impl RecipeRepo for MemoryStore {
    async fn sync_recipes(&self, specs: &[RecipeSpec]) -> DbResult<Vec<Recipe>> {
        let mut repository_ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let (owner, _) = self
                .get_or_create_user(&spec.repository.server, &spec.repository.owner)
                .await?;
            let (repository, _) = self
                .get_or_create_repository(&owner, &spec.repository.name)
                .await?;
            repository_ids.push(repository.id);
        }

        let mut inner = self.inner.lock().await;
        let mut ids_by_name: HashMap<&str, RecipeId> = HashMap::new();
        for (spec, repository_id) in specs.iter().zip(&repository_ids) {
            let existing = inner
                .recipes
                .iter()
                .position(|r| r.repository_id == *repository_id && r.name == spec.name);
            let id = existing
                .map(|idx| inner.recipes[idx].id)
                .unwrap_or_else(RecipeId::new);
            let recipe = Recipe {
                id,
                name: spec.name.clone(),
                repository_id: *repository_id,
                branch: spec.branch.clone(),
                cause: spec.cause,
                creator: spec.creator.clone(),
                priority: spec.priority,
                activation: spec.activation,
                active: spec.active,
                abort_on_failure: spec.abort_on_failure,
                authorized_users: spec.authorized_users.clone(),
                build_configs: spec.build_configs.clone(),
                dependencies: Vec::new(),
                steps: spec.steps.clone(),
                env: spec.env.clone(),
            };
            match existing {
                Some(idx) => inner.recipes[idx] = recipe,
                None => inner.recipes.push(recipe),
            }
            ids_by_name.insert(spec.name.as_str(), id);
        }

        for spec in specs {
            let recipe_id = ids_by_name[spec.name.as_str()];
            let mut dependencies = Vec::with_capacity(spec.depends_on.len());
            for dep in &spec.depends_on {
                let dep_id = ids_by_name.get(dep.as_str()).ok_or_else(|| {
                    DbError::NotFound(format!("recipe '{}' needed by '{}'", dep, spec.name))
                })?;
                dependencies.push(*dep_id);
            }
            if let Some(recipe) = inner.recipes.iter_mut().find(|r| r.id == recipe_id) {
                recipe.dependencies = dependencies;
            }
        }

        let mut deactivated = 0u64;
        for recipe in inner.recipes.iter_mut() {
            if recipe.active && !ids_by_name.values().any(|id| *id == recipe.id) {
                recipe.active = false;
                deactivated += 1;
            }
        }
        info!(synced = ids_by_name.len(), deactivated, "Synchronized recipes");

        let mut synced: Vec<Recipe> = inner
            .recipes
            .iter()
            .filter(|r| ids_by_name.values().any(|id| *id == r.id))
            .cloned()
            .collect();
        Recipe::sort_for_event(&mut synced);
        Ok(synced)
    }

    async fn matching_recipes(&self, filter: &RecipeFilter) -> DbResult<Vec<Recipe>> {
        let inner = self.inner.lock().await;
        let mut recipes: Vec<Recipe> = inner
            .recipes
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Recipe::sort_for_event(&mut recipes);
        Ok(recipes)
    }

    async fn get_recipe(&self, id: RecipeId) -> DbResult<Recipe> {
        let inner = self.inner.lock().await;
        inner
            .recipe(id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("recipe {}", id)))
    }

    async fn recipes_by_ids(&self, ids: &[RecipeId]) -> DbResult<Vec<Recipe>> {
        let inner = self.inner.lock().await;
        let mut recipes: Vec<Recipe> = inner
            .recipes
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect();
        Recipe::sort_for_event(&mut recipes);
        Ok(recipes)
    }
}

#[async_trait]
impl EventRepo for MemoryStore {
    async fn get_or_create_event(&self, key: &EventKey) -> DbResult<(Event, bool)> {
        let mut inner = self.inner.lock().await;
        if let Some(event) = inner.events.iter().find(|e| {
            e.build_user == key.build_user
                && e.base == key.base
                && e.head == key.head
                && e.cause == key.cause
        }) {
            return Ok((event.clone(), false));
        }
        let event = Event {
            id: EventId::new(),
            cause: key.cause,
            build_user: key.build_user.clone(),
            base: key.base,
            head: key.head,
            pull_request: None,
            complete: false,
            status: Outcome::NotStarted,
            comments_url: None,
            payload: None,
            created_at: Utc::now(),
        };
        inner.events.push(event.clone());
        Ok((event, true))
    }

    async fn get_event(&self, id: EventId) -> DbResult<Event> {
        let inner = self.inner.lock().await;
        inner
            .events
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("event {}", id)))
    }

    async fn update_event_details(
        &self,
        id: EventId,
        pull_request: Option<PullRequestId>,
        comments_url: Option<&str>,
        payload: Option<&serde_json::Value>,
    ) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let event = inner
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| DbError::NotFound(format!("event {}", id)))?;
        if let Some(pr) = pull_request {
            event.pull_request = Some(pr);
        }
        if let Some(url) = comments_url {
            event.comments_url = Some(url.to_string());
        }
        if let Some(payload) = payload {
            event.payload = Some(payload.clone());
        }
        Ok(())
    }

    async fn set_event_state(&self, id: EventId, complete: bool, status: Outcome) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let event = inner
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| DbError::NotFound(format!("event {}", id)))?;
        event.complete = complete;
        event.status = status;
        Ok(())
    }

    async fn events_for_pull_request(&self, pr: PullRequestId) -> DbResult<Vec<Event>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|e| e.pull_request == Some(pr))
            .cloned()
            .collect())
    }

    async fn get_or_create_pull_request(
        &self,
        repository_id: RepositoryId,
        number: i64,
    ) -> DbResult<(PullRequest, bool)> {
        let mut inner = self.inner.lock().await;
        if let Some(pr) = inner
            .pull_requests
            .iter()
            .find(|p| p.repository_id == repository_id && p.number == number)
        {
            return Ok((pr.clone(), false));
        }
        let pr = PullRequest {
            id: PullRequestId::new(),
            repository_id,
            number,
            title: String::new(),
            url: None,
            closed: false,
        };
        inner.pull_requests.push(pr.clone());
        Ok((pr, true))
    }

    async fn find_pull_request(
        &self,
        repository_id: RepositoryId,
        number: i64,
    ) -> DbResult<Option<PullRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .pull_requests
            .iter()
            .find(|p| p.repository_id == repository_id && p.number == number)
            .cloned())
    }

    async fn update_pull_request(&self, pr: &PullRequest) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .pull_requests
            .iter_mut()
            .find(|p| p.id == pr.id)
            .ok_or_else(|| DbError::NotFound(format!("pull request #{}", pr.number)))?;
        stored.title = pr.title.clone();
        stored.url = pr.url.clone();
        stored.closed = pr.closed;
        Ok(())
    }
}

#[async_trait]
impl JobRepo for MemoryStore {
    async fn get_or_create_job(
        &self,
        event: EventId,
        recipe: RecipeId,
        config: &str,
    ) -> DbResult<(Job, bool)> {
        let mut inner = self.inner.lock().await;
        if let Some(job) = inner
            .jobs
            .iter()
            .find(|j| j.event_id == event && j.recipe_id == recipe && j.config == config)
        {
            return Ok((job.clone(), false));
        }
        let job = Job {
            id: JobId::new(),
            event_id: event,
            recipe_id: recipe,
            config: config.to_string(),
            active: false,
            ready: false,
            complete: false,
            status: Outcome::NotStarted,
            claimed_by: None,
            claimed_at: None,
            created_at: Utc::now(),
        };
        inner.jobs.push(job.clone());
        Ok((job, true))
    }

    async fn get_job(&self, id: JobId) -> DbResult<Job> {
        let inner = self.inner.lock().await;
        inner
            .jobs
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))
    }

    async fn jobs_for_event(&self, event: EventId) -> DbResult<Vec<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .iter()
            .filter(|j| j.event_id == event)
            .cloned()
            .collect())
    }

    async fn reset_job(&self, id: JobId, active: bool) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        inner.steps.retain(|(job_id, _), _| *job_id != id);
        let job = inner.job_mut(id)?;
        job.active = active;
        job.ready = false;
        job.complete = false;
        job.status = Outcome::NotStarted;
        job.claimed_by = None;
        job.claimed_at = None;
        Ok(())
    }

    async fn set_job_ready(&self, id: JobId, ready: bool) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        inner.job_mut(id)?.ready = ready;
        Ok(())
    }

    async fn set_job_active(&self, id: JobId, active: bool) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        inner.job_mut(id)?.active = active;
        Ok(())
    }

    async fn finish_job(&self, id: JobId, status: Outcome) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner.job_mut(id)?;
        job.complete = true;
        job.status = status;
        Ok(())
    }

    async fn cancel_incomplete_jobs(&self, event: EventId) -> DbResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut changed = 0;
        for job in inner
            .jobs
            .iter_mut()
            .filter(|j| j.event_id == event && !j.complete)
        {
            job.complete = true;
            job.status = Outcome::Canceled;
            changed += 1;
        }
        Ok(changed)
    }

    async fn claim_job(&self, worker: &WorkerIdentity) -> DbResult<Option<Job>> {
        let mut inner = self.inner.lock().await;
        let candidate = inner
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| {
                j.ready && j.active && !j.complete && j.claimed_by.is_none()
                    && worker.build_configs.contains(&j.config)
            })
            .filter(|(_, j)| {
                inner
                    .events
                    .iter()
                    .any(|e| e.id == j.event_id && !e.complete)
            })
            .filter_map(|(idx, j)| {
                let recipe = inner.recipe(j.recipe_id)?;
                inner
                    .builds_for(recipe, &worker.build_key)
                    .then_some((std::cmp::Reverse(recipe.priority), idx))
            })
            .min()
            .map(|(_, idx)| idx);

        let Some(idx) = candidate else {
            return Ok(None);
        };
        let job = &mut inner.jobs[idx];
        job.claimed_by = Some(worker.name.clone());
        job.claimed_at = Some(Utc::now());
        job.status = Outcome::Running;
        Ok(Some(job.clone()))
    }

    async fn step_results(&self, job: JobId) -> DbResult<Vec<StepResult>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .steps
            .range((job, i32::MIN)..=(job, i32::MAX))
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn step_results_for_event(&self, event: EventId) -> DbResult<Vec<StepResult>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .steps
            .values()
            .filter(|s| {
                inner
                    .jobs
                    .iter()
                    .any(|j| j.id == s.job_id && j.event_id == event)
            })
            .cloned()
            .collect())
    }

    async fn start_step(&self, job: JobId, position: i32, name: &str) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        inner.steps.insert(
            (job, position),
            StepResult {
                job_id: job,
                position,
                name: name.to_string(),
                status: Outcome::Running,
                output: String::new(),
                exit_status: None,
            },
        );
        Ok(())
    }

    async fn append_step_output(&self, job: JobId, position: i32, chunk: &str) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let step = inner
            .steps
            .get_mut(&(job, position))
            .ok_or_else(|| DbError::NotFound(format!("step {} of job {}", position, job)))?;
        step.output.push_str(chunk);
        Ok(())
    }

    async fn finish_step(
        &self,
        job: JobId,
        position: i32,
        status: Outcome,
        exit_status: Option<i32>,
    ) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        let step = inner
            .steps
            .get_mut(&(job, position))
            .ok_or_else(|| DbError::NotFound(format!("step {} of job {}", position, job)))?;
        step.status = status;
        step.exit_status = exit_status;
        Ok(())
    }
}

#[async_trait]
impl WorkerRepo for MemoryStore {
    async fn record_worker_status(&self, status: &WorkerStatus) -> DbResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .workers
            .insert(status.worker.clone(), (status.message.clone(), Utc::now()));
        Ok(())
    }

    async fn worker_statuses(&self) -> DbResult<Vec<(WorkerStatus, DateTime<Utc>)>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .workers
            .iter()
            .map(|(worker, (message, at))| {
                (
                    WorkerStatus {
                        worker: worker.clone(),
                        message: message.clone(),
                    },
                    *at,
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::recipe::{Activation, Cause, RecipeStep};

    fn spec(name: &str, depends_on: &[&str]) -> RecipeSpec {
        RecipeSpec {
            name: name.to_string(),
            repository: RepoRef::new("github.com", "acme", "widgets"),
            branch: Some("main".to_string()),
            cause: Cause::Push,
            creator: "acme".to_string(),
            priority: 0,
            activation: Activation::FullAuto,
            active: true,
            abort_on_failure: true,
            authorized_users: Vec::new(),
            build_configs: vec!["linux".to_string()],
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            steps: vec![RecipeStep {
                name: "build".to_string(),
                script: "make".to_string(),
                abort_on_failure: true,
                allowed_to_fail: false,
            }],
            env: BTreeMap::new(),
        }
    }

    async fn ready_job(store: &MemoryStore, config: &str) -> (Job, String) {
        let recipes = store.sync_recipes(&[spec("Build", &[])]).await.unwrap();
        let (user, _) = store.get_or_create_user("github.com", "acme").await.unwrap();
        let (repository, _) = store.get_or_create_repository(&user, "widgets").await.unwrap();
        let (branch, _) = store.get_or_create_branch(&repository, "main").await.unwrap();
        let (commit, _) = store
            .get_or_create_commit(&repository, &branch, "abc123")
            .await
            .unwrap();
        let (event, _) = store
            .get_or_create_event(&EventKey {
                build_user: "acme".to_string(),
                base: commit.id,
                head: commit.id,
                cause: Cause::Push,
            })
            .await
            .unwrap();
        let (job, _) = store
            .get_or_create_job(event.id, recipes[0].id, config)
            .await
            .unwrap();
        store.set_job_active(job.id, true).await.unwrap();
        store.set_job_ready(job.id, true).await.unwrap();
        (job, user.build_key)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = MemoryStore::new();
        let (user, created) = store.get_or_create_user("github.com", "acme").await.unwrap();
        assert!(created);
        let (again, created) = store.get_or_create_user("github.com", "acme").await.unwrap();
        assert!(!created);
        assert_eq!(user.id, again.id);
        assert_eq!(user.build_key, again.build_key);
    }

    #[tokio::test]
    async fn test_sync_binds_dependencies_and_deactivates_missing() {
        let store = MemoryStore::new();
        let recipes = store
            .sync_recipes(&[spec("Build", &[]), spec("Test", &["Build"])])
            .await
            .unwrap();
        let build = recipes.iter().find(|r| r.name == "Build").unwrap();
        let test = recipes.iter().find(|r| r.name == "Test").unwrap();
        assert_eq!(test.dependencies, vec![build.id]);

        store.sync_recipes(&[spec("Build", &[])]).await.unwrap();
        let test = store.get_recipe(test.id).await.unwrap();
        assert!(!test.active);
        let build_again = store.get_recipe(build.id).await.unwrap();
        assert!(build_again.active);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryStore::new();
        let (job, build_key) = ready_job(&store, "linux").await;
        let worker = |name: &str| WorkerIdentity {
            name: name.to_string(),
            build_key: build_key.clone(),
            build_configs: vec!["linux".to_string()],
        };

        let claimed = store.claim_job(&worker("w1")).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.claimed_by.as_deref(), Some("w1"));
        assert!(store.claim_job(&worker("w2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_requires_matching_key_and_config() {
        let store = MemoryStore::new();
        let (_, build_key) = ready_job(&store, "linux").await;

        let wrong_key = WorkerIdentity {
            name: "w1".to_string(),
            build_key: "nope".to_string(),
            build_configs: vec!["linux".to_string()],
        };
        assert!(store.claim_job(&wrong_key).await.unwrap().is_none());

        let wrong_config = WorkerIdentity {
            name: "w1".to_string(),
            build_key,
            build_configs: vec!["mac".to_string()],
        };
        assert!(store.claim_job(&wrong_config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_job_clears_steps_and_claim() {
        let store = MemoryStore::new();
        let (job, build_key) = ready_job(&store, "linux").await;
        let worker = WorkerIdentity {
            name: "w1".to_string(),
            build_key,
            build_configs: vec!["linux".to_string()],
        };
        store.claim_job(&worker).await.unwrap().unwrap();
        store.start_step(job.id, 0, "build").await.unwrap();
        store.append_step_output(job.id, 0, "ok\n").await.unwrap();
        store.finish_job(job.id, Outcome::Success).await.unwrap();

        store.reset_job(job.id, true).await.unwrap();
        let job = store.get_job(job.id).await.unwrap();
        assert!(!job.complete);
        assert!(job.claimed_by.is_none());
        assert_eq!(job.status, Outcome::NotStarted);
        assert!(store.step_results(job.id).await.unwrap().is_empty());
    }
}
