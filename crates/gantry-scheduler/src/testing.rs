//! Shared fixtures for scheduler tests.

use async_trait::async_trait;
use gantry_core::Outcome;
use gantry_core::event::{
    Event, Job, ManualTrigger, PullRequestAction, PullRequestTrigger, PushTrigger, Trigger,
};
use gantry_core::git::{CommitRef, RepoRef};
use gantry_core::recipe::{Activation, Cause, Recipe, RecipeSpec, RecipeStep};
use gantry_core::remote::{RemoteError, RemoteResult, RemoteStatusApi, StatusUpdate};
use gantry_db::{GitRepo, MemoryStore, RecipeRepo};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::ingest::EventIngestor;

pub(crate) const SERVER: &str = "github.com";
pub(crate) const OWNER: &str = "acme";
pub(crate) const REPO: &str = "widgets";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PostedStatus {
    pub sha: String,
    pub outcome: Outcome,
    pub description: String,
    pub context: String,
}

/// Remote API that records every call.
#[derive(Default)]
pub(crate) struct RecordingRemote {
    pub statuses: Mutex<Vec<PostedStatus>>,
    pub comments: Mutex<Vec<(String, String)>>,
    pub collaborators: Vec<String>,
    /// Fail every call after recording it.
    pub fail: bool,
}

impl RecordingRemote {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_collaborators(users: &[&str]) -> Self {
        Self {
            collaborators: users.iter().map(|u| u.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn statuses(&self) -> Vec<PostedStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn comments(&self) -> Vec<(String, String)> {
        self.comments.lock().unwrap().clone()
    }

    fn result<T>(&self, value: T) -> RemoteResult<T> {
        if self.fail {
            Err(RemoteError::Request("connection refused".to_string()))
        } else {
            Ok(value)
        }
    }
}

#[async_trait]
impl RemoteStatusApi for RecordingRemote {
    async fn update_status(&self, update: StatusUpdate<'_>) -> RemoteResult<()> {
        self.statuses.lock().unwrap().push(PostedStatus {
            sha: update.commit.sha.clone(),
            outcome: update.outcome,
            description: update.description.to_string(),
            context: update.context.to_string(),
        });
        self.result(())
    }

    async fn post_comment(&self, thread: &str, text: &str) -> RemoteResult<()> {
        self.comments
            .lock()
            .unwrap()
            .push((thread.to_string(), text.to_string()));
        self.result(())
    }

    async fn is_collaborator(&self, user: &str, _repo: &RepoRef) -> RemoteResult<bool> {
        let found = self.collaborators.iter().any(|c| c == user);
        self.result(found)
    }
}

fn step(name: &str) -> RecipeStep {
    RecipeStep {
        name: name.to_string(),
        script: format!("echo {}", name),
        abort_on_failure: true,
        allowed_to_fail: false,
    }
}

pub(crate) fn push_spec(name: &str, depends_on: &[&str]) -> RecipeSpec {
    RecipeSpec {
        name: name.to_string(),
        repository: RepoRef::new(SERVER, OWNER, REPO),
        branch: Some("main".to_string()),
        cause: Cause::Push,
        creator: OWNER.to_string(),
        priority: 0,
        activation: Activation::FullAuto,
        active: true,
        abort_on_failure: true,
        authorized_users: Vec::new(),
        build_configs: vec!["linux".to_string()],
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
        steps: vec![step("build")],
        env: BTreeMap::new(),
    }
}

pub(crate) fn pr_spec(name: &str, activation: Activation) -> RecipeSpec {
    RecipeSpec {
        branch: None,
        cause: Cause::PullRequest,
        activation,
        ..push_spec(name, &[])
    }
}

pub(crate) fn manual_spec(name: &str) -> RecipeSpec {
    RecipeSpec {
        cause: Cause::Manual,
        ..push_spec(name, &[])
    }
}

pub(crate) fn commit_ref(branch: &str, sha: &str) -> CommitRef {
    CommitRef {
        repository: RepoRef::new(SERVER, OWNER, REPO),
        branch: branch.to_string(),
        sha: sha.to_string(),
        ssh_url: Some(format!("git@{}:{}/{}.git", SERVER, OWNER, REPO)),
    }
}

pub(crate) fn push_trigger(sha: &str) -> Trigger {
    Trigger::Push(PushTrigger {
        build_user: OWNER.to_string(),
        base: commit_ref("main", "base000"),
        head: commit_ref("main", sha),
        comments_url: None,
        payload: None,
    })
}

pub(crate) fn pr_trigger(number: i64, action: PullRequestAction, head_sha: &str) -> Trigger {
    Trigger::PullRequest(PullRequestTrigger {
        build_user: OWNER.to_string(),
        author: "contributor".to_string(),
        number,
        action,
        title: "Make widgets faster".to_string(),
        url: Some(format!("https://{}/{}/{}/pull/{}", SERVER, OWNER, REPO, number)),
        base: commit_ref("main", "base000"),
        head: commit_ref("feature", head_sha),
        comments_url: Some(format!("https://api.{}/issues/{}/comments", SERVER, number)),
        payload: None,
    })
}

pub(crate) fn manual_trigger(sha: &str) -> Trigger {
    Trigger::Manual(ManualTrigger {
        build_user: OWNER.to_string(),
        repository: RepoRef::new(SERVER, OWNER, REPO),
        branch: "main".to_string(),
        latest: sha.to_string(),
    })
}

pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub remote: Arc<RecordingRemote>,
    pub recipes: Vec<Recipe>,
    pub ingestor: EventIngestor,
}

impl Fixture {
    pub async fn new(specs: Vec<RecipeSpec>) -> Self {
        Self::with_remote(specs, RecordingRemote::default()).await
    }

    pub async fn with_remote(specs: Vec<RecipeSpec>, remote: RecordingRemote) -> Self {
        let store = Arc::new(MemoryStore::new());
        let remote = Arc::new(remote);
        let recipes = store.sync_recipes(&specs).await.unwrap();
        let ingestor = EventIngestor::new(store.clone(), remote.clone())
            .with_base_url("https://ci.example.com");
        Self {
            store,
            remote,
            recipes,
            ingestor,
        }
    }

    pub async fn push_event(&self, sha: &str) -> Event {
        self.ingestor
            .materialize(&push_trigger(sha))
            .await
            .unwrap()
            .expect("push should create an event")
    }

    pub fn recipe(&self, name: &str) -> &Recipe {
        self.recipes
            .iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("no recipe {}", name))
    }

    pub fn job_for(&self, jobs: &[Job], name: &str) -> Job {
        let recipe = self.recipe(name);
        jobs.iter()
            .find(|j| j.recipe_id == recipe.id)
            .cloned()
            .unwrap_or_else(|| panic!("no job for {}", name))
    }

    /// Build key of the repository owner, which every fixture recipe builds for.
    pub async fn build_key(&self) -> String {
        let (user, _) = self.store.get_or_create_user(SERVER, OWNER).await.unwrap();
        user.build_key
    }
}
