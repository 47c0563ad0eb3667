//! Dependency readiness engine.
//!
//! A job is ready when, for each recipe its recipe depends on, every job of
//! that recipe in the same event is complete. Event status is the lattice
//! aggregate of its jobs' outcomes, with failures of recipes that do not
//! abort on failure counted as `FailedOk`. Once that aggregate is `Failed`
//! or `Canceled`, no further jobs of the event are released.
//!
//! The decision is computed by [`ReadinessPlan::compute`] over a snapshot of
//! the event and applied by [`make_jobs_ready`].

use gantry_core::event::{Job, StepResult};
use gantry_core::{EventId, JobId, Outcome, RecipeId, aggregate};
use gantry_db::{CiStore, DbResult};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// What the engine needs to know about one job.
#[derive(Debug, Clone)]
pub struct JobView {
    pub id: JobId,
    pub recipe_id: RecipeId,
    pub active: bool,
    pub ready: bool,
    pub complete: bool,
    /// Effective outcome, see [`job_outcome`].
    pub outcome: Outcome,
}

/// What the engine needs to know about one recipe.
#[derive(Debug, Clone)]
pub struct RecipeView {
    pub dependencies: Vec<RecipeId>,
    pub abort_on_failure: bool,
}

impl Default for RecipeView {
    fn default() -> Self {
        Self {
            dependencies: Vec::new(),
            abort_on_failure: true,
        }
    }
}

/// Effective outcome of a job: its recorded status folded into the outcomes
/// of its steps.
pub fn job_outcome(job: &Job, steps: &[StepResult]) -> Outcome {
    aggregate(
        steps
            .iter()
            .filter(|s| s.job_id == job.id)
            .map(|s| s.status)
            .chain(std::iter::once(job.status)),
    )
}

/// The readiness decision for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPlan {
    pub event_status: Outcome,
    pub event_complete: bool,
    /// Jobs whose `ready` flag changes, with the new value.
    pub ready_changes: Vec<(JobId, bool)>,
}

impl ReadinessPlan {
    /// Compute the plan for an event's jobs. Returns `None` for an event
    /// without jobs.
    pub fn compute(jobs: &[JobView], recipes: &HashMap<RecipeId, RecipeView>) -> Option<Self> {
        if jobs.is_empty() {
            return None;
        }

        let default_recipe = RecipeView::default();
        let recipe = |id: &RecipeId| recipes.get(id).unwrap_or(&default_recipe);

        let event_status = aggregate(
            jobs.iter()
                .map(|j| j.outcome.for_event(recipe(&j.recipe_id).abort_on_failure)),
        );

        if jobs.iter().all(|j| j.complete) {
            return Some(Self {
                event_status,
                event_complete: true,
                ready_changes: Vec::new(),
            });
        }

        if event_status.is_fail_fast() {
            return Some(Self {
                event_status,
                event_complete: false,
                ready_changes: Vec::new(),
            });
        }

        // Recipes with at least one incomplete job in this event. A recipe
        // without jobs here never blocks anything.
        let pending: HashSet<RecipeId> = jobs
            .iter()
            .filter(|j| !j.complete)
            .map(|j| j.recipe_id)
            .collect();

        let ready_changes = jobs
            .iter()
            .filter(|j| j.active)
            .filter_map(|j| {
                let ready = recipe(&j.recipe_id)
                    .dependencies
                    .iter()
                    .all(|dep| !pending.contains(dep));
                (ready != j.ready).then_some((j.id, ready))
            })
            .collect();

        Some(Self {
            event_status,
            event_complete: false,
            ready_changes,
        })
    }

    /// Whether the event stopped releasing jobs before completing.
    pub fn is_fail_fast(&self) -> bool {
        !self.event_complete && self.event_status.is_fail_fast()
    }
}

/// Re-evaluate an event: record its status, mark it complete when all its
/// jobs are, and otherwise update the `ready` flags of its active jobs.
///
/// Returns the applied plan, or `None` if the event has no jobs.
pub async fn make_jobs_ready(
    store: &dyn CiStore,
    event_id: EventId,
) -> DbResult<Option<ReadinessPlan>> {
    let event = store.get_event(event_id).await?;
    let jobs = store.jobs_for_event(event_id).await?;
    if jobs.is_empty() {
        debug!(event_id = %event_id, "Event has no jobs");
        return Ok(None);
    }

    let steps = store.step_results_for_event(event_id).await?;
    let mut recipe_ids: Vec<RecipeId> = jobs.iter().map(|j| j.recipe_id).collect();
    recipe_ids.sort();
    recipe_ids.dedup();
    let recipes: HashMap<RecipeId, RecipeView> = store
        .recipes_by_ids(&recipe_ids)
        .await?
        .into_iter()
        .map(|r| {
            (
                r.id,
                RecipeView {
                    dependencies: r.dependencies,
                    abort_on_failure: r.abort_on_failure,
                },
            )
        })
        .collect();

    let views: Vec<JobView> = jobs
        .iter()
        .map(|j| JobView {
            id: j.id,
            recipe_id: j.recipe_id,
            active: j.active,
            ready: j.ready,
            complete: j.complete,
            outcome: job_outcome(j, &steps),
        })
        .collect();

    let Some(plan) = ReadinessPlan::compute(&views, &recipes) else {
        return Ok(None);
    };

    if plan.event_complete != event.complete || plan.event_status != event.status {
        store
            .set_event_state(event_id, plan.event_complete, plan.event_status)
            .await?;
    }

    if plan.event_complete {
        info!(event_id = %event_id, status = %plan.event_status, "Event complete");
    } else if plan.is_fail_fast() {
        info!(event_id = %event_id, status = %plan.event_status, "Event failed, holding remaining jobs");
    }

    for (job_id, ready) in &plan.ready_changes {
        store.set_job_ready(*job_id, *ready).await?;
        debug!(job_id = %job_id, ready, "Updated job readiness");
    }

    Ok(Some(plan))
}

/// Cancel every incomplete job of an event and mark the event complete and
/// `Canceled`. A finished event keeps its recorded status, so calling it
/// again leaves the same state.
pub async fn cancel_event(store: &dyn CiStore, event_id: EventId) -> DbResult<()> {
    let event = store.get_event(event_id).await?;
    if event.complete {
        debug!(event_id = %event_id, status = %event.status, "Event already complete");
        return Ok(());
    }
    let canceled = store.cancel_incomplete_jobs(event_id).await?;
    store
        .set_event_state(event_id, true, Outcome::Canceled)
        .await?;
    info!(event_id = %event_id, canceled, "Canceled event");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, push_spec};
    use gantry_db::{EventRepo, JobRepo};

    fn view(recipe_id: RecipeId, complete: bool, outcome: Outcome) -> JobView {
        JobView {
            id: JobId::new(),
            recipe_id,
            active: true,
            ready: false,
            complete,
            outcome,
        }
    }

    fn recipes(entries: &[(RecipeId, Vec<RecipeId>, bool)]) -> HashMap<RecipeId, RecipeView> {
        entries
            .iter()
            .map(|(id, deps, abort)| {
                (
                    *id,
                    RecipeView {
                        dependencies: deps.clone(),
                        abort_on_failure: *abort,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_event_has_no_plan() {
        assert!(ReadinessPlan::compute(&[], &HashMap::new()).is_none());
    }

    #[test]
    fn test_dependency_chain() {
        let (a, b) = (RecipeId::new(), RecipeId::new());
        let graph = recipes(&[(a, vec![], true), (b, vec![a], true)]);

        let jobs = vec![
            view(a, false, Outcome::NotStarted),
            view(b, false, Outcome::NotStarted),
        ];
        let plan = ReadinessPlan::compute(&jobs, &graph).unwrap();
        assert_eq!(plan.ready_changes, vec![(jobs[0].id, true)]);
        assert!(!plan.event_complete);

        let jobs = vec![
            JobView {
                ready: true,
                ..view(a, true, Outcome::Success)
            },
            view(b, false, Outcome::NotStarted),
        ];
        let plan = ReadinessPlan::compute(&jobs, &graph).unwrap();
        assert_eq!(plan.ready_changes, vec![(jobs[1].id, true)]);

        let jobs = vec![
            view(a, true, Outcome::Success),
            view(b, true, Outcome::Success),
        ];
        let plan = ReadinessPlan::compute(&jobs, &graph).unwrap();
        assert!(plan.event_complete);
        assert_eq!(plan.event_status, Outcome::Success);
    }

    #[test]
    fn test_missing_dependency_is_satisfied() {
        let (a, b) = (RecipeId::new(), RecipeId::new());
        let graph = recipes(&[(b, vec![a], true)]);
        let jobs = vec![view(b, false, Outcome::NotStarted)];
        let plan = ReadinessPlan::compute(&jobs, &graph).unwrap();
        assert_eq!(plan.ready_changes, vec![(jobs[0].id, true)]);
    }

    #[test]
    fn test_dependency_waits_for_every_config() {
        let (a, b) = (RecipeId::new(), RecipeId::new());
        let graph = recipes(&[(a, vec![], true), (b, vec![a], true)]);
        let jobs = vec![
            JobView {
                ready: true,
                ..view(a, true, Outcome::Success)
            },
            JobView {
                ready: true,
                ..view(a, false, Outcome::Running)
            },
            view(b, false, Outcome::NotStarted),
        ];
        let plan = ReadinessPlan::compute(&jobs, &graph).unwrap();
        assert!(plan.ready_changes.is_empty());
    }

    #[test]
    fn test_failure_stops_release() {
        let (a, b, c) = (RecipeId::new(), RecipeId::new(), RecipeId::new());
        let graph = recipes(&[(a, vec![], true), (b, vec![], true), (c, vec![b], true)]);
        let jobs = vec![
            view(a, true, Outcome::Failed),
            view(b, true, Outcome::Success),
            view(c, false, Outcome::NotStarted),
        ];
        let plan = ReadinessPlan::compute(&jobs, &graph).unwrap();
        assert_eq!(plan.event_status, Outcome::Failed);
        assert!(plan.is_fail_fast());
        assert!(plan.ready_changes.is_empty());
    }

    #[test]
    fn test_failure_without_abort_counts_as_failed_ok() {
        let (a, b) = (RecipeId::new(), RecipeId::new());
        let graph = recipes(&[(a, vec![], false), (b, vec![a], true)]);
        let jobs = vec![
            JobView {
                ready: true,
                ..view(a, true, Outcome::Failed)
            },
            view(b, false, Outcome::NotStarted),
        ];
        let plan = ReadinessPlan::compute(&jobs, &graph).unwrap();
        assert_eq!(plan.event_status, Outcome::FailedOk);
        assert!(!plan.is_fail_fast());
        assert_eq!(plan.ready_changes, vec![(jobs[1].id, true)]);
    }

    #[test]
    fn test_inactive_jobs_are_never_ready_but_block_completion() {
        let a = RecipeId::new();
        let graph = recipes(&[(a, vec![], true)]);
        let jobs = vec![
            JobView {
                active: false,
                ..view(a, false, Outcome::NotStarted)
            },
            JobView {
                ready: true,
                ..view(a, true, Outcome::Success)
            },
        ];
        let plan = ReadinessPlan::compute(&jobs, &graph).unwrap();
        assert!(!plan.event_complete);
        assert!(plan.ready_changes.is_empty());
    }

    #[test]
    fn test_job_outcome_folds_steps() {
        let fixture_job = Job {
            id: JobId::new(),
            event_id: EventId::new(),
            recipe_id: RecipeId::new(),
            config: "linux".to_string(),
            active: true,
            ready: true,
            complete: true,
            status: Outcome::Success,
            claimed_by: None,
            claimed_at: None,
            created_at: chrono::Utc::now(),
        };
        let step = |status| StepResult {
            job_id: fixture_job.id,
            position: 0,
            name: "build".to_string(),
            status,
            output: String::new(),
            exit_status: None,
        };
        assert_eq!(job_outcome(&fixture_job, &[]), Outcome::Success);
        assert_eq!(
            job_outcome(&fixture_job, &[step(Outcome::Success), step(Outcome::FailedOk)]),
            Outcome::FailedOk
        );
    }

    #[tokio::test]
    async fn test_make_jobs_ready_walks_the_graph() {
        let fixture = Fixture::new(vec![
            push_spec("Build", &[]),
            push_spec("Test", &["Build"]),
        ])
        .await;
        let event = fixture.push_event("abc123").await;
        let store = fixture.store.as_ref();

        let jobs = store.jobs_for_event(event.id).await.unwrap();
        let build = fixture.job_for(&jobs, "Build");
        let test = fixture.job_for(&jobs, "Test");
        assert!(build.ready);
        assert!(!test.ready);

        store.finish_job(build.id, Outcome::Success).await.unwrap();
        make_jobs_ready(store, event.id).await.unwrap();
        assert!(store.get_job(test.id).await.unwrap().ready);
        assert!(!store.get_event(event.id).await.unwrap().complete);

        store.finish_job(test.id, Outcome::Success).await.unwrap();
        let plan = make_jobs_ready(store, event.id).await.unwrap().unwrap();
        assert!(plan.event_complete);
        let event = store.get_event(event.id).await.unwrap();
        assert!(event.complete);
        assert_eq!(event.status, Outcome::Success);
    }

    #[tokio::test]
    async fn test_failed_job_holds_dependents() {
        let fixture = Fixture::new(vec![
            push_spec("Build", &[]),
            push_spec("Lint", &[]),
            push_spec("Test", &["Lint"]),
        ])
        .await;
        let event = fixture.push_event("abc123").await;
        let store = fixture.store.as_ref();
        let jobs = store.jobs_for_event(event.id).await.unwrap();

        store
            .finish_job(fixture.job_for(&jobs, "Build").id, Outcome::Failed)
            .await
            .unwrap();
        make_jobs_ready(store, event.id).await.unwrap();
        store
            .finish_job(fixture.job_for(&jobs, "Lint").id, Outcome::Success)
            .await
            .unwrap();
        make_jobs_ready(store, event.id).await.unwrap();

        let test = store
            .get_job(fixture.job_for(&jobs, "Test").id)
            .await
            .unwrap();
        assert!(!test.ready);
        let event = store.get_event(event.id).await.unwrap();
        assert!(!event.complete);
        assert_eq!(event.status, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_cancel_event_is_idempotent() {
        let fixture = Fixture::new(vec![push_spec("Build", &[])]).await;
        let event = fixture.push_event("abc123").await;
        let store = fixture.store.as_ref();

        cancel_event(store, event.id).await.unwrap();
        cancel_event(store, event.id).await.unwrap();

        let event = store.get_event(event.id).await.unwrap();
        assert!(event.complete);
        assert_eq!(event.status, Outcome::Canceled);
        for job in store.jobs_for_event(event.id).await.unwrap() {
            assert!(job.complete);
            assert_eq!(job.status, Outcome::Canceled);
        }
    }

    #[tokio::test]
    async fn test_cancel_keeps_finished_event_status() {
        let fixture = Fixture::new(vec![push_spec("Build", &[])]).await;
        let event = fixture.push_event("abc123").await;
        let store = fixture.store.as_ref();
        let jobs = store.jobs_for_event(event.id).await.unwrap();
        let build = fixture.job_for(&jobs, "Build");

        store.finish_job(build.id, Outcome::Success).await.unwrap();
        make_jobs_ready(store, event.id).await.unwrap();
        cancel_event(store, event.id).await.unwrap();

        let event = store.get_event(event.id).await.unwrap();
        assert!(event.complete);
        assert_eq!(event.status, Outcome::Success);
        assert_eq!(store.get_job(build.id).await.unwrap().status, Outcome::Success);
    }
}
