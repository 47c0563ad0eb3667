//! Recipe definitions.
//!
//! A recipe is a build template bound to a repository (and, for pushes and
//! manual triggers, a branch). Events instantiate one job per recipe and
//! build configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::git::RepoRef;
use crate::{Error, RecipeId, RepositoryId};

/// What kind of trigger a recipe responds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cause {
    Push,
    PullRequest,
    Manual,
}

impl Cause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cause::Push => "push",
            Cause::PullRequest => "pull-request",
            Cause::Manual => "manual",
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Cause {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Cause::Push),
            "pull-request" | "pull_request" => Ok(Cause::PullRequest),
            "manual" => Ok(Cause::Manual),
            _ => Err(Error::unknown("cause", s)),
        }
    }
}

/// Whether jobs of a recipe start out allowed to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Activation {
    /// Always active.
    #[default]
    FullAuto,
    /// Never active until a developer activates the job.
    Manual,
    /// Active when the triggering user is authorized or a collaborator.
    AutoForAuthorized,
}

impl Activation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activation::FullAuto => "full-auto",
            Activation::Manual => "manual",
            Activation::AutoForAuthorized => "auto-for-authorized",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full-auto" => Ok(Activation::FullAuto),
            "manual" => Ok(Activation::Manual),
            "auto-for-authorized" => Ok(Activation::AutoForAuthorized),
            _ => Err(Error::unknown("activation", s)),
        }
    }
}

/// A single step of a recipe, run in order by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeStep {
    pub name: String,
    /// Shell script executed for this step.
    pub script: String,
    /// Stop the remaining steps when this one fails.
    pub abort_on_failure: bool,
    /// A failure of this step only counts as `FailedOk`.
    pub allowed_to_fail: bool,
}

/// A stored recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: RecipeId,
    pub name: String,
    pub repository_id: RepositoryId,
    /// Branch the recipe builds; `None` for pull request recipes.
    pub branch: Option<String>,
    pub cause: Cause,
    /// The build user this recipe runs for.
    pub creator: String,
    pub priority: i32,
    pub activation: Activation,
    pub active: bool,
    pub abort_on_failure: bool,
    /// Users whose pull requests activate `AutoForAuthorized` jobs directly.
    pub authorized_users: Vec<String>,
    pub build_configs: Vec<String>,
    /// Recipes whose jobs in the same event must complete first.
    pub dependencies: Vec<RecipeId>,
    pub steps: Vec<RecipeStep>,
    pub env: BTreeMap<String, String>,
}

impl Recipe {
    /// Deterministic job ordering: descending priority, then name.
    pub fn sort_for_event(recipes: &mut [Recipe]) {
        recipes.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
    }
}

/// A recipe as written in a recipe file, before it is bound to stored ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeSpec {
    pub name: String,
    pub repository: RepoRef,
    pub branch: Option<String>,
    pub cause: Cause,
    pub creator: String,
    pub priority: i32,
    pub activation: Activation,
    pub active: bool,
    pub abort_on_failure: bool,
    pub authorized_users: Vec<String>,
    pub build_configs: Vec<String>,
    /// Names of other recipes in the same set.
    pub depends_on: Vec<String>,
    pub steps: Vec<RecipeStep>,
    pub env: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe(name: &str, priority: i32) -> Recipe {
        Recipe {
            id: RecipeId::new(),
            name: name.to_string(),
            repository_id: RepositoryId::new(),
            branch: Some("main".to_string()),
            cause: Cause::Push,
            creator: "ci".to_string(),
            priority,
            activation: Activation::FullAuto,
            active: true,
            abort_on_failure: true,
            authorized_users: vec![],
            build_configs: vec!["linux".to_string()],
            dependencies: vec![],
            steps: vec![],
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn test_sort_for_event() {
        let mut recipes = vec![recipe("b", 1), recipe("a", 1), recipe("z", 5)];
        Recipe::sort_for_event(&mut recipes);
        let names: Vec<_> = recipes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "b"]);
    }

    #[test]
    fn test_cause_parse() {
        assert_eq!("pull-request".parse::<Cause>().unwrap(), Cause::PullRequest);
        assert_eq!("pull_request".parse::<Cause>().unwrap(), Cause::PullRequest);
        assert!("tag".parse::<Cause>().is_err());
    }

    #[test]
    fn test_activation_parse() {
        assert_eq!(
            "auto-for-authorized".parse::<Activation>().unwrap(),
            Activation::AutoForAuthorized
        );
        assert!("sometimes".parse::<Activation>().is_err());
    }
}
