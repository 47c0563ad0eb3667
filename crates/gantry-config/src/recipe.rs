//! Recipe file parsing.
//!
//! ```kdl
//! recipe "Test" {
//!     repository "idaholab/moose" server="github.com"
//!     cause "pull-request"
//!     creator "moosebuild"
//!     priority 10
//!     activation "auto-for-authorized"
//!     authorized "alice" "bob"
//!     build-configs "linux-gnu" "linux-clang"
//!     depends-on "Build"
//!     env {
//!         METHOD "opt"
//!     }
//!     step "Run tests" allowed-to-fail=#true {
//!         run "./run_tests -j8"
//!     }
//! }
//! ```

use crate::nodes::{
    all_string_args, bool_prop, first_int_arg, first_string_arg, required_bool, required_string,
    string_map,
};
use crate::{ConfigError, ConfigResult};
use gantry_core::git::RepoRef;
use gantry_core::recipe::{Activation, Cause, RecipeSpec, RecipeStep};
use kdl::{KdlDocument, KdlNode};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const DEFAULT_SERVER: &str = "github.com";

/// Parse every `recipe` node of a KDL document.
///
/// Dependencies must name recipes in the same document, and must not form
/// a cycle.
pub fn parse_recipes(kdl: &str) -> ConfigResult<Vec<RecipeSpec>> {
    let doc: KdlDocument = kdl.parse()?;

    let mut recipes = Vec::new();
    for node in doc.nodes() {
        if node.name().value() == "recipe" {
            recipes.push(parse_recipe(node)?);
        }
    }

    validate(&recipes)?;
    Ok(recipes)
}

/// Load every `*.kdl` file in a directory as one recipe set.
pub fn load_recipe_dir(dir: &Path) -> ConfigResult<Vec<RecipeSpec>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("kdl") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut combined = String::new();
    for path in &paths {
        combined.push_str(&std::fs::read_to_string(path)?);
        combined.push('\n');
    }
    parse_recipes(&combined)
}

fn parse_recipe(node: &KdlNode) -> ConfigResult<RecipeSpec> {
    let name = first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("recipe name".to_string()))?;

    let mut repository = None;
    let mut branch = None;
    let mut cause = None;
    let mut creator = None;
    let mut priority = 0;
    let mut activation = Activation::default();
    let mut active = true;
    let mut abort_on_failure = true;
    let mut authorized_users = Vec::new();
    let mut build_configs = Vec::new();
    let mut depends_on = Vec::new();
    let mut steps = Vec::new();
    let mut env = BTreeMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "repository" => {
                    let full_name = required_string(child, "repository")?;
                    let server = child
                        .get("server")
                        .and_then(|v| v.as_string())
                        .unwrap_or(DEFAULT_SERVER);
                    repository = Some(RepoRef::parse(server, &full_name).ok_or_else(|| {
                        ConfigError::invalid("repository", format!("expected owner/name, got {}", full_name))
                    })?);
                }
                "branch" => branch = Some(required_string(child, "branch")?),
                "cause" => {
                    let raw = required_string(child, "cause")?;
                    cause = Some(
                        raw.parse::<Cause>()
                            .map_err(|e| ConfigError::invalid("cause", e.to_string()))?,
                    );
                }
                "creator" => creator = Some(required_string(child, "creator")?),
                "priority" => {
                    let raw = first_int_arg(child)
                        .ok_or_else(|| ConfigError::invalid("priority", "expected an integer"))?;
                    priority = i32::try_from(raw)
                        .map_err(|_| ConfigError::invalid("priority", "out of range"))?;
                }
                "activation" => {
                    let raw = required_string(child, "activation")?;
                    activation = raw
                        .parse::<Activation>()
                        .map_err(|e| ConfigError::invalid("activation", e.to_string()))?;
                }
                "active" => active = required_bool(child, "active")?,
                "abort-on-failure" => abort_on_failure = required_bool(child, "abort-on-failure")?,
                "authorized" => authorized_users.extend(all_string_args(child)),
                "build-configs" => build_configs.extend(all_string_args(child)),
                "depends-on" => depends_on.extend(all_string_args(child)),
                "env" => env.extend(string_map(child)),
                "step" => steps.push(parse_step(child)?),
                _ => {} // Ignore unknown nodes
            }
        }
    }

    let repository = repository
        .ok_or_else(|| ConfigError::MissingField(format!("repository for recipe '{}'", name)))?;
    let cause =
        cause.ok_or_else(|| ConfigError::MissingField(format!("cause for recipe '{}'", name)))?;
    let creator = creator
        .ok_or_else(|| ConfigError::MissingField(format!("creator for recipe '{}'", name)))?;

    if cause != Cause::PullRequest && branch.is_none() {
        return Err(ConfigError::MissingField(format!(
            "branch for {} recipe '{}'",
            cause, name
        )));
    }
    if build_configs.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "build-configs for recipe '{}'",
            name
        )));
    }
    if steps.is_empty() {
        return Err(ConfigError::MissingField(format!("steps for recipe '{}'", name)));
    }

    Ok(RecipeSpec {
        name,
        repository,
        branch,
        cause,
        creator,
        priority,
        activation,
        active,
        abort_on_failure,
        authorized_users,
        build_configs,
        depends_on,
        steps,
        env,
    })
}

fn parse_step(node: &KdlNode) -> ConfigResult<RecipeStep> {
    let name = first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("step name".to_string()))?;

    let mut lines = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "run" {
                if let Some(cmd) = first_string_arg(child) {
                    lines.push(cmd);
                }
            }
        }
    }

    if lines.is_empty() {
        return Err(ConfigError::MissingField(format!("run for step '{}'", name)));
    }

    Ok(RecipeStep {
        name,
        script: lines.join("\n"),
        abort_on_failure: bool_prop(node, "abort-on-failure").unwrap_or(true),
        allowed_to_fail: bool_prop(node, "allowed-to-fail").unwrap_or(false),
    })
}

fn validate(recipes: &[RecipeSpec]) -> ConfigResult<()> {
    let mut seen: HashMap<&str, &RecipeSpec> = HashMap::new();
    for recipe in recipes {
        if seen.insert(recipe.name.as_str(), recipe).is_some() {
            return Err(ConfigError::DuplicateRecipe(format!("recipe '{}'", recipe.name)));
        }
    }

    for recipe in recipes {
        for dep in &recipe.depends_on {
            let Some(target) = seen.get(dep.as_str()) else {
                return Err(ConfigError::BadDependency(format!(
                    "recipe '{}' depends on unknown recipe '{}'",
                    recipe.name, dep
                )));
            };
            if target.repository != recipe.repository {
                return Err(ConfigError::BadDependency(format!(
                    "recipe '{}' depends on '{}' from another repository",
                    recipe.name, dep
                )));
            }
        }
    }

    if let Err(cycle) = detect_cycle(recipes) {
        return Err(ConfigError::DependencyCycle(cycle));
    }
    Ok(())
}

/// Detect cycles in the recipe dependency graph using DFS.
fn detect_cycle(recipes: &[RecipeSpec]) -> Result<(), String> {
    let mut visited = HashMap::new();
    let mut rec_stack = HashMap::new();

    let recipe_map: HashMap<&str, &RecipeSpec> =
        recipes.iter().map(|r| (r.name.as_str(), r)).collect();

    for recipe in recipes {
        if !visited.contains_key(recipe.name.as_str()) {
            if let Some(cycle) =
                dfs_detect_cycle(&recipe.name, &recipe_map, &mut visited, &mut rec_stack)
            {
                return Err(cycle);
            }
        }
    }
    Ok(())
}

fn dfs_detect_cycle<'a>(
    node: &'a str,
    recipe_map: &'a HashMap<&'a str, &'a RecipeSpec>,
    visited: &mut HashMap<&'a str, bool>,
    rec_stack: &mut HashMap<&'a str, bool>,
) -> Option<String> {
    visited.insert(node, true);
    rec_stack.insert(node, true);

    if let Some(recipe) = recipe_map.get(node) {
        for dep in &recipe.depends_on {
            let dep_str: &'a str = dep.as_str();
            if !visited.contains_key(dep_str) {
                if let Some(cycle) = dfs_detect_cycle(dep_str, recipe_map, visited, rec_stack) {
                    return Some(cycle);
                }
            } else if rec_stack.get(dep_str).copied().unwrap_or(false) {
                return Some(format!("{} -> {}", node, dep));
            }
        }
    }

    rec_stack.insert(node, false);
    None
}
