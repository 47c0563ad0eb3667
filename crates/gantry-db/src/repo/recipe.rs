//! Recipe repository.

use async_trait::async_trait;
use gantry_core::recipe::{Activation, Cause, Recipe, RecipeSpec, RecipeStep};
use gantry_core::{RecipeId, RepositoryId};
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

use super::PgStore;
use crate::repo::git::GitRepo;
use crate::{DbError, DbResult};

/// Which recipes an event instantiates.
#[derive(Debug, Clone)]
pub struct RecipeFilter {
    pub repository_id: RepositoryId,
    pub cause: Cause,
    /// Branch the trigger happened on. Recipes without a branch match any
    /// branch; `None` matches every recipe.
    pub branch: Option<String>,
    /// Required creator; `None` matches any creator.
    pub creator: Option<String>,
}

impl RecipeFilter {
    pub fn matches(&self, recipe: &Recipe) -> bool {
        recipe.active
            && recipe.repository_id == self.repository_id
            && recipe.cause == self.cause
            && self
                .branch
                .as_ref()
                .is_none_or(|b| recipe.branch.as_ref().is_none_or(|rb| rb == b))
            && self.creator.as_ref().is_none_or(|c| &recipe.creator == c)
    }
}

#[async_trait]
pub trait RecipeRepo: Send + Sync {
    /// Create or update recipes from their definitions, binding dependencies
    /// by name. Stored recipes missing from `specs` are deactivated.
    async fn sync_recipes(&self, specs: &[RecipeSpec]) -> DbResult<Vec<Recipe>>;

    /// Active recipes matching the filter, highest priority first, then name.
    async fn matching_recipes(&self, filter: &RecipeFilter) -> DbResult<Vec<Recipe>>;

    async fn get_recipe(&self, id: RecipeId) -> DbResult<Recipe>;

    async fn recipes_by_ids(&self, ids: &[RecipeId]) -> DbResult<Vec<Recipe>>;
}

#[derive(sqlx::FromRow)]
struct RecipeRow {
    id: uuid::Uuid,
    repository_id: uuid::Uuid,
    name: String,
    branch: Option<String>,
    cause: String,
    creator: String,
    priority: i32,
    activation: String,
    active: bool,
    abort_on_failure: bool,
    authorized_users: Vec<String>,
    build_configs: Vec<String>,
    dependencies: Vec<uuid::Uuid>,
    steps: Json<Vec<RecipeStep>>,
    env: Json<BTreeMap<String, String>>,
}

impl TryFrom<RecipeRow> for Recipe {
    type Error = DbError;

    fn try_from(row: RecipeRow) -> Result<Self, Self::Error> {
        let cause = row
            .cause
            .parse::<Cause>()
            .map_err(|e| DbError::Corrupt(format!("recipe {}: {}", row.id, e)))?;
        let activation = row
            .activation
            .parse::<Activation>()
            .map_err(|e| DbError::Corrupt(format!("recipe {}: {}", row.id, e)))?;
        Ok(Recipe {
            id: RecipeId::from_uuid(row.id),
            name: row.name,
            repository_id: RepositoryId::from_uuid(row.repository_id),
            branch: row.branch,
            cause,
            creator: row.creator,
            priority: row.priority,
            activation,
            active: row.active,
            abort_on_failure: row.abort_on_failure,
            authorized_users: row.authorized_users,
            build_configs: row.build_configs,
            dependencies: row
                .dependencies
                .into_iter()
                .map(RecipeId::from_uuid)
                .collect(),
            steps: row.steps.0,
            env: row.env.0,
        })
    }
}

const RECIPE_SELECT: &str = r#"
    SELECT r.id, r.repository_id, r.name, r.branch, r.cause, r.creator, r.priority,
           r.activation, r.active, r.abort_on_failure, r.authorized_users, r.build_configs,
           ARRAY(SELECT d.depends_on FROM recipe_dependencies d WHERE d.recipe_id = r.id)
               AS dependencies,
           r.steps, r.env
    FROM recipes r
"#;

#[async_trait]
impl RecipeRepo for PgStore {
    async fn sync_recipes(&self, specs: &[RecipeSpec]) -> DbResult<Vec<Recipe>> {
        // Resolve repositories outside the transaction; get-or-create is
        // idempotent on its own.
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

        let mut tx = self.pool.begin().await?;
        let mut ids_by_name: HashMap<&str, uuid::Uuid> = HashMap::new();

        for (spec, repository_id) in specs.iter().zip(&repository_ids) {
            let id = sqlx::query_scalar::<_, uuid::Uuid>(
                r#"
                INSERT INTO recipes (id, repository_id, name, branch, cause, creator, priority,
                    activation, active, abort_on_failure, authorized_users, build_configs,
                    steps, env, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW(), NOW())
                ON CONFLICT (repository_id, name) DO UPDATE SET
                    branch = EXCLUDED.branch,
                    cause = EXCLUDED.cause,
                    creator = EXCLUDED.creator,
                    priority = EXCLUDED.priority,
                    activation = EXCLUDED.activation,
                    active = EXCLUDED.active,
                    abort_on_failure = EXCLUDED.abort_on_failure,
                    authorized_users = EXCLUDED.authorized_users,
                    build_configs = EXCLUDED.build_configs,
                    steps = EXCLUDED.steps,
                    env = EXCLUDED.env,
                    updated_at = NOW()
                RETURNING id
                "#,
            )
            .bind(uuid::Uuid::now_v7())
            .bind(repository_id.as_uuid())
            .bind(&spec.name)
            .bind(&spec.branch)
            .bind(spec.cause.as_str())
            .bind(&spec.creator)
            .bind(spec.priority)
            .bind(spec.activation.as_str())
            .bind(spec.active)
            .bind(spec.abort_on_failure)
            .bind(&spec.authorized_users)
            .bind(&spec.build_configs)
            .bind(Json(&spec.steps))
            .bind(Json(&spec.env))
            .fetch_one(&mut *tx)
            .await?;
            ids_by_name.insert(spec.name.as_str(), id);
        }

        let ids: Vec<uuid::Uuid> = ids_by_name.values().copied().collect();
        sqlx::query("DELETE FROM recipe_dependencies WHERE recipe_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        for spec in specs {
            let recipe_id = ids_by_name[spec.name.as_str()];
            for dep in &spec.depends_on {
                let dep_id = ids_by_name.get(dep.as_str()).ok_or_else(|| {
                    DbError::NotFound(format!("recipe '{}' needed by '{}'", dep, spec.name))
                })?;
                sqlx::query(
                    "INSERT INTO recipe_dependencies (recipe_id, depends_on) VALUES ($1, $2)",
                )
                .bind(recipe_id)
                .bind(dep_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        let deactivated = sqlx::query(
            "UPDATE recipes SET active = FALSE, updated_at = NOW() WHERE active AND id <> ALL($1)",
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        info!(
            synced = ids.len(),
            deactivated, "Synchronized recipes"
        );

        let recipe_ids: Vec<RecipeId> = ids.into_iter().map(RecipeId::from_uuid).collect();
        self.recipes_by_ids(&recipe_ids).await
    }

    async fn matching_recipes(&self, filter: &RecipeFilter) -> DbResult<Vec<Recipe>> {
        let rows = sqlx::query_as::<_, RecipeRow>(&format!(
            r#"{}
            WHERE r.active
              AND r.repository_id = $1
              AND r.cause = $2
              AND ($3::TEXT IS NULL OR r.branch IS NULL OR r.branch = $3)
              AND ($4::TEXT IS NULL OR r.creator = $4)
            ORDER BY r.priority DESC, r.name ASC
            "#,
            RECIPE_SELECT
        ))
        .bind(filter.repository_id.as_uuid())
        .bind(filter.cause.as_str())
        .bind(&filter.branch)
        .bind(&filter.creator)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Recipe::try_from).collect()
    }

    async fn get_recipe(&self, id: RecipeId) -> DbResult<Recipe> {
        let row = sqlx::query_as::<_, RecipeRow>(&format!("{} WHERE r.id = $1", RECIPE_SELECT))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("recipe {}", id)))?;
        row.try_into()
    }

    async fn recipes_by_ids(&self, ids: &[RecipeId]) -> DbResult<Vec<Recipe>> {
        let ids: Vec<uuid::Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query_as::<_, RecipeRow>(&format!(
            "{} WHERE r.id = ANY($1) ORDER BY r.priority DESC, r.name ASC",
            RECIPE_SELECT
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Recipe::try_from).collect()
    }
}
