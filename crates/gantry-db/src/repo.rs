//! Repository traits and the PostgreSQL store.

pub mod event;
pub mod git;
pub mod job;
pub mod recipe;
pub mod worker;

pub use event::EventRepo;
pub use git::GitRepo;
pub use job::JobRepo;
pub use recipe::{RecipeFilter, RecipeRepo};
pub use worker::WorkerRepo;

use sqlx::PgPool;

/// Everything the scheduler needs from persistence.
pub trait CiStore: GitRepo + RecipeRepo + EventRepo + JobRepo + WorkerRepo {}

impl<T> CiStore for T where T: GitRepo + RecipeRepo + EventRepo + JobRepo + WorkerRepo {}

/// PostgreSQL implementation of every repository trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Generate a fresh build key for a new git user.
pub(crate) fn new_build_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
