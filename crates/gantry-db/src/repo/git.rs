//! Git entity repository: users, repositories, branches and commits.
//!
//! Every `get_or_create_*` is an insert-or-fetch against a unique natural
//! key, so concurrent identical triggers converge on one row.

use async_trait::async_trait;
use gantry_core::git::{Branch, Commit, GitUser, RepoRef, Repository};
use gantry_core::{BranchId, CommitId, RepositoryId, UserId};

use super::{PgStore, new_build_key};
use crate::{DbError, DbResult};

#[async_trait]
pub trait GitRepo: Send + Sync {
    async fn get_or_create_user(&self, server: &str, name: &str) -> DbResult<(GitUser, bool)>;

    async fn get_or_create_repository(
        &self,
        owner: &GitUser,
        name: &str,
    ) -> DbResult<(Repository, bool)>;

    async fn get_or_create_branch(
        &self,
        repository: &Repository,
        name: &str,
    ) -> DbResult<(Branch, bool)>;

    async fn get_or_create_commit(
        &self,
        repository: &Repository,
        branch: &Branch,
        sha: &str,
    ) -> DbResult<(Commit, bool)>;

    /// Fill in the clone URL of a commit learned after it was created.
    async fn set_commit_ssh_url(&self, id: CommitId, ssh_url: &str) -> DbResult<()>;

    async fn get_commit(&self, id: CommitId) -> DbResult<Commit>;

    async fn find_repository(&self, repo: &RepoRef) -> DbResult<Option<Repository>>;
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: uuid::Uuid,
    server: String,
    name: String,
    build_key: String,
}

impl From<UserRow> for GitUser {
    fn from(row: UserRow) -> Self {
        GitUser {
            id: UserId::from_uuid(row.id),
            server: row.server,
            name: row.name,
            build_key: row.build_key,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RepositoryRow {
    id: uuid::Uuid,
    user_id: uuid::Uuid,
    server: String,
    owner: String,
    name: String,
}

impl From<RepositoryRow> for Repository {
    fn from(row: RepositoryRow) -> Self {
        Repository {
            id: RepositoryId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            server: row.server,
            owner: row.owner,
            name: row.name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CommitRow {
    id: uuid::Uuid,
    sha: String,
    ssh_url: Option<String>,
    branch_id: uuid::Uuid,
    branch: String,
    repository_id: uuid::Uuid,
    server: String,
    owner: String,
    repository: String,
}

impl From<CommitRow> for Commit {
    fn from(row: CommitRow) -> Self {
        Commit {
            id: CommitId::from_uuid(row.id),
            sha: row.sha,
            ssh_url: row.ssh_url,
            branch_id: BranchId::from_uuid(row.branch_id),
            branch: row.branch,
            repository_id: RepositoryId::from_uuid(row.repository_id),
            repository: RepoRef::new(row.server, row.owner, row.repository),
        }
    }
}

const COMMIT_SELECT: &str = r#"
    SELECT c.id, c.sha, c.ssh_url, b.id AS branch_id, b.name AS branch,
           r.id AS repository_id, u.server, u.name AS owner, r.name AS repository
    FROM commits c
    JOIN branches b ON b.id = c.branch_id
    JOIN repositories r ON r.id = b.repository_id
    JOIN git_users u ON u.id = r.user_id
"#;

#[async_trait]
impl GitRepo for PgStore {
    async fn get_or_create_user(&self, server: &str, name: &str) -> DbResult<(GitUser, bool)> {
        let inserted = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO git_users (id, server, name, build_key, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (server, name) DO NOTHING
            RETURNING id, server, name, build_key
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(server)
        .bind(name)
        .bind(new_build_key())
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok((row.into(), true));
        }

        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, server, name, build_key FROM git_users WHERE server = $1 AND name = $2",
        )
        .bind(server)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.into(), false))
    }

    async fn get_or_create_repository(
        &self,
        owner: &GitUser,
        name: &str,
    ) -> DbResult<(Repository, bool)> {
        let inserted = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO repositories (id, user_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, name) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(owner.id.as_uuid())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let (id, created) = match inserted {
            Some(id) => (id, true),
            None => {
                let id = sqlx::query_scalar::<_, uuid::Uuid>(
                    "SELECT id FROM repositories WHERE user_id = $1 AND name = $2",
                )
                .bind(owner.id.as_uuid())
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
                (id, false)
            }
        };

        let repository = Repository {
            id: RepositoryId::from_uuid(id),
            user_id: owner.id,
            server: owner.server.clone(),
            owner: owner.name.clone(),
            name: name.to_string(),
        };
        Ok((repository, created))
    }

    async fn get_or_create_branch(
        &self,
        repository: &Repository,
        name: &str,
    ) -> DbResult<(Branch, bool)> {
        let inserted = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO branches (id, repository_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (repository_id, name) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(repository.id.as_uuid())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let (id, created) = match inserted {
            Some(id) => (id, true),
            None => {
                let id = sqlx::query_scalar::<_, uuid::Uuid>(
                    "SELECT id FROM branches WHERE repository_id = $1 AND name = $2",
                )
                .bind(repository.id.as_uuid())
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
                (id, false)
            }
        };

        let branch = Branch {
            id: BranchId::from_uuid(id),
            repository_id: repository.id,
            name: name.to_string(),
        };
        Ok((branch, created))
    }

    async fn get_or_create_commit(
        &self,
        repository: &Repository,
        branch: &Branch,
        sha: &str,
    ) -> DbResult<(Commit, bool)> {
        let inserted = sqlx::query_scalar::<_, uuid::Uuid>(
            r#"
            INSERT INTO commits (id, branch_id, sha)
            VALUES ($1, $2, $3)
            ON CONFLICT (branch_id, sha) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(branch.id.as_uuid())
        .bind(sha)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => {
                let commit = Commit {
                    id: CommitId::from_uuid(id),
                    sha: sha.to_string(),
                    ssh_url: None,
                    branch_id: branch.id,
                    branch: branch.name.clone(),
                    repository_id: repository.id,
                    repository: repository.repo_ref(),
                };
                Ok((commit, true))
            }
            None => {
                let row = sqlx::query_as::<_, CommitRow>(&format!(
                    "{} WHERE c.branch_id = $1 AND c.sha = $2",
                    COMMIT_SELECT
                ))
                .bind(branch.id.as_uuid())
                .bind(sha)
                .fetch_one(&self.pool)
                .await?;
                Ok((row.into(), false))
            }
        }
    }

    async fn set_commit_ssh_url(&self, id: CommitId, ssh_url: &str) -> DbResult<()> {
        sqlx::query("UPDATE commits SET ssh_url = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(ssh_url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_commit(&self, id: CommitId) -> DbResult<Commit> {
        let row = sqlx::query_as::<_, CommitRow>(&format!("{} WHERE c.id = $1", COMMIT_SELECT))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("commit {}", id)))?;
        Ok(row.into())
    }

    async fn find_repository(&self, repo: &RepoRef) -> DbResult<Option<Repository>> {
        let row = sqlx::query_as::<_, RepositoryRow>(
            r#"
            SELECT r.id, r.user_id, u.server, u.name AS owner, r.name
            FROM repositories r
            JOIN git_users u ON u.id = r.user_id
            WHERE u.server = $1 AND u.name = $2 AND r.name = $3
            "#,
        )
        .bind(&repo.server)
        .bind(&repo.owner)
        .bind(&repo.name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}
