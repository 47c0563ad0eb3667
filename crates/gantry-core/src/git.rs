//! Git entities: users, repositories, branches and commits.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BranchId, CommitId, RepositoryId, UserId};

/// A repository named by git server, owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    /// Git server name, e.g. "github.com".
    pub server: String,
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(
        server: impl Into<String>,
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse "owner/name" on a given server.
    pub fn parse(server: &str, full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(server, owner, name))
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.server, self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitUser {
    pub id: UserId,
    pub server: String,
    pub name: String,
    /// Secret a worker presents to claim jobs built for this user.
    pub build_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub user_id: UserId,
    pub server: String,
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(&self.server, &self.owner, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub repository_id: RepositoryId,
    pub name: String,
}

/// A commit together with the branch and repository it was seen on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub sha: String,
    pub ssh_url: Option<String>,
    pub branch_id: BranchId,
    pub branch: String,
    pub repository_id: RepositoryId,
    pub repository: RepoRef,
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.sha.get(..7).unwrap_or(&self.sha);
        write!(f, "{}:{}:{}", self.repository.full_name(), self.branch, short)
    }
}

/// Normalized commit data delivered with a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub repository: RepoRef,
    pub branch: String,
    pub sha: String,
    #[serde(default)]
    pub ssh_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_ref_parse() {
        let r = RepoRef::parse("github.com", "idaholab/moose").unwrap();
        assert_eq!(r.owner, "idaholab");
        assert_eq!(r.name, "moose");
        assert_eq!(r.full_name(), "idaholab/moose");
        assert!(RepoRef::parse("github.com", "moose").is_none());
        assert!(RepoRef::parse("github.com", "a/b/c").is_none());
        assert!(RepoRef::parse("github.com", "/b").is_none());
    }

    #[test]
    fn test_commit_display_shortens_sha() {
        let commit = Commit {
            id: CommitId::new(),
            sha: "0123456789abcdef".to_string(),
            ssh_url: None,
            branch_id: BranchId::new(),
            branch: "devel".to_string(),
            repository_id: RepositoryId::new(),
            repository: RepoRef::new("github.com", "idaholab", "moose"),
        };
        assert_eq!(commit.to_string(), "idaholab/moose:devel:0123456");
    }
}
