//! Core domain types and traits for the Gantry CI scheduler.
//!
//! This crate contains:
//! - Typed identifiers and the shared error type
//! - The outcome lattice used to aggregate job and event status
//! - Recipe, event, job and git records
//! - The worker claim/report protocol
//! - The remote status API seam (commit statuses, comments, collaborators)

pub mod error;
pub mod event;
pub mod git;
pub mod id;
pub mod protocol;
pub mod recipe;
pub mod remote;
pub mod status;

pub use error::{Error, Result};
pub use id::{
    BranchId, CommitId, EventId, JobId, PullRequestId, RecipeId, RepositoryId, UserId,
};
pub use status::{Outcome, aggregate};
