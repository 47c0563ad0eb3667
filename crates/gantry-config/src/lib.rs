//! KDL configuration parsing for the Gantry CI scheduler.
//!
//! This crate handles parsing of:
//! - Recipe files (`*.kdl` under the recipes directory)
//! - Worker configuration (`gantry-client.kdl`)

pub mod error;
mod nodes;
pub mod recipe;
pub mod worker;

pub use error::{ConfigError, ConfigResult};
pub use recipe::{load_recipe_dir, parse_recipes};
pub use worker::{WorkerConfig, parse_worker_config};
