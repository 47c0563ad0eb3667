//! API server for the Gantry CI scheduler.
//!
//! Accepts normalized triggers, hands claimable jobs to workers and records
//! what they report back.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
