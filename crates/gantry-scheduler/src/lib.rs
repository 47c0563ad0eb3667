//! Server-side scheduling for the Gantry CI scheduler.
//!
//! - [`readiness`] decides which jobs of an event may run and aggregates
//!   event status.
//! - [`ingest`] turns normalized triggers into events and jobs.
//! - [`dispatch`] hands ready jobs to workers and applies their reports.

pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod readiness;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::JobDispatcher;
pub use error::{IngestError, SchedulerError, SchedulerResult};
pub use ingest::EventIngestor;
pub use readiness::{ReadinessPlan, cancel_event, make_jobs_ready};
