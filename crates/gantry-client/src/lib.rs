//! Worker side of the Gantry CI scheduler.
//!
//! A worker polls its servers for one claimable job at a time, runs it, and
//! streams progress back through a relay task. OS signals are turned into
//! commands the running job observes cooperatively.

pub mod api;
pub mod command;
pub mod error;
pub mod interrupt;
pub mod relay;
pub mod runner;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{HttpServerApi, ServerApi};
pub use command::{Command, CommandQueue};
pub use error::{ClientError, ClientResult};
pub use interrupt::InterruptBridge;
pub use relay::{Relay, Reporter};
pub use runner::{JobRunner, ShellRunner};
pub use scheduler::Scheduler;
