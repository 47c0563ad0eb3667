//! The outcome lattice.
//!
//! Outcomes are totally ordered by dominance. Aggregating a set of outcomes
//! picks the most dominant member, so a single failed step fails its job and
//! a single failed job fails its event:
//!
//! `Failed > Canceled > FailedOk > Running > NotStarted > Success`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;

/// Result of a step, a job or an event.
///
/// Variants are declared from least to most dominant so the derived `Ord`
/// is the dominance order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Success,
    NotStarted,
    Running,
    /// Failed, but allowed to fail.
    FailedOk,
    Canceled,
    Failed,
}

impl Outcome {
    pub const ALL: [Outcome; 6] = [
        Outcome::Success,
        Outcome::NotStarted,
        Outcome::Running,
        Outcome::FailedOk,
        Outcome::Canceled,
        Outcome::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::NotStarted => "not_started",
            Outcome::Running => "running",
            Outcome::FailedOk => "failed_ok",
            Outcome::Canceled => "canceled",
            Outcome::Failed => "failed",
        }
    }

    /// Whether a job with this outcome has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Outcome::Success | Outcome::FailedOk | Outcome::Canceled | Outcome::Failed
        )
    }

    /// Whether further jobs of an event may be released after observing this
    /// event-level outcome.
    pub fn is_fail_fast(&self) -> bool {
        matches!(self, Outcome::Failed | Outcome::Canceled)
    }

    /// Reclassify a job outcome before folding it into its event.
    ///
    /// A failure of a recipe that does not abort on failure only counts as
    /// `FailedOk`, so it never stops the rest of the dependency graph.
    pub fn for_event(self, abort_on_failure: bool) -> Outcome {
        match self {
            Outcome::Failed if !abort_on_failure => Outcome::FailedOk,
            other => other,
        }
    }

    /// Parse a stored or reported status, ignoring values this version does
    /// not know about.
    pub fn parse_lenient(s: &str) -> Option<Outcome> {
        s.parse().ok()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Outcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Outcome::ALL
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| Error::unknown("outcome", s))
    }
}

/// Combine a set of outcomes into the most dominant one.
///
/// Returns `Success` for an empty input. The result does not depend on
/// iteration order.
pub fn aggregate<I>(outcomes: I) -> Outcome
where
    I: IntoIterator<Item = Outcome>,
{
    outcomes.into_iter().max().unwrap_or(Outcome::Success)
}

/// Aggregate raw status strings, skipping unrecognized ones.
pub fn aggregate_raw<'a, I>(statuses: I) -> Outcome
where
    I: IntoIterator<Item = &'a str>,
{
    aggregate(statuses.into_iter().filter_map(Outcome::parse_lenient))
}
