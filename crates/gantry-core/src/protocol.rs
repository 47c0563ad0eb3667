//! Worker protocol: claiming jobs and reporting their progress.
//!
//! These types travel as JSON between `gantry-client` and `gantry-api`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::event::{Job, StepResult};
use crate::recipe::RecipeStep;
use crate::{EventId, JobId, Outcome};

/// Who is asking for work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub name: String,
    /// Key of the build user the worker builds for.
    pub build_key: String,
    /// Build configurations this worker can run.
    pub build_configs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub worker: WorkerIdentity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub job: Option<ClaimedJob>,
}

/// Everything a worker needs to run a job it claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub job_id: JobId,
    pub event_id: EventId,
    pub recipe_name: String,
    pub config: String,
    pub steps: Vec<RecipeStep>,
    pub env: BTreeMap<String, String>,
    pub base_sha: String,
    pub head_sha: String,
    pub head_branch: String,
    pub ssh_url: Option<String>,
}

/// Progress reported by a worker while running a job. Delivered in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportMessage {
    StepStarted {
        position: i32,
        name: String,
    },
    Output {
        position: i32,
        chunk: String,
    },
    StepFinished {
        position: i32,
        outcome: Outcome,
        exit_status: Option<i32>,
    },
    JobFinished {
        outcome: Outcome,
    },
}

/// Instruction from the server piggybacked on a report reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerCommand {
    Cancel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportReply {
    pub command: Option<ServerCommand>,
}

/// Advisory status a worker posts to a server, e.g. while busy elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker: String,
    pub message: String,
}

/// Point-in-time view of a job for polling UIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job: Job,
    pub steps: Vec<StepResult>,
    pub event_complete: bool,
    pub event_status: Outcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_message_json_shape() {
        let msg = ReportMessage::StepFinished {
            position: 2,
            outcome: Outcome::Failed,
            exit_status: Some(1),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "step_finished");
        assert_eq!(value["outcome"], "failed");
        let back: ReportMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_reply_without_command() {
        let reply: ReportReply = serde_json::from_str("{}").unwrap();
        assert!(reply.command.is_none());
    }
}
