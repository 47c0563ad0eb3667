//! Running a claimed job's steps.

use async_trait::async_trait;
use gantry_core::protocol::{ClaimedJob, ReportMessage};
use gantry_core::recipe::RecipeStep;
use gantry_core::{Outcome, aggregate};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as Process;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use crate::command::CommandQueue;
use crate::relay::Reporter;

/// Executes one claimed job, reporting progress as it goes.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run `job` to completion and return its outcome.
    ///
    /// `commands` is polled for cancellation between and during steps.
    async fn run(
        &self,
        job: &ClaimedJob,
        reporter: &Reporter,
        commands: &mut CommandQueue,
    ) -> Outcome;
}

/// Runs each step's script through the platform shell.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    work_dir: Option<PathBuf>,
}

/// How long output is still read after a step's shell exits.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

enum StepEnd {
    Exited(ExitStatus),
    Canceled,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run steps from `dir` instead of the worker's own directory.
    pub fn with_work_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: Some(dir.into()),
        }
    }

    fn command(&self, job: &ClaimedJob, step: &RecipeStep) -> Process {
        #[cfg(unix)]
        let mut cmd = {
            let mut cmd = Process::new("sh");
            cmd.arg("-c").arg(&step.script);
            cmd
        };
        #[cfg(not(unix))]
        let mut cmd = {
            let mut cmd = Process::new("cmd");
            cmd.arg("/C").arg(&step.script);
            cmd
        };

        cmd.envs(&job.env)
            .env("GANTRY_JOB_ID", job.job_id.to_string())
            .env("GANTRY_EVENT_ID", job.event_id.to_string())
            .env("GANTRY_RECIPE", &job.recipe_name)
            .env("GANTRY_CONFIG", &job.config)
            .env("GANTRY_BASE_SHA", &job.base_sha)
            .env("GANTRY_HEAD_SHA", &job.head_sha)
            .env("GANTRY_HEAD_BRANCH", &job.head_branch)
            .env("GANTRY_STEP", &step.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(url) = &job.ssh_url {
            cmd.env("GANTRY_SSH_URL", url);
        }
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn run_step(
        &self,
        job: &ClaimedJob,
        position: i32,
        step: &RecipeStep,
        reporter: &Reporter,
        commands: &mut CommandQueue,
    ) -> std::io::Result<StepEnd> {
        let mut child = self.command(job, step).spawn()?;

        let (line_tx, mut lines) = mpsc::channel::<String>(64);
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_lines(stdout, line_tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_lines(stderr, line_tx.clone())));
        }
        drop(line_tx);

        let mut open = true;
        let status = loop {
            tokio::select! {
                line = lines.recv(), if open => match line {
                    Some(chunk) => reporter.send(ReportMessage::Output { position, chunk }).await,
                    None => open = false,
                },
                status = child.wait() => break status?,
                _ = commands.cancelled(job.job_id) => {
                    if let Err(e) = child.kill().await {
                        warn!(job_id = %job.job_id, error = %e, "Failed to kill step");
                    }
                    readers.iter().for_each(|r| r.abort());
                    return Ok(StepEnd::Canceled);
                }
            }
        };

        // Background processes may keep the pipes open after the shell exits.
        let deadline = Instant::now() + OUTPUT_GRACE;
        while open {
            match time::timeout_at(deadline, lines.recv()).await {
                Ok(Some(chunk)) => reporter.send(ReportMessage::Output { position, chunk }).await,
                Ok(None) => open = false,
                Err(_) => {
                    debug!(job_id = %job.job_id, step = %step.name, "Step left its output open");
                    break;
                }
            }
        }
        readers.iter().for_each(|r| r.abort());

        Ok(StepEnd::Exited(status))
    }
}

async fn read_lines<R: AsyncRead + Unpin>(stream: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(format!("{}\n", line)).await.is_err() {
            break;
        }
    }
}

/// Outcome of a step that ran to completion.
fn step_outcome(step: &RecipeStep, status: &ExitStatus) -> Outcome {
    if status.success() {
        Outcome::Success
    } else if step.allowed_to_fail {
        Outcome::FailedOk
    } else {
        Outcome::Failed
    }
}

#[async_trait]
impl JobRunner for ShellRunner {
    async fn run(
        &self,
        job: &ClaimedJob,
        reporter: &Reporter,
        commands: &mut CommandQueue,
    ) -> Outcome {
        let mut outcomes = Vec::with_capacity(job.steps.len());

        for (index, step) in job.steps.iter().enumerate() {
            let position = index as i32;
            if commands.cancel_pending(job.job_id) {
                info!(job_id = %job.job_id, "Job canceled before step {}", step.name);
                return Outcome::Canceled;
            }

            reporter
                .send(ReportMessage::StepStarted {
                    position,
                    name: step.name.clone(),
                })
                .await;
            debug!(job_id = %job.job_id, step = %step.name, "Running step");

            let (outcome, exit_status) =
                match self.run_step(job, position, step, reporter, commands).await {
                    Ok(StepEnd::Exited(status)) => (step_outcome(step, &status), status.code()),
                    Ok(StepEnd::Canceled) => (Outcome::Canceled, None),
                    Err(e) => {
                        warn!(job_id = %job.job_id, step = %step.name, error = %e, "Failed to start step");
                        reporter
                            .send(ReportMessage::Output {
                                position,
                                chunk: format!("failed to start step: {}\n", e),
                            })
                            .await;
                        let outcome = if step.allowed_to_fail {
                            Outcome::FailedOk
                        } else {
                            Outcome::Failed
                        };
                        (outcome, None)
                    }
                };

            reporter
                .send(ReportMessage::StepFinished {
                    position,
                    outcome,
                    exit_status,
                })
                .await;

            if outcome == Outcome::Canceled {
                info!(job_id = %job.job_id, step = %step.name, "Job canceled");
                return Outcome::Canceled;
            }
            outcomes.push(outcome);
            if outcome != Outcome::Success && step.abort_on_failure {
                info!(job_id = %job.job_id, step = %step.name, "Step failed, skipping the rest");
                break;
            }
        }

        aggregate(outcomes)
    }
}
