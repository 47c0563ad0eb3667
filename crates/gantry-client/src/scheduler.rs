//! The worker loop: poll, claim, run, report, repeat.

use gantry_config::WorkerConfig;
use gantry_core::Outcome;
use gantry_core::protocol::{ClaimedJob, ReportMessage, WorkerIdentity, WorkerStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::ServerApi;
use crate::command::{Command, CommandQueue};
use crate::interrupt::InterruptBridge;
use crate::relay::Relay;
use crate::runner::JobRunner;

/// Runs one job at a time from any of its servers.
pub struct Scheduler {
    config: WorkerConfig,
    servers: Vec<Arc<dyn ServerApi>>,
    runner: Arc<dyn JobRunner>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands: CommandQueue,
    interrupts: InterruptBridge,
}

impl Scheduler {
    /// Servers are polled in order; `servers[i]` should match `config.servers[i]`.
    pub fn new(
        config: WorkerConfig,
        servers: Vec<Arc<dyn ServerApi>>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        let (commands_tx, commands) = CommandQueue::channel();
        let interrupts = InterruptBridge::inert(commands_tx.clone());
        Self {
            config,
            servers,
            runner,
            commands_tx,
            commands,
            interrupts,
        }
    }

    /// Sender side of the command channel, for an [`InterruptBridge`].
    pub fn commands(&self) -> mpsc::UnboundedSender<Command> {
        self.commands_tx.clone()
    }

    pub fn with_interrupts(mut self, interrupts: InterruptBridge) -> Self {
        self.interrupts = interrupts;
        self
    }

    fn identity(&self) -> WorkerIdentity {
        WorkerIdentity {
            name: self.config.name.clone(),
            build_key: self.config.build_key.clone(),
            build_configs: self.config.build_configs.clone(),
        }
    }

    /// Loop until a stop is requested, or after one cycle in single-shot mode.
    pub async fn run(&mut self) {
        info!(
            worker = %self.config.name,
            servers = self.servers.len(),
            single_shot = self.config.single_shot,
            "Starting worker"
        );

        loop {
            if self.interrupts.stop_requested() {
                info!(mode = ?self.interrupts.stop_mode(), "Stop requested, exiting");
                break;
            }

            let ran = self.poll_once().await;
            if self.config.single_shot {
                debug!("Single-shot mode, exiting");
                break;
            }
            if ran {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.interrupts.stopped() => {}
            }
        }

        info!(worker = %self.config.name, "Worker stopped");
    }

    /// One claim cycle over every server. Returns whether a job ran.
    pub async fn poll_once(&mut self) -> bool {
        let stale = self.commands.clear();
        if stale > 0 {
            debug!(count = stale, "Discarded stale commands");
        }

        let identity = self.identity();
        for index in 0..self.servers.len() {
            if self.interrupts.stop_requested() {
                return false;
            }
            let server = self.servers[index].clone();
            match server.claim(&identity).await {
                Ok(Some(job)) => {
                    self.run_job(index, job).await;
                    return true;
                }
                Ok(None) => debug!(server = server.url(), "No job available"),
                Err(e) => warn!(server = server.url(), error = %e, "Failed to poll server"),
            }
        }
        false
    }

    async fn run_job(&mut self, index: usize, job: ClaimedJob) {
        let server_url = self.servers[index].url().to_string();
        info!(
            job_id = %job.job_id,
            recipe = %job.recipe_name,
            config = %job.config,
            server = %server_url,
            "Running job"
        );

        let relay = Relay::spawn(self.servers.clone(), index, self.commands_tx.clone());
        for other in (0..self.servers.len()).filter(|&i| i != index) {
            relay.notice(
                other,
                WorkerStatus {
                    worker: self.config.name.clone(),
                    message: format!("Running job on another server ({})", server_url),
                },
            );
        }
        relay.notice(
            index,
            WorkerStatus {
                worker: self.config.name.clone(),
                message: format!("Job {}: {}", job.job_id, job.recipe_name),
            },
        );

        let reporter = relay.reporter(job.job_id);
        let outcome = self
            .runner
            .run(&job, &reporter, &mut self.commands)
            .await;
        reporter.send(ReportMessage::JobFinished { outcome }).await;

        if let Err(e) = relay.flush().await {
            warn!(job_id = %job.job_id, error = %e, "Failed to flush job reports");
        }
        relay.quit().await;
        self.commands.clear();

        if outcome == Outcome::Success {
            info!(job_id = %job.job_id, %outcome, "Finished job");
        } else {
            warn!(job_id = %job.job_id, %outcome, "Finished job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::StopMode;
    use crate::relay::Reporter;
    use crate::testing::{FakeServer, claimed_job, step};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use url::Url;

    /// Reports three outputs and records which jobs it ran.
    #[derive(Default)]
    struct ScriptedRunner {
        ran: Mutex<Vec<String>>,
        cancel_seen: Mutex<bool>,
    }

    #[async_trait]
    impl JobRunner for ScriptedRunner {
        async fn run(
            &self,
            job: &ClaimedJob,
            reporter: &Reporter,
            commands: &mut CommandQueue,
        ) -> Outcome {
            self.ran.lock().unwrap().push(job.recipe_name.clone());
            *self.cancel_seen.lock().unwrap() = commands.cancel_pending(job.job_id);
            for chunk in ["a", "b", "c"] {
                reporter
                    .send(ReportMessage::Output {
                        position: 0,
                        chunk: chunk.to_string(),
                    })
                    .await;
            }
            Outcome::Success
        }
    }

    fn config(servers: usize, single_shot: bool) -> WorkerConfig {
        let mut config = WorkerConfig::new(
            "builder-01",
            Url::parse("http://one").unwrap(),
            "key",
        );
        config.servers = (0..servers)
            .map(|i| Url::parse(&format!("http://server-{}", i)).unwrap())
            .collect();
        config.build_configs = vec!["linux".to_string()];
        config.poll_interval = Duration::from_millis(10);
        config.single_shot = single_shot;
        config
    }

    fn as_servers(servers: &[&Arc<FakeServer>]) -> Vec<Arc<dyn ServerApi>> {
        servers
            .iter()
            .map(|s| Arc::clone(*s) as Arc<dyn ServerApi>)
            .collect()
    }

    #[tokio::test]
    async fn test_single_shot_delivers_reports_before_returning() {
        let job = claimed_job("Build", vec![step("build", "true")]);
        let job_id = job.job_id;
        let server = Arc::new(FakeServer {
            report_delay: Some(Duration::from_millis(10)),
            ..FakeServer::new("http://one").with_job(job)
        });
        let runner = Arc::new(ScriptedRunner::default());
        let mut scheduler = Scheduler::new(config(1, true), as_servers(&[&server]), runner.clone());

        scheduler.run().await;

        let reports = server.reports();
        let chunks: Vec<_> = reports
            .iter()
            .filter_map(|(_, m)| match m {
                ReportMessage::Output { chunk, .. } => Some(chunk.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(chunks, vec!["a", "b", "c"]);
        assert_eq!(
            reports.last(),
            Some(&(
                job_id,
                ReportMessage::JobFinished {
                    outcome: Outcome::Success
                }
            ))
        );
        assert_eq!(server.claims(), 1);
        assert_eq!(server.statuses()[0].message, format!("Job {}: Build", job_id));
    }

    #[tokio::test]
    async fn test_single_shot_without_work() {
        let server = Arc::new(FakeServer::new("http://one"));
        let runner = Arc::new(ScriptedRunner::default());
        let mut scheduler = Scheduler::new(config(1, true), as_servers(&[&server]), runner.clone());

        scheduler.run().await;

        assert_eq!(server.claims(), 1);
        assert!(runner.ran.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_busy_notice_to_other_servers() {
        let idle = Arc::new(FakeServer::new("http://idle"));
        let busy = Arc::new(
            FakeServer::new("http://busy").with_job(claimed_job("Build", vec![step("b", "true")])),
        );
        let other = Arc::new(FakeServer::new("http://other"));
        let runner = Arc::new(ScriptedRunner::default());
        let mut scheduler = Scheduler::new(
            config(3, true),
            as_servers(&[&idle, &busy, &other]),
            runner,
        );

        scheduler.run().await;

        assert_eq!(
            idle.statuses()[0].message,
            "Running job on another server (http://busy)"
        );
        assert_eq!(other.statuses().len(), 1);
        assert!(busy.statuses()[0].message.starts_with("Job "));
        // The last server is never polled once a job was found.
        assert_eq!(other.claims(), 0);
    }

    #[tokio::test]
    async fn test_poll_errors_do_not_stop_the_cycle() {
        let broken = Arc::new(FakeServer {
            broken: true,
            ..FakeServer::new("http://broken")
        });
        let healthy = Arc::new(
            FakeServer::new("http://healthy").with_job(claimed_job("Build", vec![])),
        );
        let runner = Arc::new(ScriptedRunner::default());
        let mut scheduler = Scheduler::new(
            config(2, true),
            as_servers(&[&broken, &healthy]),
            runner.clone(),
        );

        scheduler.run().await;

        assert_eq!(*runner.ran.lock().unwrap(), vec!["Build".to_string()]);
    }

    #[tokio::test]
    async fn test_polls_again_after_a_job() {
        let server = Arc::new(
            FakeServer::new("http://one")
                .with_job(claimed_job("First", vec![]))
                .with_job(claimed_job("Second", vec![])),
        );
        let runner = Arc::new(ScriptedRunner::default());
        let mut scheduler = Scheduler::new(config(1, false), as_servers(&[&server]), runner.clone());

        assert!(scheduler.poll_once().await);
        assert!(scheduler.poll_once().await);
        assert!(!scheduler.poll_once().await);
        assert_eq!(
            *runner.ran.lock().unwrap(),
            vec!["First".to_string(), "Second".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stop_request_exits_without_claiming() {
        let server = Arc::new(FakeServer::new("http://one"));
        let runner = Arc::new(ScriptedRunner::default());
        let scheduler = Scheduler::new(config(1, false), as_servers(&[&server]), runner);
        let bridge = InterruptBridge::inert(scheduler.commands());
        let mut scheduler = scheduler.with_interrupts(bridge.clone());

        bridge.trigger(StopMode::Graceful);
        tokio::time::timeout(Duration::from_secs(1), scheduler.run())
            .await
            .unwrap();

        assert_eq!(server.claims(), 0);
    }

    #[tokio::test]
    async fn test_stop_wakes_idle_loop() {
        let server = Arc::new(FakeServer::new("http://one"));
        let runner = Arc::new(ScriptedRunner::default());
        let mut cfg = config(1, false);
        cfg.poll_interval = Duration::from_secs(3600);
        let scheduler = Scheduler::new(cfg, as_servers(&[&server]), runner);
        let bridge = InterruptBridge::inert(scheduler.commands());
        let mut scheduler = scheduler.with_interrupts(bridge.clone());

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            bridge.trigger(StopMode::Cancel);
        });
        tokio::time::timeout(Duration::from_secs(5), scheduler.run())
            .await
            .unwrap();
        stopper.await.unwrap();

        assert_eq!(server.claims(), 1);
    }

    #[tokio::test]
    async fn test_stale_commands_cleared_before_claim() {
        let job = claimed_job("Build", vec![]);
        let server = Arc::new(FakeServer::new("http://one").with_job(job));
        let runner = Arc::new(ScriptedRunner::default());
        let mut scheduler = Scheduler::new(config(1, true), as_servers(&[&server]), runner.clone());

        scheduler
            .commands()
            .send(Command::Cancel { job_id: None })
            .unwrap();
        scheduler.run().await;

        assert!(!*runner.cancel_seen.lock().unwrap());
    }

    #[tokio::test]
    async fn test_server_cancels_cleared_after_job() {
        let server = Arc::new(FakeServer {
            cancel_replies: true,
            ..FakeServer::new("http://one").with_job(claimed_job("Build", vec![]))
        });
        let runner = Arc::new(ScriptedRunner::default());
        let mut scheduler = Scheduler::new(config(1, true), as_servers(&[&server]), runner);

        scheduler.run().await;

        // Replies to the job's reports queued cancels; the cycle cleared them.
        assert_eq!(scheduler.commands.clear(), 0);
        assert!(!server.reports().is_empty());
    }
}
