//! Result relay: the task that owns server communication during a job run.
//!
//! Two channels feed it. The message channel carries job progress and is
//! forwarded strictly in order. The control channel carries notices and
//! `Quit`; it is always served first so it never waits behind output.

use gantry_core::JobId;
use gantry_core::protocol::{ReportMessage, ServerCommand, WorkerStatus};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::ServerApi;
use crate::command::Command;
use crate::error::{ClientError, ClientResult};

const MESSAGE_CAPACITY: usize = 256;

enum RelayMessage {
    Report {
        job_id: JobId,
        message: ReportMessage,
    },
    /// Acknowledged once everything queued before it has been sent.
    Flush(oneshot::Sender<()>),
}

enum ControlItem {
    Notice { server: usize, status: WorkerStatus },
    Quit,
}

/// Producer handle for one job's progress messages.
#[derive(Clone)]
pub struct Reporter {
    job_id: JobId,
    tx: mpsc::Sender<RelayMessage>,
}

impl Reporter {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Queue a message for the server. Waits while the queue is full.
    pub async fn send(&self, message: ReportMessage) {
        let item = RelayMessage::Report {
            job_id: self.job_id,
            message,
        };
        if self.tx.send(item).await.is_err() {
            warn!(job_id = %self.job_id, "Relay is gone, dropping report");
        }
    }
}

/// Handle to a running relay task.
pub struct Relay {
    messages: mpsc::Sender<RelayMessage>,
    control: mpsc::UnboundedSender<ControlItem>,
    task: JoinHandle<()>,
}

impl Relay {
    /// Start a relay reporting to `servers[active]`.
    ///
    /// Cancel commands in report replies are forwarded to `commands`.
    pub fn spawn(
        servers: Vec<Arc<dyn ServerApi>>,
        active: usize,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        let (messages, message_rx) = mpsc::channel(MESSAGE_CAPACITY);
        let (control, control_rx) = mpsc::unbounded_channel();
        let worker = RelayTask {
            servers,
            active,
            messages: message_rx,
            control: control_rx,
            commands,
        };
        let task = tokio::spawn(worker.run());
        Self {
            messages,
            control,
            task,
        }
    }

    pub fn reporter(&self, job_id: JobId) -> Reporter {
        Reporter {
            job_id,
            tx: self.messages.clone(),
        }
    }

    /// Send an advisory status to one of the relay's servers.
    pub fn notice(&self, server: usize, status: WorkerStatus) {
        if self.control.send(ControlItem::Notice { server, status }).is_err() {
            warn!("Relay is gone, dropping notice");
        }
    }

    /// Wait until every message queued so far has been sent.
    pub async fn flush(&self) -> ClientResult<()> {
        let (tx, rx) = oneshot::channel();
        self.messages
            .send(RelayMessage::Flush(tx))
            .await
            .map_err(|_| ClientError::RelayClosed)?;
        rx.await.map_err(|_| ClientError::RelayClosed)
    }

    /// Ask the relay to stop and wait for it.
    pub async fn quit(self) {
        let _ = self.control.send(ControlItem::Quit);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Relay task failed");
        }
    }
}

struct RelayTask {
    servers: Vec<Arc<dyn ServerApi>>,
    active: usize,
    messages: mpsc::Receiver<RelayMessage>,
    control: mpsc::UnboundedReceiver<ControlItem>,
    commands: mpsc::UnboundedSender<Command>,
}

impl RelayTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some(item) = self.control.recv() => match item {
                    ControlItem::Notice { server, status } => self.notify(server, &status).await,
                    ControlItem::Quit => break,
                },
                Some(message) = self.messages.recv() => self.forward(message).await,
                else => break,
            }
        }

        // Control items queued behind Quit still go out, then any stragglers.
        while let Ok(item) = self.control.try_recv() {
            if let ControlItem::Notice { server, status } = item {
                self.notify(server, &status).await;
            }
        }
        while let Ok(message) = self.messages.try_recv() {
            self.forward(message).await;
        }
        debug!("Relay stopped");
    }

    async fn notify(&self, server: usize, status: &WorkerStatus) {
        let Some(api) = self.servers.get(server) else {
            return;
        };
        if let Err(e) = api.post_status(status).await {
            warn!(server = api.url(), error = %e, "Failed to post worker status");
        }
    }

    async fn forward(&self, message: RelayMessage) {
        match message {
            RelayMessage::Report { job_id, message } => {
                let Some(api) = self.servers.get(self.active) else {
                    return;
                };
                match api.report(job_id, &message).await {
                    Ok(reply) => {
                        if reply.command == Some(ServerCommand::Cancel) {
                            debug!(job_id = %job_id, "Server asked to cancel job");
                            let _ = self.commands.send(Command::Cancel {
                                job_id: Some(job_id),
                            });
                        }
                    }
                    Err(e) => warn!(job_id = %job_id, error = %e, "Failed to report progress"),
                }
            }
            RelayMessage::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
