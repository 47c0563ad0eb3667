//! Commands directed at the job in progress.
//!
//! Signals and server replies both end up here, and the runner cannot tell
//! them apart.

use gantry_core::JobId;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Abort a job. `None` targets whichever job is running.
    Cancel { job_id: Option<JobId> },
    /// Finish the current job, then stop polling.
    Stop,
}

impl Command {
    fn cancels(&self, job: JobId) -> bool {
        match self {
            Command::Cancel { job_id } => job_id.is_none_or(|id| id == job),
            Command::Stop => false,
        }
    }
}

/// Receiving side of the command channel.
pub struct CommandQueue {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandQueue {
    pub fn channel() -> (mpsc::UnboundedSender<Command>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Discard everything queued. Returns how many commands were dropped.
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Consume queued commands without waiting; true if one cancels `job`.
    pub fn cancel_pending(&mut self, job: JobId) -> bool {
        let mut cancel = false;
        while let Ok(command) = self.rx.try_recv() {
            cancel |= command.cancels(job);
        }
        cancel
    }

    /// Resolve once a command cancelling `job` arrives.
    pub async fn cancelled(&mut self, job: JobId) {
        loop {
            match self.rx.recv().await {
                Some(command) if command.cancels(job) => return,
                Some(_) => continue,
                None => std::future::pending::<()>().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_targets() {
        let job = JobId::new();
        let (tx, mut queue) = CommandQueue::channel();

        tx.send(Command::Cancel {
            job_id: Some(JobId::new()),
        })
        .unwrap();
        tx.send(Command::Stop).unwrap();
        assert!(!queue.cancel_pending(job));

        tx.send(Command::Cancel { job_id: None }).unwrap();
        assert!(queue.cancel_pending(job));
        assert!(!queue.cancel_pending(job));
    }

    #[test]
    fn test_clear() {
        let (tx, mut queue) = CommandQueue::channel();
        tx.send(Command::Stop).unwrap();
        tx.send(Command::Cancel { job_id: None }).unwrap();
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.clear(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_skips_other_jobs() {
        let job = JobId::new();
        let (tx, mut queue) = CommandQueue::channel();
        tx.send(Command::Cancel {
            job_id: Some(JobId::new()),
        })
        .unwrap();
        tx.send(Command::Cancel { job_id: Some(job) }).unwrap();
        queue.cancelled(job).await;
        assert!(!queue.cancel_pending(job));
    }
}
