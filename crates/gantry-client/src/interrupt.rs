//! Interrupt bridge: OS signals in, worker commands out.
//!
//! Two groups are watched. The cancel group (`SIGUSR1`, `SIGINT`) aborts the
//! running job and stops the worker. The graceful group (`SIGUSR2`) lets the
//! running job finish, then stops. Each group enqueues its command once, the
//! first time it fires; later deliveries only keep the flag set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};
use tracing::{info, warn};

use crate::command::Command;

/// Which way a signal asks the worker to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Cancel,
    Graceful,
}

struct SignalGroup {
    mode: StopMode,
    message: Command,
    triggered: AtomicBool,
}

struct Shared {
    commands: mpsc::UnboundedSender<Command>,
    groups: [SignalGroup; 2],
    stopped: Notify,
}

impl Shared {
    fn group(&self, mode: StopMode) -> &SignalGroup {
        match mode {
            StopMode::Cancel => &self.groups[0],
            StopMode::Graceful => &self.groups[1],
        }
    }

    /// Flag set plus a non-blocking enqueue, nothing else.
    fn fire(&self, mode: StopMode) {
        let group = self.group(mode);
        if !group.triggered.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(group.message);
        }
        self.stopped.notify_waiters();
    }
}

/// Turns delivered signals into [`Command`]s and a sticky stop flag.
#[derive(Clone)]
pub struct InterruptBridge {
    shared: Arc<Shared>,
}

impl InterruptBridge {
    /// A bridge with no signal handlers; only [`trigger`](Self::trigger) fires it.
    pub fn inert(commands: mpsc::UnboundedSender<Command>) -> Self {
        let group = |mode, message| SignalGroup {
            mode,
            message,
            triggered: AtomicBool::new(false),
        };
        Self {
            shared: Arc::new(Shared {
                commands,
                groups: [
                    group(StopMode::Cancel, Command::Cancel { job_id: None }),
                    group(StopMode::Graceful, Command::Stop),
                ],
                stopped: Notify::new(),
            }),
        }
    }

    /// Register signal handlers. Registration failures leave the bridge
    /// without that signal rather than failing.
    pub fn install(commands: mpsc::UnboundedSender<Command>) -> Self {
        let bridge = Self::inert(commands);
        bridge.listen();
        bridge
    }

    #[cfg(unix)]
    fn listen(&self) {
        use tokio::signal::unix::{SignalKind, signal};

        let watched = [
            ("SIGUSR1", SignalKind::user_defined1(), StopMode::Cancel),
            ("SIGINT", SignalKind::interrupt(), StopMode::Cancel),
            ("SIGUSR2", SignalKind::user_defined2(), StopMode::Graceful),
        ];
        for (name, kind, mode) in watched {
            match signal(kind) {
                Ok(mut stream) => {
                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        while stream.recv().await.is_some() {
                            info!(signal = name, "Received signal");
                            shared.fire(mode);
                        }
                    });
                }
                Err(e) => warn!(signal = name, error = %e, "Failed to register signal handler"),
            }
        }
    }

    #[cfg(not(unix))]
    fn listen(&self) {
        info!("Signals are not supported here; only server cancels apply");
    }

    /// Fire a group as if its signal had been delivered.
    pub fn trigger(&self, mode: StopMode) {
        self.shared.fire(mode);
    }

    pub fn triggered(&self, mode: StopMode) -> bool {
        self.shared.group(mode).triggered.load(Ordering::SeqCst)
    }

    /// Whether any group has fired.
    pub fn stop_requested(&self) -> bool {
        self.shared
            .groups
            .iter()
            .any(|g| g.triggered.load(Ordering::SeqCst))
    }

    /// Resolve once a stop has been requested.
    pub async fn stopped(&self) {
        let notified = self.shared.stopped.notified();
        if self.stop_requested() {
            return;
        }
        notified.await;
    }

    /// The mode of the first group that fired, cancel taking precedence.
    pub fn stop_mode(&self) -> Option<StopMode> {
        self.shared
            .groups
            .iter()
            .find(|g| g.triggered.load(Ordering::SeqCst))
            .map(|g| g.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandQueue;
    use gantry_core::JobId;
    use std::time::Duration;

    #[test]
    fn test_cancel_enqueued_once() {
        let (tx, mut queue) = CommandQueue::channel();
        let bridge = InterruptBridge::inert(tx);

        bridge.trigger(StopMode::Cancel);
        bridge.trigger(StopMode::Cancel);
        bridge.trigger(StopMode::Cancel);

        assert!(bridge.triggered(StopMode::Cancel));
        assert!(!bridge.triggered(StopMode::Graceful));
        assert_eq!(queue.clear(), 1);
    }

    #[test]
    fn test_cancel_targets_running_job() {
        let (tx, mut queue) = CommandQueue::channel();
        let bridge = InterruptBridge::inert(tx);
        bridge.trigger(StopMode::Cancel);
        assert!(queue.cancel_pending(JobId::new()));
    }

    #[test]
    fn test_graceful_does_not_cancel() {
        let (tx, mut queue) = CommandQueue::channel();
        let bridge = InterruptBridge::inert(tx);

        assert!(!bridge.stop_requested());
        bridge.trigger(StopMode::Graceful);

        assert!(bridge.stop_requested());
        assert_eq!(bridge.stop_mode(), Some(StopMode::Graceful));
        assert!(!queue.cancel_pending(JobId::new()));
    }

    #[tokio::test]
    async fn test_stopped_wakes_waiter() {
        let (tx, _queue) = CommandQueue::channel();
        let bridge = InterruptBridge::inert(tx);

        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.stopped().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        bridge.trigger(StopMode::Graceful);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_registers_handlers() {
        let (tx, _queue) = CommandQueue::channel();
        let bridge = InterruptBridge::install(tx);
        assert!(!bridge.stop_requested());
    }
}
