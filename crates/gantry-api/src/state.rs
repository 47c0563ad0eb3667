//! Application state.

use gantry_core::remote::RemoteStatusApi;
use gantry_db::CiStore;
use gantry_scheduler::{EventIngestor, JobDispatcher};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<EventIngestor>,
    pub dispatcher: Arc<JobDispatcher>,
    /// Shared secret for `POST /events` signatures. Unsigned intake when unset.
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(store: Arc<dyn CiStore>, remote: Arc<dyn RemoteStatusApi>) -> Self {
        Self::with_base_url(store, remote, None)
    }

    /// Build state whose commit statuses link back to `base_url`.
    pub fn with_base_url(
        store: Arc<dyn CiStore>,
        remote: Arc<dyn RemoteStatusApi>,
        base_url: Option<String>,
    ) -> Self {
        let mut ingestor = EventIngestor::new(store.clone(), remote.clone());
        if let Some(url) = base_url {
            ingestor = ingestor.with_base_url(url);
        }

        Self {
            ingestor: Arc::new(ingestor),
            dispatcher: Arc::new(JobDispatcher::new(store, remote)),
            webhook_secret: None,
        }
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }
}
