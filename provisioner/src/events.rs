//! Lifecycle events published by the dependency manager.
//!
//! Subscribers receive events over unbounded channels, so publishing never
//! blocks. A subscriber that drops its receiver is pruned on the next
//! publish.

use crate::dependency::Dependency;
use crate::status::{DependencyStatus, DownloadProgress};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

/// Something observable happened in the provisioning pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ProvisionEvent {
    /// The manager finished initializing.
    Initialized,
    /// A status check produced a new snapshot.
    StatusUpdated(DependencyStatus),
    /// An install made progress.
    DownloadProgress(DownloadProgress),
    /// An install began.
    InstallStarted(Dependency),
    /// An install finished successfully.
    InstallCompleted(Dependency),
    /// An install failed.
    InstallFailed {
        /// Dependency whose install failed.
        dependency: Dependency,
        /// Human-readable cause.
        error: String,
    },
    /// The installed dependencies were removed.
    DependenciesCleanedUp,
}

/// Fan-out of [`ProvisionEvent`]s to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ProvisionEvent>>>,
}

impl EventBus {
    /// An event bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Only events published afterwards are seen.
    pub fn subscribe(&self) -> Receiver<ProvisionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&self, event: &ProvisionEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers as of the last publish.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
