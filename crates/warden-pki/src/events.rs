//! Lifecycle notifications and audit lines.
//!
//! Delivery is fire-and-forget: a sink that cannot deliver logs the
//! failure and moves on, the lifecycle operation never fails because of it.

use std::path::PathBuf;

use tokio::sync::broadcast;

use crate::audit;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The identity set of one organization changed.
    UsersUpdated { org_id: String },
    /// Server topology or the credentials it serves changed.
    ServersUpdated,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);

    /// Record a human-readable audit line for `org_id`.
    fn audit(&self, event: &str, org_id: &str, message: &str);
}

/// Sink that fans events out over a tokio broadcast channel and writes
/// audit lines to the append-only log.
pub struct BroadcastSink {
    tx: broadcast::Sender<LifecycleEvent>,
    audit_path: PathBuf,
}

impl BroadcastSink {
    pub fn new(audit_path: PathBuf) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, audit_path }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: LifecycleEvent) {
        tracing::debug!(?event, "Lifecycle event");
        // No subscribers is the normal case for one-shot CLI runs.
        let _ = self.tx.send(event);
    }

    fn audit(&self, event: &str, org_id: &str, message: &str) {
        if let Err(e) = audit::append_entry_to(
            &self.audit_path,
            event,
            &[("org", org_id), ("message", message)],
        ) {
            tracing::warn!(error = %e, event, org_id, "Failed to write audit entry");
        }
    }
}
