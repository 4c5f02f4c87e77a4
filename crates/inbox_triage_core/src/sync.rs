//! crates/inbox_triage_core/src/sync.rs
//!
//! Fire-and-forget delivery of committed decisions to the item source.
//!
//! Decisions are handed to a FIFO channel drained by a single worker task, so
//! remote calls happen in commit order and each decision is attempted exactly
//! once. The worker never touches ledger state; its only output is the
//! `SyncStatus` signal.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::Decision;
use crate::ports::ItemSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { decision_id: Uuid },
    /// The decision stands locally but the remote never saw it.
    Failed { decision_id: Uuid, reason: String },
}

/// Running tally published by the dispatcher worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub attempted: u64,
    pub synced: u64,
    pub failed: u64,
    /// Decisions whose single attempt failed, oldest first.
    pub needs_resync: Vec<Uuid>,
    pub last: Option<SyncOutcome>,
}

pub struct SyncDispatcher {
    queue: mpsc::UnboundedSender<Decision>,
    status: watch::Receiver<SyncStatus>,
    worker: JoinHandle<()>,
}

impl SyncDispatcher {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn(source: Arc<dyn ItemSource>) -> Self {
        let (queue, mut inbox) = mpsc::unbounded_channel::<Decision>();
        let (status_tx, status) = watch::channel(SyncStatus::default());

        let worker = tokio::spawn(async move {
            while let Some(decision) = inbox.recv().await {
                let outcome = match source.send_decision(&decision.item_id, &decision.action).await {
                    Ok(()) => {
                        info!(decision = %decision.id, item = %decision.item_id, "Decision synced.");
                        SyncOutcome::Synced { decision_id: decision.id }
                    }
                    Err(e) => {
                        warn!(
                            decision = %decision.id,
                            item = %decision.item_id,
                            error = %e,
                            "Decision sync failed; needs future resync."
                        );
                        SyncOutcome::Failed {
                            decision_id: decision.id,
                            reason: e.to_string(),
                        }
                    }
                };
                status_tx.send_modify(|status| {
                    status.attempted += 1;
                    match &outcome {
                        SyncOutcome::Synced { .. } => status.synced += 1,
                        SyncOutcome::Failed { decision_id, .. } => {
                            status.failed += 1;
                            status.needs_resync.push(*decision_id);
                        }
                    }
                    status.last = Some(outcome);
                });
            }
        });

        Self { queue, status, worker }
    }

    /// Hands `decision` to the worker without waiting for the remote call.
    /// Returns `false` only if the worker is gone.
    pub fn dispatch(&self, decision: Decision) -> bool {
        let id = decision.id;
        if self.queue.send(decision).is_err() {
            warn!(decision = %id, "Sync worker stopped; decision left unsynced.");
            return false;
        }
        true
    }

    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Closes the queue and waits until every handed-off decision has been
    /// attempted.
    pub async fn drain(self) {
        let Self { queue, worker, .. } = self;
        drop(queue);
        if let Err(e) = worker.await {
            warn!(error = %e, "Sync worker ended abnormally.");
        }
    }
}
