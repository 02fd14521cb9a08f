//! Best-effort background persistence for timer metadata.
//!
//! Writes are queued in the order the state machine produced them and applied
//! by a single task, so a late tick can never land after a transition that
//! superseded it. Callers never await a write; failures are logged and
//! dropped.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};

use crate::db::{Database, MetadataKey};

use super::{policy::BreakRatio, state::ActiveTimer};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PendingWrite {
    /// `None` removes the anchor.
    Anchor(Option<ActiveTimer>),
    LastFlowDuration(u64),
    BreakRatio(BreakRatio),
}

enum PersistCommand {
    Write(PendingWrite),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct Persister {
    tx: mpsc::UnboundedSender<PersistCommand>,
    enabled: Arc<AtomicBool>,
}

impl Persister {
    /// Spawns the writer task. Writes are dropped until `enabled` is set.
    pub fn spawn(db: Database, enabled: Arc<AtomicBool>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistCommand>();

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    PersistCommand::Write(write) => {
                        if let Err(err) = apply(&db, write).await {
                            log_warn!("Background write {write:?} failed: {err:#}");
                        }
                    }
                    PersistCommand::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx, enabled }
    }

    pub fn persist_in_background(&self, write: PendingWrite) {
        if !self.enabled.load(Ordering::SeqCst) {
            log::debug!("Skipping {write:?}; timer not ready");
            return;
        }
        if self.tx.send(PersistCommand::Write(write)).is_err() {
            log_error!("Persistence task is gone; dropped {write:?}");
        }
    }

    /// Waits until every write queued so far has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PersistCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn apply(db: &Database, write: PendingWrite) -> Result<()> {
    match write {
        PendingWrite::Anchor(Some(anchor)) => {
            db.set_metadata(MetadataKey::ActiveTimer, &anchor).await
        }
        PendingWrite::Anchor(None) => db.delete_metadata(MetadataKey::ActiveTimer).await,
        PendingWrite::LastFlowDuration(duration) => {
            db.set_metadata(MetadataKey::LastFlowDuration, &duration)
                .await
        }
        PendingWrite::BreakRatio(ratio) => db.set_metadata(MetadataKey::BreakRatio, &ratio).await,
    }
}
