use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::sync::{SyncAdapter, SyncJob};
use crate::services::metrics::SYNC_TOTAL;

/// Producer side of the sync queue. Cheap to clone.
#[derive(Clone)]
pub struct SyncQueue {
    tx: mpsc::Sender<SyncJob>,
}

impl SyncQueue {
    /// Bounded queue of `capacity` jobs and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue `job` without waiting. A full or closed queue drops the job with
    /// a warning; the return value says whether it was accepted.
    pub fn enqueue(&self, job: SyncJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(invoice_id = %job.invoice_id, payment_id = ?job.payment_id, "Sync queue full, dropping job");
                SYNC_TOTAL.with_label_values(&["job", "dropped"]).inc();
                false
            }
            Err(TrySendError::Closed(job)) => {
                warn!(invoice_id = %job.invoice_id, payment_id = ?job.payment_id, "Sync worker stopped, dropping job");
                SYNC_TOTAL.with_label_values(&["job", "dropped"]).inc();
                false
            }
        }
    }
}

/// Consumes the sync queue one job at a time until cancelled or until every
/// [`SyncQueue`] handle is gone.
pub struct SyncWorker {
    adapter: Arc<SyncAdapter>,
    rx: mpsc::Receiver<SyncJob>,
    shutdown: CancellationToken,
}

impl SyncWorker {
    pub fn new(
        adapter: Arc<SyncAdapter>,
        rx: mpsc::Receiver<SyncJob>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            rx,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("Accounting sync worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let pending = self.rx.len();
                    if pending > 0 {
                        warn!(pending = pending, "Sync worker cancelled with jobs still queued");
                    }
                    break;
                }
                job = self.rx.recv() => {
                    match job {
                        Some(job) => self.adapter.try_sync(job).await,
                        None => {
                            info!("Sync queue closed, worker exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!("Accounting sync worker stopped");
    }
}
