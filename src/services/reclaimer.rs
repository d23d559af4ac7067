//! Post-read deletion queue for one-time objects.
//!
//! Handlers hand keys to a [`Reclaimer`]; a single consumer task drains the
//! queue and runs deletes with bounded concurrency after a short grace delay.
//! Deletes are best-effort: failures are logged and left for the sweeper.

use crate::services::object_store::ObjectStore;
use std::{sync::Arc, time::Duration};
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{info, warn};

#[derive(Clone)]
pub struct Reclaimer {
    tx: mpsc::UnboundedSender<String>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl Reclaimer {
    /// Start the consumer task and return a handle to it.
    pub fn spawn(store: Arc<dyn ObjectStore>, grace: Duration, concurrency: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let in_flight = Arc::new(watch::Sender::new(0usize));
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));

        let counter = in_flight.clone();
        tokio::spawn(async move {
            while let Some(key) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let store = store.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    tokio::time::sleep(grace).await;
                    match store.delete(&key).await {
                        Ok(()) => info!("[reclaim] deleted one-time object {}", key),
                        Err(err) => warn!("[reclaim] failed to delete {}: {}", key, err),
                    }
                    counter.send_modify(|n| *n = n.saturating_sub(1));
                });
            }
        });

        Self { tx, in_flight }
    }

    /// Queue `key` for deletion. Never blocks.
    pub fn schedule(&self, key: String) {
        self.in_flight.send_modify(|n| *n += 1);
        if let Err(err) = self.tx.send(key) {
            self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
            warn!("[reclaim] queue closed, dropping delete of {}", err.0);
        }
    }

    /// Deletes queued or running right now.
    pub fn pending(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Resolve once every scheduled delete has finished.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Guard that schedules `key` when dropped.
    pub fn guard(&self, key: String) -> ReclaimGuard {
        ReclaimGuard {
            key: Some(key),
            reclaimer: self.clone(),
        }
    }
}

/// Attached to a response body; dropping the body (finished or abandoned)
/// queues the delete.
pub struct ReclaimGuard {
    key: Option<String>,
    reclaimer: Reclaimer,
}

impl Drop for ReclaimGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.reclaimer.schedule(key);
        }
    }
}
