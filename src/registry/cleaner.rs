//! Periodic removal of expired tickets.
//!
//! Reads already treat expired tickets as gone; the sweep only reclaims
//! storage and removes descendants of expired tickets.
use std::sync::Arc;
use std::time::Duration;

use tokio::{select, sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::registry::TicketRegistry;

/// Stops the cleaner when [`stop`](Self::stop) is called or when dropped.
#[derive(Debug)]
pub struct CleanerHandle {
    shutdown_tx: watch::Sender<()>,
    task: JoinHandle<()>,
}

impl CleanerHandle {
    /// Signal the task and wait for it to finish its current pass.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

pub fn spawn_cleaner(registry: Arc<dyn TicketRegistry>, interval: Duration) -> CleanerHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());

    let task = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "ticket cleaner started");
        loop {
            select! {
                _ = sleep(interval) => {}
                _ = shutdown_rx.changed() => {
                    debug!("ticket cleaner stopping");
                    return;
                }
            }

            match registry.clean_expired().await {
                Ok(removed) if !removed.is_empty() => {
                    info!(removed = removed.len(), "expired tickets removed");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "ticket cleaner pass failed"),
            }
        }
    });

    CleanerHandle { shutdown_tx, task }
}
