//! Periodic eviction of aged sessions
//!
//! The reaper is process-scoped state with an explicit start/stop. Tests
//! that need a deterministic sweep call `SessionManager::sweep_at` instead
//! of waiting on the timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use super::SessionManager;

/// Starts the sweep loop
pub struct Reaper;

impl Reaper {
    /// Sweep `manager` every `period`; the first sweep runs one period from now
    pub fn start(manager: Arc<SessionManager>, period: Duration) -> ReaperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = manager.sweep().await;
                        if evicted.is_empty() {
                            debug!("Sweep found nothing to evict");
                        } else {
                            info!("Sweep evicted {} sessions", evicted.len());
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }

            debug!("Reaper stopped");
        });

        info!("Reaper started (every {:?})", period);
        ReaperHandle {
            stop_tx: Some(stop_tx),
            task,
        }
    }
}

/// Handle to a running reaper
pub struct ReaperHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop and wait for an in-progress sweep to finish
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}
