//! Dedicated consumer for working memories in `Worker` mode.

use crate::error::ActionError;
use crate::memory::WorkingMemory;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Background task that drains the queue whenever something is enqueued.
///
/// Drains run on the blocking pool, since entries may block on the network
/// or on nested rendezvous.
pub struct QueueWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl QueueWorker {
    /// Start consuming `wm`'s queue. Must be called inside a tokio runtime.
    pub fn spawn(wm: Arc<WorkingMemory>) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let join_handle = tokio::spawn(async move {
            tracing::info!(memory = %wm.id(), "Queue worker started");
            loop {
                if !wm.queue().is_empty() {
                    let drainer = Arc::clone(&wm);
                    let progressed = match tokio::task::spawn_blocking(move || drainer.flush()).await {
                        Ok(Ok(executed)) => {
                            tracing::trace!(executed, "Worker drain finished");
                            executed > 0
                        }
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "Worker drain failed");
                            true
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Worker drain panicked");
                            true
                        }
                    };
                    // Zero means someone else holds the drain; wait for the
                    // next wake-up instead of spinning.
                    if progressed {
                        continue;
                    }
                }

                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = wm.queue().notified() => {}
                }
            }
            tracing::info!(memory = %wm.id(), "Queue worker stopped");
        });

        Self {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    /// Signal the worker to stop and wait for it to finish. A drain already
    /// running completes first.
    pub async fn stop(mut self) -> Result<(), ActionError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|e| ActionError::Worker(format!("queue worker join: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
