//! Cancellation of background work.
//!
//! Key rotation and session and challenge pruning run for the life of the process.
//! [`ShutdownCoordinator`] owns those tasks, flips a single stop flag when
//! asked to stop, and aborts whatever is still running after the grace
//! period, naming it in the log.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Owns the background tasks of the authority.
pub struct ShutdownCoordinator {
    stop_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
    running: Arc<Mutex<Vec<&'static str>>>,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx,
            tasks: JoinSet::new(),
            running: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A handle that resolves once shutdown begins.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            receiver: self.stop_tx.subscribe(),
        }
    }

    /// Run `future` until it finishes or shutdown begins, whichever is first.
    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let stop = self.stop_signal();
        let running = Arc::clone(&self.running);
        running.lock().push(name);

        self.tasks.spawn(async move {
            tokio::select! {
                () = future => debug!(task = name, "Background task finished"),
                () = stop.stopped() => debug!(task = name, "Background task stopped"),
            }

            let mut running = running.lock();
            if let Some(pos) = running.iter().position(|n| *n == name) {
                running.swap_remove(pos);
            }
        });
    }

    /// Signal every task and wait up to `grace` for them to return.
    pub async fn shutdown(mut self, grace: Duration) {
        info!(tasks = self.tasks.len(), "Stopping background tasks");
        self.stop_tx.send_replace(true);

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Background task panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            let stuck = self.running.lock().clone();
            warn!(tasks = ?stuck, "Grace period elapsed, aborting background tasks");
            self.tasks.abort_all();
        }

        info!("Background tasks stopped");
    }

    /// Tasks that have not yet returned.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves when the owning coordinator starts shutting down.
#[derive(Clone)]
pub struct StopSignal {
    receiver: watch::Receiver<bool>,
}

impl StopSignal {
    pub async fn stopped(mut self) {
        // A dropped coordinator counts as a stop.
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Resolve on SIGTERM or Ctrl-C.
///
/// # Errors
///
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!(signal = "SIGINT", "Shutdown requested");
            }
            _ = terminate.recv() => info!(signal = "SIGTERM", "Shutdown requested"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!(signal = "ctrl-c", "Shutdown requested");
    }

    Ok(())
}
