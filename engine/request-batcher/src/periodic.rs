//! # Periodic Task
//!
//! Runs an async job right away and then repeatedly, sleeping for the
//! interval minus however long the job took.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Background loop driving a single job
pub struct PeriodicTask {
    interval: Duration,
    once: bool,
    running: Mutex<Option<Running>>,
}

impl PeriodicTask {
    pub fn new(interval: Duration) -> Self {
        Self { interval, once: false, running: Mutex::new(None) }
    }

    /// A task that runs its job a single time when started
    pub fn once() -> Self {
        Self { interval: Duration::ZERO, once: true, running: Mutex::new(None) }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().as_ref().is_some_and(|running| !running.handle.is_finished())
    }

    /// Spawn the loop. Does nothing if it is already running.
    pub fn start<F, Fut>(&self, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.running.lock();
        if slot.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            debug!("Periodic task already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval = self.interval;
        let once = self.once;

        let handle = tokio::spawn(async move {
            info!("Periodic task started (interval: {:?}, once: {})", interval, once);
            loop {
                let started = Instant::now();
                job().await;
                if once || *shutdown_rx.borrow() {
                    break;
                }

                let pause = interval.saturating_sub(started.elapsed());
                tokio::select! {
                    _ = sleep(pause) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("Periodic task stopped");
        });

        *slot = Some(Running { shutdown, handle });
    }

    /// Signal the loop to stop and wait for it. A run in progress completes first.
    pub async fn stop(&self) {
        let Some(Running { shutdown, handle }) = self.running.lock().take() else {
            return;
        };
        // The loop may already have exited in once mode.
        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            warn!("Periodic task ended abnormally: {}", e);
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}
