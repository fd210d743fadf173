//! Background maintenance tasks.
//!
//! Each task is a [`PeriodicTask`]: started at boot, ticked on a fixed
//! period, and stopped (then awaited) at shutdown.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use ephemera_store::ChannelStore;

use crate::rate_limit::Limiters;

/// Handle to a running periodic task.
pub struct PeriodicTask {
    name: &'static str,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Run `tick` every `period`, starting one period from now.
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick().await,
                    _ = &mut shutdown_rx => break,
                }
            }
            debug!(task = name, "Periodic task stopped");
        });

        Self {
            name,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            tracing::warn!(task = self.name, error = %e, "Periodic task ended abnormally");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        // A handle dropped without `stop` must not leave the timer running.
        if self.shutdown_tx.is_some() {
            self.handle.abort();
        }
    }
}

/// Evict local channels idle for longer than `max_idle`, every `period`.
pub fn spawn_reclaimer(store: ChannelStore, period: Duration, max_idle: Duration) -> PeriodicTask {
    PeriodicTask::spawn("reclaimer", period, move || {
        let store = store.clone();
        async move {
            let removed = store.reclaim_idle(max_idle).await;
            if removed > 0 {
                let remaining = store.local_channel_count().await;
                info!(removed, remaining, "Reclaimed idle local channels");
            }
        }
    })
}

/// Purge expired rate-limit windows, every `period`.
pub fn spawn_limiter_purge(limiters: Limiters, period: Duration) -> PeriodicTask {
    PeriodicTask::spawn("rate-limit-purge", period, move || {
        let limiters = limiters.clone();
        async move {
            let removed = limiters.purge_stale().await;
            if removed > 0 {
                debug!(removed, "Purged expired rate-limit windows");
            }
        }
    })
}
