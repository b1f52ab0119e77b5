use std::{future::Future, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

/// A fixed-period background job owned by one screen.
///
/// The first tick fires one full period after spawn. A tick that outlives the period delays the
/// next one instead of overlapping it. After [`cancel`](Self::cancel) (or drop) no new tick
/// starts; a tick already in flight runs to completion.
#[derive(Debug)]
pub struct IntervalTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl IntervalTask {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        tick().await;
                    }
                }
            }
            tracing::debug!(task = name, "interval task stopped");
        });
        tracing::debug!(task = name, period_ms = period.as_millis(), "interval task started");
        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn cancel(&self) {
        self.shutdown.send_replace(true);
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for IntervalTask {
    fn drop(&mut self) {
        if !self.shutdown.send_replace(true) {
            tracing::debug!(task = self.name, "interval task dropped");
        }
    }
}
