use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Cancellable fixed-cadence timer
///
/// Ticks are delivered through [`PeriodicTask::tick`]. At most one tick is
/// buffered, so a slow consumer never sees a burst. Stopping or dropping the
/// task ends the timer; nothing keeps firing after the owner is gone.
pub struct PeriodicTask {
    tick_rx: mpsc::Receiver<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    period: Duration,
}

impl PeriodicTask {
    /// Spawns the timer; the first tick fires one period from now
    pub fn start(period: Duration) -> Self {
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(mpsc::error::TrySendError::Closed(_)) = tick_tx.try_send(()) {
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            tick_rx,
            shutdown_tx: Some(shutdown_tx),
            period,
        }
    }

    /// Waits for the next tick; `None` once the timer has stopped
    pub async fn tick(&mut self) -> Option<()> {
        self.tick_rx.recv().await
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stops the timer
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}
