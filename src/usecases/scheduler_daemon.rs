use std::{sync::Arc, time::Duration};

use tokio::{runtime::Handle, sync::watch, task::JoinHandle};

use crate::usecases::broadcast::BroadcastScheduler;

const SCHEDULER_DAEMON_STARTED: &str = "INBOX_SCHEDULER_DAEMON_STARTED";
const SCHEDULER_DAEMON_STOPPED: &str = "INBOX_SCHEDULER_DAEMON_STOPPED";
const SCHEDULER_DAEMON_TICK_FAILED: &str = "INBOX_SCHEDULER_DAEMON_TICK_FAILED";

/// Background task that dispatches due broadcasts on every tick. Stops when
/// shut down or dropped.
#[derive(Debug)]
pub struct SchedulerDaemon {
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerDaemon {
    pub fn start(runtime: &Handle, scheduler: Arc<BroadcastScheduler>, tick: Duration) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = runtime.spawn(run_daemon(scheduler, tick, stop_rx));

        tracing::info!(
            code = SCHEDULER_DAEMON_STARTED,
            tick_ms = tick.as_millis() as u64,
            "broadcast scheduler daemon started"
        );

        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Signals the daemon and waits for the current tick to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                tracing::warn!(error = %error, "broadcast scheduler daemon ended abnormally");
            }
        }
    }
}

impl Drop for SchedulerDaemon {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
    }
}

async fn run_daemon(
    scheduler: Arc<BroadcastScheduler>,
    tick: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    tracing::info!(
                        code = SCHEDULER_DAEMON_STOPPED,
                        "broadcast scheduler daemon stopped"
                    );
                    return;
                }
            }
            _ = interval.tick() => {
                let scheduler = Arc::clone(&scheduler);
                match tokio::task::spawn_blocking(move || scheduler.dispatch_due()).await {
                    Ok(Ok(finished)) if !finished.is_empty() => {
                        tracing::debug!(count = finished.len(), "due broadcasts dispatched");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(error)) => {
                        tracing::warn!(
                            code = SCHEDULER_DAEMON_TICK_FAILED,
                            error = %error,
                            "broadcast scheduler tick failed; keeping daemon alive"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(
                            code = SCHEDULER_DAEMON_TICK_FAILED,
                            error = %error,
                            "broadcast dispatch task panicked; keeping daemon alive"
                        );
                    }
                }
            }
        }
    }
}
