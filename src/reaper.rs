//! Background orphan recovery.
//!
//! The reaper calls [`FrontierQueue::reap`] on a fixed interval until told to
//! stop. Any number of reapers may run against one namespace; the backends
//! guarantee each expired claim is recovered exactly once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span};

use crate::error::{Error, Result};
use crate::model::ReapReport;
use crate::queue::FrontierQueue;

/// Periodic reaper for one queue.
pub struct Reaper {
    queue: Arc<dyn FrontierQueue>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl Clone for Reaper {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            interval: self.interval,
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Reaper {
    pub fn new(queue: Arc<dyn FrontierQueue>, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Config("reaper interval must be positive".to_string()));
        }
        Ok(Self {
            queue,
            interval,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Signal the loop to stop after the current pass.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// One pass, outside the loop.
    pub async fn run_once(&self) -> Result<ReapReport> {
        self.queue.reap().await
    }

    /// Run until [`Reaper::shutdown`] is called.
    ///
    /// A failed pass is logged and retried on the next tick; the store being
    /// unreachable never stops the loop.
    pub async fn run(&self) {
        let namespace = self.queue.namespace().to_string();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(%namespace, interval = ?self.interval, "reaper started");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(%namespace, "reaper shutting down");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let span = info_span!("frontierq.reap_pass", "queue.namespace" = %namespace);
            match self.queue.reap().instrument(span).await {
                Ok(report) if report.is_empty() => debug!(%namespace, "reap pass: nothing to do"),
                Ok(report) => info!(
                    %namespace,
                    reclaimed = report.reclaimed.len(),
                    dropped = report.dropped.len(),
                    expired = report.expired.len(),
                    dedup_purged = report.dedup_purged,
                    "reap pass complete"
                ),
                Err(e) => error!(%namespace, "reap pass failed: {e}"),
            }
        }
    }

    /// Run the loop on a background task.
    pub fn spawn(&self) -> ReaperHandle {
        let reaper = self.clone();
        let task = tokio::spawn(async move { reaper.run().await });
        ReaperHandle {
            shutdown: Arc::clone(&self.shutdown),
            task,
        }
    }
}

/// Handle to a spawned reaper task.
pub struct ReaperHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.notify_one();
        self.task
            .await
            .map_err(|e| Error::Other(format!("reaper task failed: {e}")))
    }
}
