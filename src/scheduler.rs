//! The scheduling loop.
//!
//! Every tick the scheduler asks the registry for due sources and offers
//! each one to the worker pool.  Sources the pool turns down stay due and
//! are offered again on the next tick; nothing is queued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::FetchExecutor;
use crate::pool::{Admission, WorkerPool};
use crate::registry::SourceRegistry;

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub dispatched: usize,
    /// Left for a later tick because the pool was full.
    pub saturated: usize,
    /// Skipped because a previous fetch for the source is still running.
    pub busy: usize,
}

/// Periodically hands due sources to the worker pool.
pub struct Scheduler {
    registry: Arc<SourceRegistry>,
    pool: Arc<WorkerPool>,
    executor: Arc<FetchExecutor>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        registry: Arc<SourceRegistry>,
        pool: Arc<WorkerPool>,
        executor: Arc<FetchExecutor>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            registry,
            pool,
            executor,
            tick_interval,
        }
    }

    /// Tick until `cancel` fires.  Does not wait for dispatched fetches.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick = ?self.tick_interval, "scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(Utc::now(), &cancel).await;
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Dispatch every source due at `now` that the pool will take.
    pub async fn tick(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> TickReport {
        let due = match self.registry.list_due(now).await {
            Ok(due) => due,
            Err(e) => {
                warn!(error = %e, "could not list due sources, retrying next tick");
                return TickReport::default();
            }
        };

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };
        for source in due {
            if cancel.is_cancelled() {
                break;
            }
            let id = source.id.clone();
            let executor = Arc::clone(&self.executor);
            let admission = self.pool.try_spawn(id.clone(), async move {
                executor.execute(source, now).await;
            });

            match admission {
                Admission::Started => {
                    debug!(source = %id, "dispatched fetch");
                    report.dispatched += 1;
                }
                Admission::Saturated => report.saturated += 1,
                Admission::Busy => report.busy += 1,
                Admission::Closed => break,
            }
        }

        if report.due > 0 {
            debug!(
                due = report.due,
                dispatched = report.dispatched,
                saturated = report.saturated,
                busy = report.busy,
                "tick complete"
            );
        }
        report
    }
}
