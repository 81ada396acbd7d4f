//! The discovery service: construction and lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{DiscoveryConfig, SHUTDOWN_DEADLINE, TICK_INTERVAL};
use crate::error::DiscoveryError;
use crate::executor::FetchExecutor;
use crate::feed_store::FeedStore;
use crate::pool::WorkerPool;
use crate::registry::{MetadataStore, SourceRegistry};
use crate::scheduler::Scheduler;
use crate::shutdown::{DrainOutcome, ShutdownCoordinator, ShutdownTrigger};
use crate::source::SourceFetcher;
use crate::tracker::FailureTracker;

/// Polls due sources on a schedule until asked to stop.
///
/// ```ignore
/// let service = DiscoveryService::new(metadata, feeds, Arc::new(RssFetcher::default()), config)?;
/// service.run(cancel).await?;
/// ```
pub struct DiscoveryService {
    config: DiscoveryConfig,
    registry: Arc<SourceRegistry>,
    pool: Arc<WorkerPool>,
    executor: Arc<FetchExecutor>,
    shutdown: ShutdownCoordinator,
    tick_interval: Duration,
    started: AtomicBool,
}

impl DiscoveryService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        feeds: Arc<dyn FeedStore>,
        fetcher: Arc<dyn SourceFetcher>,
        config: DiscoveryConfig,
    ) -> Result<Self, DiscoveryError> {
        config.validate()?;

        let registry = Arc::new(SourceRegistry::new(metadata, config.poll_interval));
        let executor = Arc::new(FetchExecutor::new(
            Arc::clone(&registry),
            feeds,
            fetcher,
            FailureTracker::new(config.disable_threshold),
            config.fetch_timeout,
        ));

        Ok(Self {
            tick_interval: TICK_INTERVAL.min(config.poll_interval),
            pool: Arc::new(WorkerPool::new(config.concurrency)),
            shutdown: ShutdownCoordinator::new(SHUTDOWN_DEADLINE),
            started: AtomicBool::new(false),
            config,
            registry,
            executor,
        })
    }

    /// Override how often the scheduler looks for due sources.
    ///
    /// Clamped so it is never coarser than the default poll interval.
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick.min(self.config.poll_interval).max(Duration::from_millis(1));
        self
    }

    /// Override [`SHUTDOWN_DEADLINE`].
    pub fn with_shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown = ShutdownCoordinator::new(deadline);
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Number of fetches in flight right now.
    pub fn active_fetches(&self) -> usize {
        self.pool.active()
    }

    /// Run until `cancel` fires or [`stop`](Self::stop) is called, then
    /// wait (up to the shutdown deadline) for in-flight fetches.
    ///
    /// Per-source failures never end the run.  Only a metadata store that
    /// cannot be read at startup is returned as an error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), DiscoveryError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(DiscoveryError::AlreadyRunning);
        }

        let sources = self.registry.verify().await.map_err(|e| {
            error!(error = %e, "metadata store unavailable at startup");
            DiscoveryError::Startup(e)
        })?;
        info!(
            sources,
            concurrency = self.pool.capacity(),
            poll_interval = ?self.config.poll_interval,
            fetch_timeout = ?self.config.fetch_timeout,
            disable_threshold = self.config.disable_threshold,
            "discovery service started"
        );

        let scheduler = Scheduler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            Arc::clone(&self.executor),
            self.tick_interval,
        );
        tokio::select! {
            _ = scheduler.run(self.shutdown.token()) => {}
            _ = cancel.cancelled() => {
                self.shutdown.trigger(ShutdownTrigger::Terminate);
            }
        }

        match self.shutdown.drain(&self.pool).await {
            DrainOutcome::Drained => info!("discovery service stopped"),
            DrainOutcome::DeadlineElapsed => warn!(
                deadline = ?self.shutdown.deadline(),
                "discovery service stopped with fetches still in flight"
            ),
        }
        Ok(())
    }

    /// Request a graceful shutdown.  Safe to call more than once, and from
    /// any task while [`run`](Self::run) is in progress.
    pub fn stop(&self) {
        self.shutdown.trigger(ShutdownTrigger::Stop);
    }

    /// Route an operational trigger (e.g. from a process signal).
    pub fn handle(&self, trigger: ShutdownTrigger) {
        self.shutdown.trigger(trigger);
    }
}
