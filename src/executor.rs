//! One bounded fetch-and-store cycle for a single source.
//!
//! The external fetch and the feed-store write each run on their own task,
//! so a panic inside either surfaces as a [`JoinError`](tokio::task::JoinError)
//! instead of unwinding through the pool, and a call that overruns the
//! deadline can be abandoned while it keeps running in the background.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{FetchFailure, StoreError};
use crate::feed_store::FeedStore;
use crate::registry::SourceRegistry;
use crate::source::{DiscoveredItem, Source, SourceFetcher};
use crate::tracker::{FailureTracker, FetchOutcome};

/// Runs one poll of one source and records the result.
pub struct FetchExecutor {
    registry: Arc<SourceRegistry>,
    feeds: Arc<dyn FeedStore>,
    fetcher: Arc<dyn SourceFetcher>,
    tracker: FailureTracker,
    fetch_timeout: Duration,
}

impl FetchExecutor {
    pub fn new(
        registry: Arc<SourceRegistry>,
        feeds: Arc<dyn FeedStore>,
        fetcher: Arc<dyn SourceFetcher>,
        tracker: FailureTracker,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            feeds,
            fetcher,
            tracker,
            fetch_timeout,
        }
    }

    /// Poll `source` once.
    ///
    /// Always records the poll time and reports the outcome to the failure
    /// tracker.  Registry errors are logged, not returned; the source will
    /// simply be looked at again on a later tick.
    pub async fn execute(&self, source: Source, now: DateTime<Utc>) -> FetchOutcome {
        let deadline = Instant::now() + self.fetch_timeout;
        let outcome = match self.fetch_and_store(&source, deadline).await {
            Ok((fetched, stored)) => {
                debug!(source = %source.id, fetched, stored, "poll succeeded");
                FetchOutcome::Success { fetched, stored }
            }
            Err(failure) => {
                warn!(source = %source.id, error = %failure, "poll failed");
                FetchOutcome::Failure(failure)
            }
        };

        if let Err(e) = self.registry.mark_polled(&source.id, now).await {
            warn!(source = %source.id, error = %e, "failed to record poll time");
        }
        if let Err(e) = self.tracker.report(&self.registry, &source.id, &outcome, now).await {
            warn!(source = %source.id, error = %e, "failed to record poll outcome");
        }
        outcome
    }

    async fn fetch_and_store(
        &self,
        source: &Source,
        deadline: Instant,
    ) -> Result<(usize, usize), FetchFailure> {
        let items = self.fetch(source, deadline).await?;
        let fetched = items.len();

        let stored = self.store(items, deadline).await?;
        Ok((fetched, stored))
    }

    async fn store(&self, items: Vec<DiscoveredItem>, deadline: Instant) -> Result<usize, FetchFailure> {
        let feeds = Arc::clone(&self.feeds);
        let handle = tokio::spawn(async move { feeds.insert(items).await });

        match tokio::time::timeout_at(deadline, handle).await {
            Err(_) => Err(FetchFailure::Timeout(self.fetch_timeout)),
            Ok(Err(join_err)) => Err(StoreError::Unavailable(format!("feed store task failed: {join_err}")).into()),
            Ok(Ok(result)) => Ok(result?),
        }
    }

    async fn fetch(&self, source: &Source, deadline: Instant) -> Result<Vec<DiscoveredItem>, FetchFailure> {
        let fetcher = Arc::clone(&self.fetcher);
        let task_source = source.clone();
        let handle = tokio::spawn(async move { fetcher.fetch(&task_source, deadline).await });

        // Dropping the handle on timeout detaches the task rather than killing it.
        match tokio::time::timeout_at(deadline, handle).await {
            Err(_) => Err(FetchFailure::Timeout(self.fetch_timeout)),
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(FetchFailure::Fetch(format!("fetcher panicked: {join_err}")))
            }
            Ok(Err(join_err)) => Err(FetchFailure::Fetch(join_err.to_string())),
            Ok(Ok(Err(e))) => Err(FetchFailure::Fetch(format!("{e:#}"))),
            Ok(Ok(Ok(items))) => Ok(items),
        }
    }
}
