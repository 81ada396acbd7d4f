//! Source abstraction layer.
//!
//! This module defines the [`Source`] record the registry persists, the
//! [`SourceFetcher`] trait that performs protocol-specific retrieval, and
//! the common [`DiscoveredItem`] type.  Concrete fetchers live in
//! sub-modules (currently only [`rss`]).
//!
//! ## Adding a new source protocol
//!
//! 1. Create a new file in this directory (e.g. `atom.rs`).
//! 2. Define a struct and implement [`SourceFetcher`] for it, interpreting
//!    [`Source::endpoint`] however the protocol needs.
//! 3. Re-export it below and hand it to
//!    [`DiscoveryService::new`](crate::service::DiscoveryService::new).

mod item;
mod rss;

pub use item::{content_hash, DiscoveredItem};
pub use rss::RssFetcher;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Stable unique key of a source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A polled source together with its scheduling and health state.
///
/// Records are created and removed by whoever manages the registry; the
/// discovery service only ever updates the health and timestamp fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,

    /// Human-readable label used in logs.
    #[serde(default)]
    pub name: String,

    /// Fetch descriptor, opaque to the scheduler (for RSS, the feed URL).
    pub endpoint: String,

    /// Overrides the service-wide poll interval when set.
    #[serde(default)]
    pub poll_interval: Option<Duration>,

    #[serde(default)]
    pub consecutive_failures: u32,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub last_polled_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
}

impl Source {
    /// A fresh, never-polled, healthy source.
    pub fn new(id: impl Into<SourceId>, endpoint: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            endpoint: endpoint.into(),
            poll_interval: None,
            consecutive_failures: 0,
            disabled: false,
            last_polled_at: None,
            last_success_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// The per-source override if present, else `default`.
    pub fn effective_interval(&self, default: Duration) -> Duration {
        self.poll_interval.unwrap_or(default)
    }

    /// Whether the source should be polled at `now`.
    ///
    /// Disabled sources are never due.  A source that has never been polled
    /// is due immediately.
    pub fn is_due(&self, now: DateTime<Utc>, default_interval: Duration) -> bool {
        if self.disabled {
            return false;
        }
        let Some(last) = self.last_polled_at else {
            return true;
        };
        match chrono::Duration::from_std(self.effective_interval(default_interval)) {
            Ok(interval) => last + interval <= now,
            // An interval too large to represent never elapses.
            Err(_) => false,
        }
    }
}

/// Protocol-specific retrieval of items from a source.
///
/// The fetch executor calls [`fetch()`](SourceFetcher::fetch) on its own
/// task, so implementations must be `Send + Sync`.  They should finish by
/// `deadline`; the executor stops waiting at the deadline either way.
///
/// ## Implementing a new fetcher
///
/// ```ignore
/// struct MyFetcher;
///
/// #[async_trait]
/// impl SourceFetcher for MyFetcher {
///     async fn fetch(&self, source: &Source, deadline: Instant) -> Result<Vec<DiscoveredItem>> {
///         // Perform HTTP / IO against `source.endpoint`, then convert.
///         todo!()
///     }
/// }
/// ```
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &Source,
        deadline: Instant,
    ) -> anyhow::Result<Vec<DiscoveredItem>>;
}
