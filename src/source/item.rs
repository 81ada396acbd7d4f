//! The unit of content produced by a fetch.
//!
//! `DiscoveredItem` represents a single entry from any source (RSS, Atom,
//! API, etc.).  Every fetcher converts its native format into
//! `DiscoveredItem`s so the scheduler and the feed store can stay
//! protocol-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

use super::SourceId;

/// A single discovered entry, normalised from any source.
///
/// ## Sorting
///
/// `DiscoveredItem` implements [`Ord`] for **reverse-chronological**
/// ordering: newer items sort before older ones, and items without a date
/// sort last.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredItem {
    /// Identity used by the feed store for de-duplication.
    ///
    /// For RSS this is the `<guid>` element, falling back to `<link>` and
    /// then to [`content_hash`].
    pub id: String,

    /// The source this item was discovered on.
    pub source_id: SourceId,

    /// Human-readable headline.
    pub title: String,

    /// Optional longer description or summary text.
    pub description: Option<String>,

    /// URL to the full content.
    pub link: Option<String>,

    /// Publication timestamp as reported by the source.
    pub published: Option<DateTime<Utc>>,

    /// When the fetch that produced this item started.
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveredItem {
    /// Shorthand for an item with only the required fields set.
    pub fn new(
        id: impl Into<String>,
        source_id: SourceId,
        title: impl Into<String>,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            source_id,
            title: title.into(),
            description: None,
            link: None,
            published: None,
            discovered_at,
        }
    }
}

/// Stable identity for items whose source provides neither a guid nor a link.
pub fn content_hash(title: &str, description: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(description.unwrap_or_default().as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Ordering — reverse chronological (newest first)
// ---------------------------------------------------------------------------

impl Ord for DiscoveredItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // `None` is less than `Some(_)`, so undated items sink to the bottom.
        other.published.cmp(&self.published)
    }
}

impl PartialOrd for DiscoveredItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
