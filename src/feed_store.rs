//! Feed store collaborators.
//!
//! The discovery service hands every fetched batch to a [`FeedStore`],
//! which owns de-duplication by item identity.  The core never filters or
//! retries writes on its own, so re-submitting an item is always safe.
//!
//! * [`JsonLinesFeedStore`] appends new items to a file and only keeps
//!   their ids in memory.  This is what the binary uses.
//! * [`MemoryFeedStore`] keeps every item in memory, newest first, for
//!   tests and embedding hosts that read items back in-process.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::source::DiscoveredItem;

#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Store `items`, skipping any whose id is already present.
    ///
    /// Returns how many items were new.  Must be safe to call from many
    /// fetch tasks concurrently.
    async fn insert(&self, items: Vec<DiscoveredItem>) -> Result<usize, StoreError>;
}

/// An item without an identity cannot be de-duplicated; refuse the batch.
fn reject_empty_ids(items: &[DiscoveredItem]) -> Result<(), StoreError> {
    match items.iter().find(|i| i.id.is_empty()) {
        Some(item) => Err(StoreError::Rejected(format!(
            "item {:?} from {} has an empty id",
            item.title, item.source_id
        ))),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Inner {
    /// De-duplicated, reverse-chronological items.
    items: Vec<DiscoveredItem>,
    /// Fast lookup to avoid inserting duplicates.
    seen: HashSet<String>,
}

/// An in-process feed store, newest items first.
#[derive(Debug, Default)]
pub struct MemoryFeedStore {
    inner: Mutex<Inner>,
}

impl MemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored item, newest first.
    pub fn items(&self) -> Vec<DiscoveredItem> {
        self.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn insert(&self, items: Vec<DiscoveredItem>) -> Result<usize, StoreError> {
        reject_empty_ids(&items)?;

        let mut inner = self.lock();
        let mut inserted = 0;
        for item in items {
            if inner.seen.insert(item.id.clone()) {
                // After any items that compare equal, so arrival order breaks ties.
                let pos = inner.items.partition_point(|existing| existing <= &item);
                inner.items.insert(pos, item);
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

// ---------------------------------------------------------------------------
// JSON-lines store
// ---------------------------------------------------------------------------

/// Only the identity is read back when reopening the log.
#[derive(Deserialize)]
struct StoredId {
    id: String,
}

#[derive(Debug)]
struct LogState {
    file: tokio::fs::File,
    seen: HashSet<String>,
}

/// Appends each new item as one JSON line.
///
/// Memory use is one id per stored item; the items themselves live only on
/// disk.  Every successful `insert` is flushed and synced before it returns.
#[derive(Debug)]
pub struct JsonLinesFeedStore {
    path: PathBuf,
    state: tokio::sync::Mutex<LogState>,
}

impl JsonLinesFeedStore {
    /// Open (or create) the log at `path`, loading the ids already in it.
    ///
    /// Unparseable lines, such as a line torn by a crash mid-write, are
    /// skipped with a warning.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut seen = HashSet::new();
        let mut torn_tail = false;

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                for (line_no, line) in text.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<StoredId>(line) {
                        Ok(stored) => {
                            seen.insert(stored.id);
                        }
                        Err(e) => warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "skipping unreadable feed log line"
                        ),
                    }
                }
                torn_tail = !text.is_empty() && !text.ends_with('\n');
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if torn_tail {
            file.write_all(b"\n").await?;
        }
        info!(path = %path.display(), items = seen.len(), "opened feed log");

        Ok(Self {
            path,
            state: tokio::sync::Mutex::new(LogState { file, seen }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct items in the log.
    pub async fn len(&self) -> usize {
        self.state.lock().await.seen.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl FeedStore for JsonLinesFeedStore {
    async fn insert(&self, items: Vec<DiscoveredItem>) -> Result<usize, StoreError> {
        reject_empty_ids(&items)?;

        let mut state = self.state.lock().await;
        let mut buf = Vec::new();
        let mut fresh = Vec::new();
        let mut batch = HashSet::new();
        for item in &items {
            if state.seen.contains(&item.id) || !batch.insert(item.id.as_str()) {
                continue;
            }
            serde_json::to_writer(&mut buf, item).map_err(|e| StoreError::Rejected(e.to_string()))?;
            buf.push(b'\n');
            fresh.push(item.id.clone());
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        state.file.write_all(&buf).await?;
        state.file.flush().await?;
        state.file.sync_data().await?;

        let inserted = fresh.len();
        state.seen.extend(fresh);
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceId;
    use chrono::{DateTime, TimeZone, Utc};

    fn make_item(id: &str, title: &str, published: Option<DateTime<Utc>>) -> DiscoveredItem {
        DiscoveredItem {
            published,
            ..DiscoveredItem::new(id, SourceId::from("test"), title, Utc::now())
        }
    }

    fn sample_items() -> Vec<DiscoveredItem> {
        vec![
            make_item("1", "Old", Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
            make_item("2", "Mid", Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap())),
            make_item("3", "New", Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())),
        ]
    }

    #[tokio::test]
    async fn insert_stores_and_sorts_reverse_chronological() {
        let store = MemoryFeedStore::new();
        assert_eq!(store.insert(sample_items()).await.unwrap(), 3);

        let items = store.items();
        assert_eq!(items[0].id, "3", "newest first");
        assert_eq!(items[1].id, "2");
        assert_eq!(items[2].id, "1", "oldest last");
    }

    #[tokio::test]
    async fn repeated_inserts_keep_reverse_chronological_order() {
        let store = MemoryFeedStore::new();
        let day = |d: u32| Some(Utc.with_ymd_and_hms(2025, 3, d, 0, 0, 0).unwrap());

        store.insert(vec![make_item("d10", "", day(10)), make_item("none-1", "", None)]).await.unwrap();
        store.insert(vec![make_item("d20", "", day(20)), make_item("d01", "", day(1))]).await.unwrap();
        store.insert(vec![make_item("none-2", "", None), make_item("d15", "", day(15))]).await.unwrap();
        store.insert(vec![make_item("d05", "", day(5)), make_item("d20", "dup", day(20))]).await.unwrap();

        let ids: Vec<String> = store.items().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["d20", "d15", "d10", "d05", "d01", "none-1", "none-2"]);
    }

    #[tokio::test]
    async fn insert_deduplicates_by_id() {
        let store = MemoryFeedStore::new();
        store.insert(vec![make_item("dup", "First", None)]).await.unwrap();
        let inserted = store
            .insert(vec![make_item("dup", "Second copy", None), make_item("new", "New item", None)])
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(store.len(), 2);
        // The original title is kept, not overwritten.
        assert!(store.items().iter().any(|i| i.id == "dup" && i.title == "First"));
    }

    #[tokio::test]
    async fn insert_handles_empty_input() {
        let store = MemoryFeedStore::new();
        assert_eq!(store.insert(vec![]).await.unwrap(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn empty_id_rejects_whole_batch() {
        let store = MemoryFeedStore::new();
        let err = store
            .insert(vec![make_item("ok", "Fine", None), make_item("", "Broken", None)])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn concurrent_duplicate_writes_store_one_copy() {
        let store = std::sync::Arc::new(MemoryFeedStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.insert(vec![make_item("same", "Same", None)]).await.unwrap()
            }));
        }
        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(total, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn json_lines_store_appends_only_new_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jsonl");
        let store = JsonLinesFeedStore::open(&path).await.unwrap();

        let first = store
            .insert(vec![make_item("a", "A", None), make_item("b", "B", None), make_item("a", "A again", None)])
            .await
            .unwrap();
        let second = store
            .insert(vec![make_item("b", "B", None), make_item("c", "C", None)])
            .await
            .unwrap();

        assert_eq!((first, second), (2, 1));
        assert_eq!(store.len().await, 3);

        let text = std::fs::read_to_string(&path).unwrap();
        let stored: Vec<DiscoveredItem> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        let ids: Vec<&str> = stored.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(stored[0].title, "A", "first copy wins");
    }

    #[tokio::test]
    async fn json_lines_store_remembers_ids_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jsonl");
        {
            let store = JsonLinesFeedStore::open(&path).await.unwrap();
            store.insert(vec![make_item("a", "A", None)]).await.unwrap();
        }

        let store = JsonLinesFeedStore::open(&path).await.unwrap();
        assert_eq!(store.insert(vec![make_item("a", "A", None)]).await.unwrap(), 0);
        assert_eq!(store.insert(vec![make_item("b", "B", None)]).await.unwrap(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn json_lines_store_skips_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.jsonl");
        {
            let store = JsonLinesFeedStore::open(&path).await.unwrap();
            store.insert(vec![make_item("a", "A", None)]).await.unwrap();
        }
        // A crash mid-append leaves half a record without a newline.
        let mut text = std::fs::read_to_string(&path).unwrap();
        text.push_str(r#"{"id":"half"#);
        std::fs::write(&path, text).unwrap();

        let store = JsonLinesFeedStore::open(&path).await.unwrap();
        assert_eq!(store.len().await, 1);
        store.insert(vec![make_item("b", "B", None)]).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let last = text.lines().last().unwrap();
        let item: DiscoveredItem = serde_json::from_str(last).unwrap();
        assert_eq!(item.id, "b", "new records start on their own line");
    }
}
