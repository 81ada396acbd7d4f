//! Source registry.
//!
//! [`SourceRegistry`] is the scheduler's view of the metadata store: it
//! answers "which sources are due" and applies per-source updates with
//! per-entry locking so two updates to the same record never interleave.
//! The durable storage itself sits behind the [`MetadataStore`] trait.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::RegistryError;
use crate::source::{Source, SourceId};

/// Durable storage for [`Source`] records.
///
/// Implementations must survive process restarts with state intact and be
/// safe to call from many fetch tasks at once.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Source>, RegistryError>;

    async fn get(&self, id: &SourceId) -> Result<Option<Source>, RegistryError>;

    /// Insert or replace the record with `source.id`.
    async fn put(&self, source: Source) -> Result<(), RegistryError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Non-durable store for tests and embedding hosts that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    sources: RwLock<BTreeMap<SourceId, Source>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(sources: impl IntoIterator<Item = Source>) -> Self {
        Self {
            sources: RwLock::new(sources.into_iter().map(|s| (s.id.clone(), s)).collect()),
        }
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn list(&self) -> Result<Vec<Source>, RegistryError> {
        Ok(self.sources.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &SourceId) -> Result<Option<Source>, RegistryError> {
        Ok(self.sources.read().await.get(id).cloned())
    }

    async fn put(&self, source: Source) -> Result<(), RegistryError> {
        self.sources.write().await.insert(source.id.clone(), source);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// Keeps every source record in a single JSON file.
///
/// Each `put` rewrites the file through a temp file and a rename, so a
/// crash leaves either the old or the new contents on disk.
#[derive(Debug)]
pub struct JsonFileMetadataStore {
    path: PathBuf,
    sources: tokio::sync::Mutex<BTreeMap<SourceId, Source>>,
}

impl JsonFileMetadataStore {
    /// Load the store from `path`.  A missing file is an empty registry.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let sources: Vec<Source> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        info!(path = %path.display(), sources = sources.len(), "opened metadata store");

        Ok(Self {
            path,
            sources: tokio::sync::Mutex::new(
                sources.into_iter().map(|s| (s.id.clone(), s)).collect(),
            ),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, sources: &BTreeMap<SourceId, Source>) -> Result<(), RegistryError> {
        let records: Vec<&Source> = sources.values().collect();
        let json = serde_json::to_vec_pretty(&records)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for JsonFileMetadataStore {
    async fn list(&self) -> Result<Vec<Source>, RegistryError> {
        Ok(self.sources.lock().await.values().cloned().collect())
    }

    async fn get(&self, id: &SourceId) -> Result<Option<Source>, RegistryError> {
        Ok(self.sources.lock().await.get(id).cloned())
    }

    async fn put(&self, source: Source) -> Result<(), RegistryError> {
        let mut sources = self.sources.lock().await;
        let id = source.id.clone();
        let previous = sources.insert(id.clone(), source);

        if let Err(e) = self.persist(&sources).await {
            // Keep memory in line with what is on disk.
            match previous {
                Some(prev) => sources.insert(id, prev),
                None => sources.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Source records plus due-ness, with per-source serialised updates.
pub struct SourceRegistry {
    store: Arc<dyn MetadataStore>,
    default_interval: Duration,
    locks: Mutex<HashMap<SourceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SourceRegistry {
    pub fn new(store: Arc<dyn MetadataStore>, default_interval: Duration) -> Self {
        Self {
            store,
            default_interval,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Check that the metadata store is reachable; returns the source count.
    pub async fn verify(&self) -> Result<usize, RegistryError> {
        Ok(self.store.list().await?.len())
    }

    pub async fn get(&self, id: &SourceId) -> Result<Source, RegistryError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Every enabled source whose effective interval has elapsed at `now`.
    pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Source>, RegistryError> {
        let due: Vec<Source> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|s| s.is_due(now, self.default_interval))
            .collect();
        debug!(due = due.len(), "listed due sources");
        Ok(due)
    }

    pub async fn mark_polled(&self, id: &SourceId, now: DateTime<Utc>) -> Result<(), RegistryError> {
        self.update(id, |source| source.last_polled_at = Some(now)).await
    }

    /// Read-modify-write one record while holding that record's lock.
    ///
    /// The change is persisted before this returns.
    pub async fn update<R>(
        &self,
        id: &SourceId,
        apply: impl FnOnce(&mut Source) -> R,
    ) -> Result<R, RegistryError> {
        let lock = self.entry_lock(id);
        let _guard = lock.lock().await;

        let mut source = self.get(id).await?;
        let result = apply(&mut source);
        self.store.put(source).await?;
        Ok(result)
    }

    /// Bring a disabled source back into rotation with a clean failure count.
    ///
    /// This is the management-side action; the scheduler never calls it.
    pub async fn reenable(&self, id: &SourceId) -> Result<(), RegistryError> {
        self.update(id, |source| {
            source.disabled = false;
            source.consecutive_failures = 0;
        })
        .await?;
        info!(source = %id, "source re-enabled");
        Ok(())
    }

    /// Add `source` unless a record with its id already exists.
    ///
    /// Returns whether it was inserted.  Existing health state is kept.
    pub async fn register(&self, source: Source) -> Result<bool, RegistryError> {
        let lock = self.entry_lock(&source.id);
        let _guard = lock.lock().await;

        if self.store.get(&source.id).await?.is_some() {
            return Ok(false);
        }
        info!(source = %source.id, endpoint = %source.endpoint, "registered source");
        self.store.put(source).await?;
        Ok(true)
    }

    fn entry_lock(&self, id: &SourceId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.clone()).or_default())
    }
}
