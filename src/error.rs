//! Error types for the discovery service.
//!
//! Per-source failures ([`FetchFailure`]) never leave the fetch executor:
//! they are folded into the source's health record.  Only
//! [`DiscoveryError`] is ever returned from the service lifecycle.

use std::time::Duration;

use thiserror::Error;

use crate::source::SourceId;

/// Why a single poll attempt of a source counted as a failure.
#[derive(Debug, Error)]
pub enum FetchFailure {
    /// The source was unreachable, returned garbage, or the fetcher panicked.
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Items were fetched but could not be durably recorded.
    #[error("feed store write failed: {0}")]
    StoreWrite(#[from] StoreError),
}

/// Errors raised by a [`FeedStore`](crate::feed_store::FeedStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("feed store unavailable: {0}")]
    Unavailable(String),

    #[error("item rejected: {0}")]
    Rejected(String),

    #[error("feed store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the metadata store behind the source registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("source not found: {0}")]
    NotFound(SourceId),

    #[error("metadata store unavailable: {0}")]
    Unavailable(String),

    #[error("metadata store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),

    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Fatal errors surfaced by [`DiscoveryService`](crate::service::DiscoveryService).
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A required store could not be opened before the scheduling loop started.
    #[error("startup failed: {0}")]
    Startup(#[source] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("discovery service has already been run")]
    AlreadyRunning,
}
