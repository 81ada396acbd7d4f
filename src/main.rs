//! feed-discovery binary: load config, open stores, run until signalled.
//!
//! Usage: `feed-discovery [CONFIG]` (default `feed-discovery.toml`).
//! SIGINT / SIGTERM stop gracefully; SIGHUP is accepted and ignored.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use feed_discovery::config::FileConfig;
use feed_discovery::feed_store::JsonLinesFeedStore;
use feed_discovery::registry::JsonFileMetadataStore;
use feed_discovery::source::RssFetcher;
use feed_discovery::{DiscoveryService, ShutdownTrigger};

const DEFAULT_CONFIG_PATH: &str = "feed-discovery.toml";
const DEFAULT_LOG_FILTER: &str = "feed_discovery=info";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    // -- configuration -------------------------------------------------------
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.into());
    let file = FileConfig::load(&config_path)
        .with_context(|| format!("loading config from {config_path}"))?;
    let config = file.discovery()?;

    // -- stores --------------------------------------------------------------
    let metadata = Arc::new(
        JsonFileMetadataStore::open(&file.state_path)
            .await
            .with_context(|| format!("opening metadata store {}", file.state_path.display()))?,
    );
    let feeds = Arc::new(
        JsonLinesFeedStore::open(&file.feed_path)
            .await
            .with_context(|| format!("opening feed log {}", file.feed_path.display()))?,
    );

    let service = Arc::new(DiscoveryService::new(
        metadata,
        feeds.clone(),
        Arc::new(RssFetcher::default()),
        config,
    )?);
    for source in file.sources() {
        service.registry().register(source).await?;
    }

    // -- signals -------------------------------------------------------------
    let cancel = CancellationToken::new();
    tokio::spawn(forward_signals(Arc::clone(&service), cancel.clone()));

    service.run(cancel).await?;
    info!(items = feeds.len().await, "exiting");
    Ok(())
}

/// Map OS signals onto the service's shutdown triggers.
#[cfg(unix)]
async fn forward_signals(service: Arc<DiscoveryService>, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut hup) = match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(term), Ok(hup)) => (term, hup),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "could not install signal handlers, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = term.recv() => break,
            _ = hup.recv() => service.handle(ShutdownTrigger::Reload),
        }
    }
    cancel.cancel();
}

#[cfg(not(unix))]
async fn forward_signals(_service: Arc<DiscoveryService>, cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    cancel.cancel();
}
