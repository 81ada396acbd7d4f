//! Service configuration.
//!
//! [`DiscoveryConfig`] is the immutable, process-lifetime configuration the
//! service is constructed with.  [`FileConfig`] is the TOML shape the
//! binary reads it (and the initial source list) from.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::source::Source;

/// How long shutdown waits for in-flight fetches before giving up on them.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(60);

/// How often the scheduler wakes up to look for due sources.
pub const TICK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Poll interval for sources without their own override.
    pub poll_interval: Duration,
    /// Maximum number of fetches in flight at once, system-wide.
    pub concurrency: usize,
    /// Deadline for one fetch-and-store cycle.
    pub fetch_timeout: Duration,
    /// Consecutive failures tolerated before a source is disabled.
    pub disable_threshold: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15 * 60),
            concurrency: 4,
            fetch_timeout: Duration::from_secs(30),
            disable_threshold: 5,
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll interval must be positive"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be positive"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::Invalid("fetch timeout must be positive"));
        }
        if self.disable_threshold == 0 {
            return Err(ConfigError::Invalid("disable threshold must be positive"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// On-disk configuration
// ---------------------------------------------------------------------------

/// Top-level layout of `feed-discovery.toml`.
///
/// ```toml
/// state_path = "sources.json"
/// feed_path = "items.jsonl"
///
/// [discovery]
/// poll_interval_secs = 900
/// concurrency = 4
///
/// [[sources]]
/// id = "bbc"
/// url = "https://feeds.bbci.co.uk/news/rss.xml"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_feed_path")]
    pub feed_path: PathBuf,
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoverySection {
    pub poll_interval_secs: u64,
    pub concurrency: usize,
    pub fetch_timeout_secs: u64,
    pub disable_threshold: u32,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        let defaults = DiscoveryConfig::default();
        Self {
            poll_interval_secs: defaults.poll_interval.as_secs(),
            concurrency: defaults.concurrency,
            fetch_timeout_secs: defaults.fetch_timeout.as_secs(),
            disable_threshold: defaults.disable_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceEntry {
    pub id: String,
    pub url: String,
    pub name: Option<String>,
    pub poll_interval_secs: Option<u64>,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("sources.json")
}

fn default_feed_path() -> PathBuf {
    PathBuf::from("items.jsonl")
}

impl FileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.discovery()?;
        if config.sources.iter().any(|s| s.poll_interval_secs == Some(0)) {
            return Err(ConfigError::Invalid("source poll interval must be positive"));
        }
        Ok(config)
    }

    /// The validated service configuration.
    pub fn discovery(&self) -> Result<DiscoveryConfig, ConfigError> {
        let config = DiscoveryConfig {
            poll_interval: Duration::from_secs(self.discovery.poll_interval_secs),
            concurrency: self.discovery.concurrency,
            fetch_timeout: Duration::from_secs(self.discovery.fetch_timeout_secs),
            disable_threshold: self.discovery.disable_threshold,
        };
        config.validate()?;
        Ok(config)
    }

    /// Fresh source records for every `[[sources]]` entry.
    pub fn sources(&self) -> Vec<Source> {
        self.sources
            .iter()
            .map(|entry| {
                let mut source = Source::new(entry.id.as_str(), entry.url.as_str());
                if let Some(name) = &entry.name {
                    source = source.with_name(name.as_str());
                }
                if let Some(secs) = entry.poll_interval_secs {
                    source = source.with_poll_interval(Duration::from_secs(secs));
                }
                source
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(DiscoveryConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_values_are_rejected() {
        let cases = [
            DiscoveryConfig { poll_interval: Duration::ZERO, ..Default::default() },
            DiscoveryConfig { concurrency: 0, ..Default::default() },
            DiscoveryConfig { fetch_timeout: Duration::ZERO, ..Default::default() },
            DiscoveryConfig { disable_threshold: 0, ..Default::default() },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigError::Invalid(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn parses_full_file() {
        let config = FileConfig::parse(
            r#"
state_path = "/var/lib/discovery/sources.json"

[discovery]
poll_interval_secs = 120
concurrency = 2
fetch_timeout_secs = 10
disable_threshold = 3

[[sources]]
id = "bbc"
url = "https://feeds.bbci.co.uk/news/rss.xml"
name = "BBC News"

[[sources]]
id = "hn"
url = "https://news.ycombinator.com/rss"
poll_interval_secs = 30
"#,
        )
        .unwrap();

        let discovery = config.discovery().unwrap();
        assert_eq!(discovery.poll_interval, Duration::from_secs(120));
        assert_eq!(discovery.concurrency, 2);
        assert_eq!(discovery.disable_threshold, 3);
        assert_eq!(config.state_path, PathBuf::from("/var/lib/discovery/sources.json"));
        assert_eq!(config.feed_path, PathBuf::from("items.jsonl"));

        let sources = config.sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "BBC News");
        assert_eq!(sources[1].name, "hn", "name defaults to the id");
        assert_eq!(sources[1].poll_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = FileConfig::parse("").unwrap();
        assert_eq!(config.discovery().unwrap(), DiscoveryConfig::default());
        assert!(config.sources.is_empty());
    }

    #[test]
    fn invalid_values_fail_parse() {
        let err = FileConfig::parse("[discovery]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = FileConfig::parse("[discovery]\nbogus = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_source_interval_fails_parse() {
        let err = FileConfig::parse(
            r#"
[[sources]]
id = "hn"
url = "https://news.ycombinator.com/rss"
poll_interval_secs = 0
"#,
        )
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid("source poll interval must be positive")),
            "got {err:?}"
        );
    }
}
