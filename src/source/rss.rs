//! RSS fetcher implementation.
//!
//! Fetches an RSS 2.0 document from [`Source::endpoint`] over HTTP and
//! converts each `<item>` into a [`DiscoveredItem`].  Use it as a template
//! when adding support for Atom, JSON Feed, or any other format.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::{content_hash, DiscoveredItem, Source, SourceFetcher};

/// Fetches and parses RSS feeds using [`reqwest`] and the [`rss`] crate.
#[derive(Debug, Clone, Default)]
pub struct RssFetcher {
    client: reqwest::Client,
}

impl RssFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Parse an already-fetched [`rss::Channel`] into [`DiscoveredItem`]s.
    ///
    /// This is a pure function (no I/O) so that tests can exercise the
    /// parsing logic without hitting the network.
    pub fn parse_channel(
        channel: &rss::Channel,
        source: &Source,
        discovered_at: DateTime<Utc>,
    ) -> Vec<DiscoveredItem> {
        channel
            .items()
            .iter()
            .map(|item| {
                let title = item.title().unwrap_or("(untitled)").to_string();

                // Prefer <guid>, fall back to <link>, then a content digest.
                let id = item
                    .guid()
                    .map(|g| g.value().to_string())
                    .or_else(|| item.link().map(String::from))
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| content_hash(&title, item.description()));

                // Parse RFC-2822 date; gracefully degrade to None on failure.
                let published = item
                    .pub_date()
                    .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                    .map(|dt| dt.with_timezone(&Utc));

                DiscoveredItem {
                    id,
                    source_id: source.id.clone(),
                    title,
                    description: item.description().map(String::from),
                    link: item.link().map(String::from),
                    published,
                    discovered_at,
                }
            })
            .collect()
    }
}

#[async_trait]
impl SourceFetcher for RssFetcher {
    async fn fetch(&self, source: &Source, deadline: Instant) -> Result<Vec<DiscoveredItem>> {
        let discovered_at = Utc::now();
        let timeout = deadline.saturating_duration_since(Instant::now());

        let body = self
            .client
            .get(&source.endpoint)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("requesting {}", source.endpoint))?
            .error_for_status()?
            .bytes()
            .await?;
        let channel = rss::Channel::read_from(body.as_ref())
            .with_context(|| format!("parsing RSS from {}", source.endpoint))?;

        Ok(Self::parse_channel(&channel, source, discovered_at))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> Vec<DiscoveredItem> {
        let channel = rss::Channel::read_from(xml.as_bytes()).unwrap();
        let source = Source::new("test-feed", "http://example.com/feed");
        RssFetcher::parse_channel(&channel, &source, Utc::now())
    }

    #[test]
    fn parse_channel_extracts_items() {
        let items = parse(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <item>
      <title>First Post</title>
      <link>https://example.com/1</link>
      <guid>guid-1</guid>
      <pubDate>Mon, 01 Jan 2024 00:00:00 +0000</pubDate>
      <description>First description</description>
    </item>
    <item>
      <title>Second Post</title>
      <link>https://example.com/2</link>
      <guid>guid-2</guid>
      <pubDate>Tue, 02 Jan 2024 12:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>"#,
        );

        assert_eq!(items.len(), 2);

        assert_eq!(items[0].id, "guid-1");
        assert_eq!(items[0].title, "First Post");
        assert_eq!(items[0].link.as_deref(), Some("https://example.com/1"));
        assert_eq!(items[0].description.as_deref(), Some("First description"));
        assert_eq!(items[0].source_id.as_str(), "test-feed");
        assert!(items[0].published.is_some());

        assert_eq!(items[1].id, "guid-2");
        assert!(items[1].description.is_none());
    }

    #[test]
    fn falls_back_to_link_when_no_guid() {
        let items = parse(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <item>
      <title>No GUID</title>
      <link>https://example.com/no-guid</link>
    </item>
  </channel>
</rss>"#,
        );

        assert_eq!(items[0].id, "https://example.com/no-guid");
    }

    #[test]
    fn falls_back_to_content_hash_without_guid_or_link() {
        let items = parse(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <item>
      <title>Bare</title>
      <description>Only text</description>
    </item>
  </channel>
</rss>"#,
        );

        assert_eq!(items[0].id, content_hash("Bare", Some("Only text")));
    }

    #[test]
    fn handles_missing_title_and_invalid_date() {
        let items = parse(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <item>
      <guid>g1</guid>
      <pubDate>not-a-real-date</pubDate>
    </item>
  </channel>
</rss>"#,
        );

        assert_eq!(items[0].title, "(untitled)");
        assert!(items[0].published.is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let fetcher = RssFetcher::default();
        let source = Source::new("dead", "http://127.0.0.1:9/feed.xml");
        let deadline = Instant::now() + std::time::Duration::from_secs(2);

        assert!(fetcher.fetch(&source, deadline).await.is_err());
    }
}
