use async_trait::async_trait;
use mockall::automock;
use tap::TapFallible;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::atom::{self, Entry, Feed};

pub const TIMBER_FEED_URL: &str = "https://github.com/Shopify/Timber/releases.atom";
pub const TIMBER_ARCHIVE_ROOT: &str = "https://github.com/Shopify/Timber/archive/";

const MASTER: &str = "master";
const LATEST: &str = "latest";

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "Invalid Timber Version: {}\n  Available Versions Are:\n  - master\n  - latest{}",
        .requested,
        version_list(.available)
    )]
    VersionNotFound {
        requested: String,
        available: Vec<String>,
    },
    #[error(transparent)]
    Feed(#[from] atom::Error),
    #[error("fetch release feed failed: {0}")]
    Fetch(#[from] reqwest::Error),
}

fn version_list(versions: &[String]) -> String {
    versions
        .iter()
        .map(|version| format!("\n  - {version}"))
        .collect()
}

/// Where the release feed comes from.
#[automock]
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_feed(&self) -> Result<Feed, Error>;
}

#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
}

impl HttpFeedSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    #[instrument(err, skip(self), fields(url = %self.url))]
    async fn fetch_feed(&self) -> Result<Feed, Error> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .tap_err(|err| error!(%err, "request release feed failed"))?
            .bytes()
            .await?;

        info!(len = body.len(), "download release feed done");

        Ok(Feed::load(body.as_ref())?)
    }
}

/// Turns a version token into a theme archive url.
#[derive(Debug)]
pub struct Resolver<S> {
    source: S,
    archive_root: String,
}

impl<S: FeedSource> Resolver<S> {
    pub fn new(source: S, archive_root: impl Into<String>) -> Self {
        Self {
            source,
            archive_root: archive_root.into(),
        }
    }

    /// `master` resolves without fetching the feed, `latest` picks the
    /// first entry, any other token must equal an entry title.
    pub async fn resolve(&self, version: &str) -> Result<String, Error> {
        if version == MASTER {
            return Ok(self.archive_url(MASTER));
        }

        let feed = self.source.fetch_feed().await?;
        let entry = find_release(&feed, version)?;

        Ok(self.archive_url(&entry.title))
    }

    fn archive_url(&self, name: &str) -> String {
        format!("{}{}.zip", self.archive_root, name)
    }
}

fn find_release<'a>(feed: &'a Feed, version: &str) -> Result<&'a Entry, Error> {
    let entry = if version == LATEST {
        feed.latest_entry()
    } else {
        feed.entries.iter().find(|entry| entry.title == version)
    };

    entry.ok_or_else(|| Error::VersionNotFound {
        requested: version.to_string(),
        available: feed
            .entries
            .iter()
            .map(|entry| entry.title.clone())
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    const RELEASES: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/fixtures/releases.atom"
    ));

    fn resolver() -> Resolver<MockFeedSource> {
        let mut source = MockFeedSource::new();
        source
            .expect_fetch_feed()
            .returning(|| Ok(RELEASES.parse().unwrap()));

        Resolver::new(source, TIMBER_ARCHIVE_ROOT)
    }

    #[tokio::test]
    async fn test_resolve_versions() {
        let resolver = resolver();

        assert_eq!(
            resolver.resolve("latest").await.unwrap(),
            "https://github.com/Shopify/Timber/archive/v2.0.2.zip"
        );
        assert_eq!(
            resolver.resolve("v1.3.1").await.unwrap(),
            "https://github.com/Shopify/Timber/archive/v1.3.1.zip"
        );
        assert_eq!(
            resolver.resolve("master").await.unwrap(),
            "https://github.com/Shopify/Timber/archive/master.zip"
        );
    }

    #[tokio::test]
    async fn test_master_does_not_fetch() {
        let mut source = MockFeedSource::new();
        source.expect_fetch_feed().never();

        let url = Resolver::new(source, "https://example.com/")
            .resolve("master")
            .await
            .unwrap();

        assert_eq!(url, "https://example.com/master.zip");
    }

    #[tokio::test]
    async fn test_unknown_version() {
        let err = resolver().resolve("v1.3.0").await.unwrap_err();

        assert!(matches!(err, Error::VersionNotFound { .. }));

        let message = err.to_string();
        assert!(message.contains("Available Versions Are"));
        assert_eq!(
            message,
            "Invalid Timber Version: v1.3.0\n  Available Versions Are:\n  - master\n  - latest\n  - v2.0.2\n  - v2.0.1\n  - v2.0.0\n  - v1.3.1\n  - v1.0.0"
        );
    }

    #[tokio::test]
    async fn test_version_is_case_sensitive() {
        let err = resolver().resolve("V2.0.2").await.unwrap_err();

        assert!(matches!(err, Error::VersionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_latest_on_empty_feed() {
        let mut source = MockFeedSource::new();
        source
            .expect_fetch_feed()
            .returning(|| Ok(Feed::default()));

        let err = Resolver::new(source, TIMBER_ARCHIVE_ROOT)
            .resolve("latest")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::VersionNotFound { ref available, .. } if available.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_feed_error_is_surfaced() {
        let mut source = MockFeedSource::new();
        source
            .expect_fetch_feed()
            .returning(|| Err(atom::Error::Read(io::Error::from(io::ErrorKind::UnexpectedEof)).into()));

        let err = Resolver::new(source, TIMBER_ARCHIVE_ROOT)
            .resolve("latest")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Feed(_)));
    }
}
