use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, instrument};

pub const RELEASES_URL: &str = "https://api.github.com/repos/Shopify/themekit/releases";

const HEADER: &str =
    "# Change Log\nAll released changes to this project will be documented in this file.\n\n";

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct Release {
    #[serde(rename = "html_url")]
    pub url: String,
    #[serde(rename = "tag_name")]
    pub tag: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(rename = "published_at")]
    pub date: Option<DateTime<Utc>>,
    pub author: Author,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct Author {
    #[serde(rename = "login")]
    pub name: String,
    pub url: String,
}

pub fn parse_releases(json: &[u8]) -> serde_json::Result<Vec<Release>> {
    serde_json::from_slice(json)
}

#[instrument(skip(client))]
pub async fn fetch_releases(client: &reqwest::Client, url: &str) -> Result<Vec<Release>> {
    let body = client
        .get(url)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .with_context(|| format!("request releases from {url} failed"))?
        .bytes()
        .await
        .context("read releases body failed")?;

    let releases = parse_releases(&body).context("decode releases failed")?;

    info!(releases = releases.len(), "fetch releases done");

    Ok(releases)
}

/// Renders the releases, in the given order, as a Markdown change log.
pub fn render(releases: &[Release]) -> String {
    let mut out = String::from(HEADER);

    for release in releases {
        let date = release
            .date
            .map(|date| date.format("%b %d, %Y").to_string())
            .unwrap_or_else(|| "Unreleased".to_string());

        out.push_str(&format!(
            "\n## [{}] {}\n{}\n\n{}\n",
            release.tag,
            date,
            release.url,
            release.body.as_deref().unwrap_or_default()
        ));
    }

    out.push('\n');

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELEASES_JSON: &str = r#"[
  {
    "html_url": "https://github.com/Shopify/themekit/releases/tag/v0.4.1",
    "tag_name": "v0.4.1",
    "body": "- Fixed watch on windows",
    "published_at": "2016-07-05T15:04:05Z",
    "author": { "login": "chrisbutcher", "url": "https://api.github.com/users/chrisbutcher" }
  },
  {
    "html_url": "https://github.com/Shopify/themekit/releases/tag/v0.4.0",
    "tag_name": "v0.4.0",
    "body": null,
    "published_at": "2016-06-01T09:00:00Z",
    "author": { "login": "csaunders", "url": "https://api.github.com/users/csaunders" }
  }
]"#;

    #[test]
    fn test_parse_releases() {
        let releases = parse_releases(RELEASES_JSON.as_bytes()).unwrap();

        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].tag, "v0.4.1");
        assert_eq!(releases[0].author.name, "chrisbutcher");
        assert!(releases[1].body.is_none());
    }

    #[test]
    fn test_render() {
        let releases = parse_releases(RELEASES_JSON.as_bytes()).unwrap();

        assert_eq!(
            render(&releases),
            "# Change Log\n\
             All released changes to this project will be documented in this file.\n\
             \n\
             \n\
             ## [v0.4.1] Jul 05, 2016\n\
             https://github.com/Shopify/themekit/releases/tag/v0.4.1\n\
             \n\
             - Fixed watch on windows\n\
             \n\
             ## [v0.4.0] Jun 01, 2016\n\
             https://github.com/Shopify/themekit/releases/tag/v0.4.0\n\
             \n\
             \n\
             \n"
        );
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(
            render(&[]),
            "# Change Log\nAll released changes to this project will be documented in this file.\n\n\n"
        );
    }

    #[test]
    fn test_parse_failure() {
        assert!(parse_releases(b"{\"message\": \"rate limited\"}").is_err());
    }
}
