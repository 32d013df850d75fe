use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use flume::Receiver;
use mockall::automock;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::Serialize;
use tap::TapFallible;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{self, Config};
use crate::file_event_produce::{asset_key, AssetEvent, AssetKind};

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

#[derive(Debug, Error)]
pub enum Error {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("[{code}] {kind} {key} failed: {body}")]
    Status {
        code: StatusCode,
        kind: AssetKind,
        key: String,
        body: String,
    },
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("invalid access token header: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
    #[error("read upload file failed: {0}")]
    Read(#[from] io::Error),
    #[error("{path:?} is outside theme root {root:?}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("{0:?} is not in an asset directory")]
    NotAnAsset(PathBuf),
}

/// Asset body as the theme API expects it: text goes in `value`, anything
/// else base64 encoded in `attachment`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Asset {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

impl Asset {
    pub fn new(key: impl Into<String>, content: &[u8]) -> Self {
        let key = key.into();

        match std::str::from_utf8(content) {
            Ok(text) if !text.contains('\0') => Self {
                key,
                value: Some(text.to_string()),
                attachment: None,
            },

            _ => Self {
                key,
                value: None,
                attachment: Some(STANDARD.encode(content)),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct AssetPayload<'a> {
    asset: &'a Asset,
}

/// Sends asset events to the remote theme.
#[automock]
#[async_trait]
pub trait AssetUploader: Send + Sync {
    async fn perform(&self, event: &AssetEvent) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
pub struct ThemeClient {
    client: reqwest::Client,
    asset_url: String,
}

impl ThemeClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let mut access_token = HeaderValue::from_str(config.access_token()?)?;
        access_token.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_TOKEN_HEADER, access_token);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("themewatch/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            asset_url: config.asset_url()?,
        })
    }

    async fn check_status(
        resp: reqwest::Response,
        event: &AssetEvent,
    ) -> Result<(), Error> {
        let code = resp.status();
        if code.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();

        Err(Error::Status {
            code,
            kind: event.kind(),
            key: event.key().to_string(),
            body,
        })
    }
}

#[async_trait]
impl AssetUploader for ThemeClient {
    #[instrument(err, skip(self, event), fields(key = %event.key(), kind = %event.kind()))]
    async fn perform(&self, event: &AssetEvent) -> Result<(), Error> {
        let resp = match event.kind() {
            AssetKind::Update => {
                if event.value().is_empty() {
                    warn!("asset has no content, skip update");

                    return Ok(());
                }

                let asset = Asset::new(event.key(), event.value());

                self.client
                    .put(&self.asset_url)
                    .json(&AssetPayload { asset: &asset })
                    .send()
                    .await?
            }

            AssetKind::Remove => {
                self.client
                    .delete(&self.asset_url)
                    .query(&[("asset[key]", event.key())])
                    .send()
                    .await?
            }
        };

        Self::check_status(resp, event).await
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct UploadSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Performs every event from the worker queue until it closes.
pub async fn run_workers<U: AssetUploader + ?Sized>(
    worker_queue: Receiver<AssetEvent>,
    uploader: &U,
) -> UploadSummary {
    let mut summary = UploadSummary::default();

    while let Ok(event) = worker_queue.recv_async().await {
        match uploader.perform(&event).await {
            Err(err) => {
                error!(%err, %event, "perform asset event failed");

                summary.failed += 1;
            }

            Ok(_) => {
                info!(%event, "perform asset event done");

                summary.succeeded += 1;
            }
        }
    }

    debug!(?summary, "worker queue is closed");

    summary
}

/// Reads a file named on the command line into an update event keyed
/// relative to `root`. Returns `None` for directories.
pub async fn load_upload_event<S: AsRef<str>>(
    root: &Path,
    asset_dirs: &[S],
    path: &Path,
) -> Result<Option<AssetEvent>, Error> {
    let metadata = tokio::fs::metadata(path)
        .await
        .tap_err(|err| error!(%err, ?path, "stat upload file failed"))?;
    if metadata.is_dir() {
        return Ok(None);
    }

    let root = tokio::fs::canonicalize(root)
        .await
        .tap_err(|err| error!(%err, ?root, "resolve theme root failed"))?;
    let full_path = tokio::fs::canonicalize(path).await?;
    if !full_path.starts_with(&root) {
        return Err(Error::OutsideRoot {
            path: path.to_path_buf(),
            root,
        });
    }

    let key = asset_key(&root, asset_dirs, &full_path)
        .ok_or_else(|| Error::NotAnAsset(path.to_path_buf()))?;

    let content = tokio::fs::read(&full_path)
        .await
        .tap_err(|err| error!(%err, ?path, "read upload file failed"))?;

    Ok(Some(AssetEvent::update(key, Bytes::from(content))))
}

#[cfg(test)]
mod tests {
    use std::env;

    use mockall::predicate::*;
    use tempfile::TempDir;

    use super::*;
    use crate::file_event_produce::DEFAULT_ASSET_DIRS;

    #[test]
    fn test_text_asset() {
        let asset = Asset::new("layout/theme.liquid", b"<html></html>");

        assert_eq!(asset.value.as_deref(), Some("<html></html>"));
        assert!(asset.attachment.is_none());
        assert_eq!(
            serde_json::to_value(AssetPayload { asset: &asset }).unwrap(),
            serde_json::json!({"asset": {"key": "layout/theme.liquid", "value": "<html></html>"}})
        );
    }

    #[test]
    fn test_binary_asset() {
        let asset = Asset::new("assets/logo.png", &[0x89, b'P', b'N', b'G', 0x00, 0xff]);

        assert!(asset.value.is_none());
        assert_eq!(asset.attachment.as_deref(), Some("iVBORwD/"));
    }

    #[test]
    fn test_client_requires_credentials() {
        let config = Config::from_yaml("store: example.myshopify.com\n").unwrap();

        assert!(matches!(
            ThemeClient::new(&config),
            Err(Error::Config(config::Error::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn test_run_workers() {
        let mut uploader = MockAssetUploader::new();
        uploader
            .expect_perform()
            .with(eq(AssetEvent::update("assets/a.css", "a")))
            .times(1)
            .returning(|_| Ok(()));
        uploader
            .expect_perform()
            .with(eq(AssetEvent::remove("assets/b.css")))
            .times(1)
            .returning(|event| {
                Err(Error::Status {
                    code: StatusCode::NOT_FOUND,
                    kind: event.kind(),
                    key: event.key().to_string(),
                    body: "Not Found".to_string(),
                })
            });

        let (sender, receiver) = flume::unbounded();
        sender.send(AssetEvent::update("assets/a.css", "a")).unwrap();
        sender.send(AssetEvent::remove("assets/b.css")).unwrap();
        drop(sender);

        let summary = run_workers(receiver, &uploader).await;

        assert_eq!(
            summary,
            UploadSummary {
                succeeded: 1,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_load_upload_event() {
        let temp_dir = TempDir::new_in(env::temp_dir()).unwrap();
        let assets = temp_dir.path().join("assets");
        tokio::fs::create_dir(&assets).await.unwrap();
        tokio::fs::write(assets.join("app.js"), b"alert(1)")
            .await
            .unwrap();

        let event = load_upload_event(temp_dir.path(), DEFAULT_ASSET_DIRS, &assets.join("app.js"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event.kind(), AssetKind::Update);
        assert_eq!(event.key(), "assets/app.js");
        assert_eq!(event.value().as_ref(), b"alert(1)");

        assert!(load_upload_event(temp_dir.path(), DEFAULT_ASSET_DIRS, &assets)
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            load_upload_event(temp_dir.path(), DEFAULT_ASSET_DIRS, &assets.join("missing.js"))
                .await,
            Err(Error::Read(_))
        ));
    }

    #[tokio::test]
    async fn test_load_nested_upload_event() {
        let temp_dir = TempDir::new_in(env::temp_dir()).unwrap();
        let customers = temp_dir.path().join("templates").join("customers");
        tokio::fs::create_dir_all(&customers).await.unwrap();
        tokio::fs::write(customers.join("login.liquid"), b"{{ form }}")
            .await
            .unwrap();

        // a path that wanders through `..` still resolves below the root
        let path = temp_dir
            .path()
            .join("templates")
            .join("..")
            .join("templates")
            .join("customers")
            .join("login.liquid");

        let event = load_upload_event(temp_dir.path(), DEFAULT_ASSET_DIRS, &path)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event.key(), "templates/customers/login.liquid");
    }

    #[tokio::test]
    async fn test_reject_file_outside_root() {
        let temp_dir = TempDir::new_in(env::temp_dir()).unwrap();
        let root = temp_dir.path().join("theme");
        tokio::fs::create_dir_all(root.join("assets")).await.unwrap();
        let outside = temp_dir.path().join("app.js");
        tokio::fs::write(&outside, b"alert(1)").await.unwrap();

        assert!(matches!(
            load_upload_event(&root, DEFAULT_ASSET_DIRS, &outside).await,
            Err(Error::OutsideRoot { .. })
        ));
    }

    #[tokio::test]
    async fn test_reject_file_outside_asset_dirs() {
        let temp_dir = TempDir::new_in(env::temp_dir()).unwrap();
        let notes = temp_dir.path().join("notes.txt");
        tokio::fs::write(&notes, b"todo").await.unwrap();

        assert!(matches!(
            load_upload_event(temp_dir.path(), DEFAULT_ASSET_DIRS, &notes).await,
            Err(Error::NotAnAsset(_))
        ));

        let event = load_upload_event::<&str>(temp_dir.path(), &[], &notes)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.key(), "notes.txt");
    }
}
