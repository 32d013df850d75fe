use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tap::TapFallible;
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::bucket::BucketConfig;

pub const DEFAULT_BUCKET_SIZE: usize = 40;
pub const DEFAULT_REFILL_RATE: usize = 2;
pub const DEFAULT_REFILL_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum Error {
    #[error("read config {path:?} failed: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config failed: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    store: Option<String>,
    access_token: Option<String>,
    theme_id: Option<u64>,
    #[serde(alias = "BucketSize")]
    bucket_size: Option<i64>,
    #[serde(alias = "RefillRate")]
    refill_rate: Option<i64>,
    refill_period_ms: Option<u64>,
    #[serde(alias = "directory")]
    root: Option<PathBuf>,
    #[serde(default)]
    ignore_files: Vec<String>,
    #[serde(default)]
    skip_unchanged: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Config {
    pub store: Option<String>,
    pub access_token: Option<String>,
    pub theme_id: Option<u64>,
    pub bucket_size: usize,
    pub refill_rate: usize,
    pub refill_period: Duration,
    pub root: PathBuf,
    pub ignore_files: Vec<String>,
    pub skip_unchanged: bool,
}

impl Config {
    /// Loads a YAML config file. A relative `root` is resolved against the
    /// directory holding the file.
    #[instrument]
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = fs::read_to_string(path)
            .map_err(|err| Error::Read {
                path: path.to_path_buf(),
                source: err,
            })
            .tap_err(|err| error!(%err, "read config file failed"))?;

        let mut config = Self::from_yaml(&content)?;
        if config.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            config.root = base.join(&config.root);
        }

        info!(root = ?config.root, "load config done");

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, Error> {
        let raw = if content.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str::<RawConfig>(content)
                .tap_err(|err| error!(%err, "parse config yaml failed"))?
        };

        Ok(Self {
            store: raw.store.filter(|store| !store.is_empty()),
            access_token: raw.access_token.filter(|token| !token.is_empty()),
            theme_id: raw.theme_id,
            bucket_size: positive_or(raw.bucket_size, DEFAULT_BUCKET_SIZE),
            refill_rate: positive_or(raw.refill_rate, DEFAULT_REFILL_RATE),
            refill_period: raw
                .refill_period_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REFILL_PERIOD),
            root: raw.root.unwrap_or_else(|| PathBuf::from(".")),
            ignore_files: raw.ignore_files,
            skip_unchanged: raw.skip_unchanged,
        })
    }

    pub fn bucket_config(&self) -> BucketConfig {
        BucketConfig::new(self.bucket_size, self.refill_rate, self.refill_period)
    }

    pub fn admin_url(&self) -> Result<String, Error> {
        let store = self
            .store
            .as_deref()
            .ok_or_else(|| Error::Invalid("missing store".to_string()))?;

        Ok(match self.theme_id {
            None => format!("https://{store}/admin"),
            Some(theme_id) => format!("https://{store}/admin/themes/{theme_id}"),
        })
    }

    pub fn asset_url(&self) -> Result<String, Error> {
        Ok(format!("{}/assets.json", self.admin_url()?))
    }

    pub fn access_token(&self) -> Result<&str, Error> {
        self.access_token
            .as_deref()
            .ok_or_else(|| Error::Invalid("missing access_token".to_string()))
    }
}

fn positive_or(value: Option<i64>, default: usize) -> usize {
    match value {
        Some(value) if value > 0 => value as usize,
        _ => default,
    }
}
