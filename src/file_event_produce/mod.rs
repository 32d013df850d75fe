use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use itertools::Itertools;
use mockall::automock;
use thiserror::Error;

pub use filter::EventFilter;
pub use producer::{FileWatcher, FileWatcherBuilder, WatchHandle};

mod filter;
mod producer;

/// Theme directories whose files are treated as assets.
pub const DEFAULT_ASSET_DIRS: &[&str] = &[
    "assets",
    "config",
    "layout",
    "locales",
    "sections",
    "snippets",
    "templates",
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("subscribe {path:?} failed: {source}")]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("walk watch root failed: {0}")]
    Walk(#[from] io::Error),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AssetKind {
    Update,
    Remove,
}

impl Display for AssetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Update => f.write_str("Update"),
            AssetKind::Remove => f.write_str("Remove"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AssetEvent {
    kind: AssetKind,
    key: String,
    value: Bytes,
}

impl AssetEvent {
    pub fn update(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            kind: AssetKind::Update,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        Self {
            kind: AssetKind::Remove,
            key: key.into(),
            value: Bytes::new(),
        }
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    /// Path relative to the watched root, `/` separated.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// File contents at observation time, empty for removals and for
    /// updates whose file could not be read.
    pub fn value(&self) -> &Bytes {
        &self.value
    }
}

impl Display for AssetEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.key, self.kind)
    }
}

/// Loads the contents of a changed file.
#[automock]
#[async_trait]
pub trait FileReader: Send + Sync {
    async fn read(&self, path: &Path) -> io::Result<Bytes>;
}

#[derive(Debug, Default, Copy, Clone)]
pub struct FsReader;

#[async_trait]
impl FileReader for FsReader {
    async fn read(&self, path: &Path) -> io::Result<Bytes> {
        tokio::fs::read(path).await.map(Bytes::from)
    }
}

/// Joins the normal components of a relative path with `/`.
pub fn slash_key(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        })
        .join("/")
}

/// Key of a file below `root`. `None` when the file is outside the root or
/// outside every asset dir. An empty `asset_dirs` accepts every file.
pub fn asset_key<S: AsRef<str>>(root: &Path, asset_dirs: &[S], path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let key = slash_key(relative);
    if key.is_empty() {
        return None;
    }

    if asset_dirs.is_empty() {
        return Some(key);
    }

    asset_dirs
        .iter()
        .any(|dir| {
            key.strip_prefix(dir.as_ref())
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
        })
        .then_some(key)
}
