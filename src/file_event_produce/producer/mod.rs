use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, io};

use bytes::Bytes;
use flume::{Receiver, Sender};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tap::TapFallible;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::{
    asset_key, slash_key, AssetEvent, AssetKind, Error, EventFilter, FileReader, FsReader,
    DEFAULT_ASSET_DIRS,
};
use crate::ext::{checksum, Sha256sum};

const DEFAULT_CHANNEL_CAPACITY: usize = 16;

pub struct FileWatcher;

impl FileWatcher {
    pub fn builder(root: impl Into<PathBuf>) -> FileWatcherBuilder {
        FileWatcherBuilder {
            root: root.into(),
            recursive: false,
            asset_dirs: DEFAULT_ASSET_DIRS.iter().map(|dir| dir.to_string()).collect(),
            filter: EventFilter::default(),
            reader: Arc::new(FsReader),
            skip_unchanged: false,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

pub struct FileWatcherBuilder {
    root: PathBuf,
    recursive: bool,
    asset_dirs: Vec<String>,
    filter: EventFilter,
    reader: Arc<dyn FileReader>,
    skip_unchanged: bool,
    channel_capacity: usize,
}

impl FileWatcherBuilder {
    /// Also subscribe every subdirectory that exists when the watch starts.
    /// Directories created later are not tracked.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Restricts events to files below these root relative directories. An
    /// empty list accepts every file under the root.
    pub fn asset_dirs<I, S>(mut self, asset_dirs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.asset_dirs = asset_dirs
            .into_iter()
            .map(|dir| dir.into().trim_matches('/').to_string())
            .collect();
        self
    }

    pub fn ignore(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn reader(mut self, reader: Arc<dyn FileReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn restore_reader(mut self) -> Self {
        self.reader = Arc::new(FsReader);
        self
    }

    pub fn skip_unchanged(mut self, skip_unchanged: bool) -> Self {
        self.skip_unchanged = skip_unchanged;
        self
    }

    pub fn channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    /// Starts watching. A subscription failure is logged and recorded on the
    /// handle, the returned channel is closed right away.
    pub fn watch(self) -> (Receiver<AssetEvent>, WatchHandle) {
        let root = self.root.clone();

        match self.try_watch() {
            Ok(watch) => watch,
            Err(err) => {
                error!(%err, ?root, "watch root failed, close asset event channel");

                let (sender, receiver) = flume::bounded(0);
                drop(sender);

                (
                    receiver,
                    WatchHandle {
                        watcher: None,
                        task: None,
                        error: Some(err),
                    },
                )
            }
        }
    }

    /// Must be called inside a tokio runtime, the translation task is
    /// spawned on it.
    #[instrument(skip(self), fields(root = ?self.root, recursive = self.recursive))]
    pub fn try_watch(self) -> Result<(Receiver<AssetEvent>, WatchHandle), Error> {
        let root = fs::canonicalize(&self.root)
            .map_err(|err| Error::Subscribe {
                path: self.root.clone(),
                source: notify::Error::io(err),
            })
            .tap_err(|err| error!(%err, "resolve watch root failed"))?;

        let dirs = find_dirs_to_watch(&root, self.recursive, &self.filter)
            .tap_err(|err| error!(%err, "find dirs to watch failed"))?;

        let (notify_sender, notify_receiver) = flume::unbounded();

        let mut watcher =
            notify::recommended_watcher(move |event: Result<NotifyEvent, notify::Error>| {
                if let Err(err) = notify_sender.send(event) {
                    error!(%err, "send watch event failed");
                }
            })
            .map_err(|err| Error::Subscribe {
                path: root.clone(),
                source: err,
            })?;

        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|err| Error::Subscribe {
                    path: dir.clone(),
                    source: err,
                })
                .tap_err(|err| error!(%err, "subscribe dir failed"))?;
        }

        info!(dirs = dirs.len(), "subscribe watch dirs done");

        let (sender, receiver) = flume::bounded(self.channel_capacity);
        let translator = Translator {
            root,
            asset_dirs: self.asset_dirs,
            filter: self.filter,
            reader: self.reader,
            skip_unchanged: self.skip_unchanged,
            checksums: HashMap::new(),
        };

        let task = tokio::spawn(translator.run(notify_receiver, sender));

        Ok((
            receiver,
            WatchHandle {
                watcher: Some(watcher),
                task: Some(task),
                error: None,
            },
        ))
    }
}

/// Owns the filesystem subscription. Closing or dropping it closes the
/// asset event channel once in-flight events are delivered.
pub struct WatchHandle {
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
    error: Option<Error>,
}

impl WatchHandle {
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// The error that prevented the subscription, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn close(&mut self) {
        if self.watcher.take().is_some() {
            info!("close watch subscription done");
        }
    }

    /// Closes the subscription and waits until the translation task exits.
    pub async fn shutdown(mut self) {
        self.close();

        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                error!(%err, "join asset event translation task failed");
            }
        }
    }
}

fn find_dirs_to_watch(
    root: &Path,
    recursive: bool,
    filter: &EventFilter,
) -> io::Result<Vec<PathBuf>> {
    let mut dirs = vec![root.to_path_buf()];
    if !recursive {
        return Ok(dirs);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(&path);
            if filter.matches(&slash_key(relative)) {
                debug!(?path, "ignore filtered dir");

                continue;
            }

            dirs.push(path.clone());
            pending.push(path);
        }
    }

    Ok(dirs)
}

struct Translator {
    root: PathBuf,
    asset_dirs: Vec<String>,
    filter: EventFilter,
    reader: Arc<dyn FileReader>,
    skip_unchanged: bool,
    checksums: HashMap<String, Sha256sum>,
}

impl Translator {
    async fn run(
        mut self,
        notify_receiver: Receiver<Result<NotifyEvent, notify::Error>>,
        sender: Sender<AssetEvent>,
    ) {
        while let Ok(event) = notify_receiver.recv_async().await {
            let event = match event {
                Err(err) => {
                    error!(%err, "receive event from watcher failed");

                    continue;
                }

                Ok(event) => event,
            };

            if self.is_root_removed(&event) {
                warn!(root = ?self.root, "watch root is removed, stop translating");

                return;
            }

            if self.handle_event(event, &sender).await.is_err() {
                info!("asset event receiver is dropped, stop translating");

                return;
            }
        }

        info!(root = ?self.root, "watch subscription closed");
    }

    fn is_root_removed(&self, event: &NotifyEvent) -> bool {
        matches!(event.kind, EventKind::Remove(_))
            && event.paths.iter().any(|path| path == &self.root)
    }

    async fn handle_event(
        &mut self,
        event: NotifyEvent,
        sender: &Sender<AssetEvent>,
    ) -> Result<(), flume::SendError<AssetEvent>> {
        for (kind, path) in translate(event) {
            if let Some(asset_event) = self.load_asset_event(kind, &path).await {
                debug!(%asset_event, "send asset event");

                sender.send_async(asset_event).await?;
            }
        }

        Ok(())
    }

    async fn load_asset_event(&mut self, kind: AssetKind, path: &Path) -> Option<AssetEvent> {
        let key = match self.asset_key(path) {
            None => {
                debug!(?path, "path is not an asset, ignore");

                return None;
            }

            Some(key) => key,
        };

        if self.filter.matches(&key) {
            debug!(%key, "asset is filtered, ignore");

            return None;
        }

        match kind {
            AssetKind::Remove => {
                self.checksums.remove(&key);

                Some(AssetEvent::remove(key))
            }

            AssetKind::Update => {
                if let Ok(metadata) = tokio::fs::metadata(path).await {
                    if metadata.is_dir() {
                        return None;
                    }
                }

                let value = match self.reader.read(path).await {
                    Err(err) => {
                        warn!(%err, ?path, "read asset file failed, send empty value");

                        Bytes::new()
                    }

                    Ok(value) => value,
                };

                if self.skip_unchanged && self.is_unchanged(&key, &value) {
                    debug!(%key, "asset content is unchanged, ignore");

                    return None;
                }

                Some(AssetEvent::update(key, value))
            }
        }
    }

    fn is_unchanged(&mut self, key: &str, value: &[u8]) -> bool {
        let sum = checksum(value);
        if self.checksums.get(key) == Some(&sum) {
            return true;
        }

        self.checksums.insert(key.to_string(), sum);

        false
    }

    fn asset_key(&self, path: &Path) -> Option<String> {
        asset_key(&self.root, &self.asset_dirs, path)
    }
}

fn translate(event: NotifyEvent) -> Vec<(AssetKind, PathBuf)> {
    let paths_with = |kind, paths: Vec<PathBuf>| {
        paths
            .into_iter()
            .map(|path| (kind, path))
            .collect::<Vec<_>>()
    };

    match event.kind {
        EventKind::Any | EventKind::Other => paths_with(AssetKind::Update, event.paths),
        EventKind::Access(_) => vec![],
        EventKind::Create(CreateKind::Folder) => vec![],
        EventKind::Create(_) => paths_with(AssetKind::Update, event.paths),
        EventKind::Modify(ModifyKind::Name(rename_mode)) => {
            translate_rename(rename_mode, event.paths)
        }
        EventKind::Modify(_) => paths_with(AssetKind::Update, event.paths),
        EventKind::Remove(RemoveKind::Folder) => vec![],
        EventKind::Remove(_) => paths_with(AssetKind::Remove, event.paths),
    }
}

fn translate_rename(rename_mode: RenameMode, mut paths: Vec<PathBuf>) -> Vec<(AssetKind, PathBuf)> {
    match rename_mode {
        RenameMode::From => paths
            .into_iter()
            .take(1)
            .map(|path| (AssetKind::Remove, path))
            .collect(),
        RenameMode::To => paths
            .into_iter()
            .take(1)
            .map(|path| (AssetKind::Update, path))
            .collect(),
        RenameMode::Both => {
            if paths.len() != 2 {
                warn!(?paths, "rename event doesn't have 2 paths, ignore");

                return vec![];
            }

            let to = paths.remove(1);
            let from = paths.remove(0);

            vec![(AssetKind::Remove, from), (AssetKind::Update, to)]
        }
        RenameMode::Any | RenameMode::Other => paths
            .into_iter()
            .map(|path| {
                if path.exists() {
                    (AssetKind::Update, path)
                } else {
                    (AssetKind::Remove, path)
                }
            })
            .collect(),
    }
}
