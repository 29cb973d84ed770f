//! File system watcher for live library changes.
//!
//! Uses the `notify` crate for raw OS events and feeds them through a
//! [`Debouncer`] before anything reaches the catalog.
//!
//! # Design
//!
//! Every `(path, kind)` pair has its own timer state:
//!
//! - **Idle**: no entry in the timer map
//! - **Debouncing**: a timer is pending; a new event for the same pair aborts
//!   it and starts a fresh one, so a burst collapses into one dispatch
//! - **Stabilizing** (updates only): the file size is polled until two
//!   consecutive reads agree, then [`ChangeHandler::update`] runs
//!
//! Removals skip stabilization and go straight to [`ChangeHandler::remove`].
//! Timers for different paths are independent.
//!
//! # Usage
//!
//! ```rust,ignore
//! let watcher = LiveWatcher::start(&music_root, WatchSettings::default(), handler)?;
//! // ...
//! watcher.stop();
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::is_audio_file;
use crate::error::{Error, Result};

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Created or written to
    Update,
    /// Deleted or moved away
    Remove,
}

/// A filtered change notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Change {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl Change {
    pub fn update(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Update,
            path: path.into(),
        }
    }

    pub fn remove(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Remove,
            path: path.into(),
        }
    }
}

/// Receiver of settled changes.
#[async_trait]
pub trait ChangeHandler: Send + Sync + 'static {
    /// A file finished being written.
    async fn update(&self, path: &Path) -> Result<()>;

    /// A file or directory disappeared.
    async fn remove(&self, path: &Path) -> Result<()>;
}

/// Timing knobs for debounce and stabilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    /// Quiet period required after the last event for a path
    pub debounce: Duration,
    /// Interval between size polls while stabilizing
    pub poll_interval: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Observable state of one `(path, kind)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Debouncing,
    Stabilizing,
}

type Key = (PathBuf, ChangeKind);

enum Slot {
    Debouncing { generation: u64, timer: JoinHandle<()> },
    Stabilizing { generation: u64 },
}

struct Shared {
    settings: WatchSettings,
    handler: Arc<dyn ChangeHandler>,
    slots: Mutex<HashMap<Key, Slot>>,
    generation: AtomicU64,
}

/// Per-path debounce and stabilization of [`Change`]s.
///
/// Cloning yields another handle to the same timer map.
#[derive(Clone)]
pub struct Debouncer {
    shared: Arc<Shared>,
}

impl Debouncer {
    pub fn new(settings: WatchSettings, handler: Arc<dyn ChangeHandler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                handler,
                slots: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Register a change, restarting the debounce timer for its path.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push(&self, change: Change) {
        let key: Key = (change.path, change.kind);
        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed);

        // Hold the map while spawning so the timer can't expire before its slot exists
        let mut slots = self.shared.slots.lock();
        let shared = Arc::clone(&self.shared);
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(shared.settings.debounce).await;
            Shared::expire(&shared, timer_key, generation);
        });

        if let Some(Slot::Debouncing { timer: previous, .. }) =
            slots.insert(key, Slot::Debouncing { generation, timer })
        {
            previous.abort();
        }
    }

    pub fn state(&self, path: &Path, kind: ChangeKind) -> TimerState {
        match self.shared.slots.lock().get(&(path.to_path_buf(), kind)) {
            None => TimerState::Idle,
            Some(Slot::Debouncing { .. }) => TimerState::Debouncing,
            Some(Slot::Stabilizing { .. }) => TimerState::Stabilizing,
        }
    }

    /// Number of pairs waiting for their debounce timer.
    pub fn pending(&self) -> usize {
        self.shared
            .slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Debouncing { .. }))
            .count()
    }

    /// Abort every pending debounce timer.
    ///
    /// Changes already past debouncing are left to finish on their own.
    pub fn cancel_all(&self) {
        let mut slots = self.shared.slots.lock();
        slots.retain(|_, slot| match slot {
            Slot::Debouncing { timer, .. } => {
                timer.abort();
                false
            }
            Slot::Stabilizing { .. } => true,
        });
    }
}

impl Shared {
    fn expire(shared: &Arc<Shared>, key: Key, generation: u64) {
        let mut slots = shared.slots.lock();
        match slots.get(&key) {
            Some(Slot::Debouncing { generation: current, .. }) if *current == generation => {}
            _ => return,
        }

        let (path, kind) = key.clone();
        match kind {
            ChangeKind::Remove => {
                slots.remove(&key);
                drop(slots);
                let handler = Arc::clone(&shared.handler);
                tokio::spawn(async move {
                    tracing::debug!(target: "scanner::watcher", path = %path.display(), "Dispatching removal");
                    if let Err(e) = handler.remove(&path).await {
                        tracing::warn!(target: "scanner::watcher", path = %path.display(), error = %e, "Removal failed");
                    }
                });
            }
            ChangeKind::Update => {
                slots.insert(key.clone(), Slot::Stabilizing { generation });
                drop(slots);
                let shared = Arc::clone(shared);
                tokio::spawn(async move {
                    shared.stabilize_and_update(key, generation).await;
                });
            }
        }
    }

    async fn stabilize_and_update(&self, key: Key, generation: u64) {
        let path = &key.0;
        match wait_until_stable(self.settings.poll_interval, || file_size(path)).await {
            Ok(size) => {
                tracing::debug!(target: "scanner::watcher", path = %path.display(), size, "File settled");
                if let Err(e) = self.handler.update(path).await {
                    tracing::warn!(target: "scanner::watcher", path = %path.display(), error = %e, "Update failed");
                }
            }
            Err(e) => {
                // Usually the file vanished mid-write; its removal event handles the catalog
                tracing::debug!(target: "scanner::watcher", path = %path.display(), error = %e, "File unreadable while settling");
            }
        }

        let mut slots = self.slots.lock();
        let settled = matches!(
            slots.get(&key),
            Some(Slot::Stabilizing { generation: current }) if *current == generation
        );
        if settled {
            slots.remove(&key);
        }
    }
}

async fn file_size(path: &Path) -> std::io::Result<u64> {
    Ok(tokio::fs::metadata(path).await?.len())
}

/// Poll `read_size` every `interval` until two consecutive reads agree.
///
/// Returns the settled size. A failing read ends the wait with its error.
pub async fn wait_until_stable<F, Fut>(interval: Duration, mut read_size: F) -> std::io::Result<u64>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<u64>>,
{
    let mut last = read_size().await?;
    loop {
        tokio::time::sleep(interval).await;
        let size = read_size().await?;
        if size == last {
            return Ok(size);
        }
        last = size;
    }
}

/// Map a raw notify event to the changes the catalog cares about.
///
/// Updates are kept only for audio files. Every removal is kept: a removed
/// directory can look like any file name, and removing a path the catalog
/// doesn't know is a no-op.
pub fn classify(event: &notify::Event) -> Vec<Change> {
    let changes = match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            vec![
                Change::remove(&event.paths[0]),
                Change::update(&event.paths[1]),
            ]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
            event.paths.iter().map(Change::remove).collect()
        }
        // Platforms that don't say which side of a rename this is
        EventKind::Modify(ModifyKind::Name(RenameMode::Any | RenameMode::Other)) => event
            .paths
            .iter()
            .map(|p| if p.exists() { Change::update(p) } else { Change::remove(p) })
            .collect(),
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(_) => {
            event.paths.iter().map(Change::update).collect()
        }
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    };

    changes.into_iter().filter(is_relevant).collect()
}

fn is_relevant(change: &Change) -> bool {
    match change.kind {
        ChangeKind::Update => is_audio_file(&change.path),
        ChangeKind::Remove => true,
    }
}

/// Handle to a running watcher.
///
/// Dropping it (or calling [`LiveWatcher::stop`]) releases the OS watch and
/// cancels pending debounce timers.
pub struct LiveWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    debouncer: Debouncer,
    pump: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl LiveWatcher {
    /// Watch `root` recursively and route settled changes to `handler`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        root: &Path,
        settings: WatchSettings,
        handler: Arc<dyn ChangeHandler>,
    ) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();

        let mut watcher = notify::recommended_watcher(move |result| {
            let _ = tx.send(result);
        })
        .map_err(|e| Error::watch(format!("Failed to initialize watcher: {e}")))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| Error::watch(format!("Failed to watch {}: {e}", root.display())))?;

        tracing::info!(target: "scanner::watcher", path = %root.display(), "Watching directory");

        let debouncer = Debouncer::new(settings, handler);
        let running = Arc::new(AtomicBool::new(true));

        let pump_debouncer = debouncer.clone();
        let pump_running = Arc::clone(&running);
        let pump = tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                match result {
                    Ok(event) => {
                        for change in classify(&event) {
                            tracing::trace!(target: "scanner::watcher", path = %change.path.display(), kind = ?change.kind, "Change");
                            pump_debouncer.push(change);
                        }
                    }
                    Err(e) => {
                        tracing::error!(target: "scanner::watcher", error = %e, "Watch failed, stopping watcher");
                        break;
                    }
                }
            }
            pump_running.store(false, Ordering::Relaxed);
            pump_debouncer.cancel_all();
        });

        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
            debouncer,
            pump,
            running,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// False once stopped or after a fatal watch error.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) && !self.pump.is_finished()
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for LiveWatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.pump.abort();
        self.debouncer.cancel_all();
        tracing::debug!(target: "scanner::watcher", path = %self.root.display(), "File watcher stopped");
    }
}
