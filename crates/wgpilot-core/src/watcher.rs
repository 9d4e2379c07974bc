//! Filesystem watches on the configuration and runtime directories.
//!
//! Any change under a watched directory means "tunnel state may have
//! changed". Events are neither filtered by file name nor by kind, and are
//! not debounced: every event produces one notification.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

/// Errors from the watch backend.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to start filesystem watcher: {0}")]
    Backend(#[from] notify::Error),

    #[error("failed to watch {path}: {source}")]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Something that can start delivering change events for a path.
pub trait PathSubscriber: Send {
    /// Begin watching `path` (non-recursively).
    fn subscribe(&mut self, path: &Path) -> Result<(), WatchError>;
}

/// [`PathSubscriber`] backed by the platform's native watcher.
pub struct NotifySubscriber {
    watcher: RecommendedWatcher,
}

impl NotifySubscriber {
    /// Create a watcher that calls `on_path_changed` once per raw event,
    /// from the watcher's own thread.
    pub fn new<F>(on_path_changed: F) -> Result<Self, WatchError>
    where
        F: Fn(PathBuf) + Send + 'static,
    {
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => on_path_changed(event.paths.into_iter().next().unwrap_or_default()),
                Err(e) => warn!(error = %e, "Filesystem watcher error"),
            }
        })?;
        Ok(Self { watcher })
    }
}

impl PathSubscriber for NotifySubscriber {
    fn subscribe(&mut self, path: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Subscribe {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Tracks which target directories are subscribed.
///
/// Watches are only ever added. Targets that do not exist yet are retried
/// on the next [`register_watches`](Self::register_watches) pass.
pub struct FileWatcher<S> {
    subscriber: S,
    targets: Vec<PathBuf>,
    watched: HashSet<PathBuf>,
}

impl<S: PathSubscriber> FileWatcher<S> {
    /// Watch `config_dirs` plus `runtime_dir`.
    pub fn new(subscriber: S, config_dirs: &[PathBuf], runtime_dir: &Path) -> Self {
        let mut targets: Vec<PathBuf> = Vec::with_capacity(config_dirs.len() + 1);
        for path in config_dirs.iter().map(PathBuf::as_path).chain([runtime_dir]) {
            if !targets.iter().any(|t| t == path) {
                targets.push(path.to_path_buf());
            }
        }

        Self {
            subscriber,
            targets,
            watched: HashSet::new(),
        }
    }

    /// Subscribe every existing, not yet watched target.
    ///
    /// Returns the number of newly added watches. Idempotent.
    pub fn register_watches(&mut self) -> usize {
        let mut added = 0;
        for path in &self.targets {
            if self.watched.contains(path) {
                continue;
            }
            if !path.exists() {
                debug!(path = %path.display(), "Watch target does not exist yet");
                continue;
            }
            match self.subscriber.subscribe(path) {
                Ok(()) => {
                    info!(path = %path.display(), "Watching directory");
                    self.watched.insert(path.clone());
                    added += 1;
                }
                Err(e) => warn!(error = %e, "Failed to add watch"),
            }
        }
        added
    }

    /// Paths currently subscribed.
    pub fn watched(&self) -> &HashSet<PathBuf> {
        &self.watched
    }

    /// Paths this watcher tries to subscribe, in order.
    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }
}
