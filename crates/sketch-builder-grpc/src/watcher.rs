//! Filesystem watcher that invalidates the tools cache.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use sketch_builder::CacheValidity;
use tokio::sync::mpsc;

type WatchResult = notify::Result<Event>;

/// Watches paths for changes and clears the "may use cached tools" flag.
///
/// Events are handed to one background task that lives as long as the
/// watcher. The task treats every event the same way (create, write, rename
/// or delete) and invalidates once per batch of queued events.
pub struct FileWatcher {
    watcher: Mutex<RecommendedWatcher>,
    paths: Mutex<Vec<PathBuf>>,
}

impl fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWatcher")
            .field("paths", &self.watched_paths())
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Start watching, publishing invalidations to `validity`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(validity: Arc<CacheValidity>) -> notify::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<WatchResult>();
        let watcher = notify::recommended_watcher(move |res: WatchResult| {
            // The loop only exits once this sender is dropped.
            let _ = tx.send(res);
        })?;

        tokio::spawn(watch_loop(rx, validity));

        Ok(Self {
            watcher: Mutex::new(watcher),
            paths: Mutex::new(Vec::new()),
        })
    }

    /// Watch `path`, recursively if it is a directory.
    pub fn watch(&self, path: &Path) -> notify::Result<()> {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watch(path, RecursiveMode::Recursive)?;
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_path_buf());
        tracing::info!("watching {}", path.display());
        Ok(())
    }

    /// Paths registered so far.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.paths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Invalidate `validity` once for every batch of queued events.
pub(crate) async fn watch_loop(
    mut rx: mpsc::UnboundedReceiver<WatchResult>,
    validity: Arc<CacheValidity>,
) {
    while let Some(first) = rx.recv().await {
        let mut changes = 0usize;
        let mut next = Some(first);
        while let Some(res) = next {
            match res {
                Ok(event) => {
                    changes += 1;
                    tracing::debug!(kind = ?event.kind, paths = ?event.paths, "file changed");
                }
                Err(e) => tracing::warn!("watch error: {}", e),
            }
            next = rx.try_recv().ok();
        }

        if changes > 0 && validity.invalidate() {
            tracing::info!(changes, "files changed, cached tools invalidated");
        }
    }
    tracing::debug!("file watcher stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use notify::EventKind;
    use notify::event::{CreateKind, ModifyKind};

    use super::*;

    fn event(kind: EventKind, path: &str) -> WatchResult {
        Ok(Event::new(kind).add_path(PathBuf::from(path)))
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_batch_invalidates_once() {
        let validity = Arc::new(CacheValidity::new());
        assert!(validity.revalidate(0));

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(event(EventKind::Create(CreateKind::File), "/sketch/a.h")).unwrap();
        tx.send(event(EventKind::Modify(ModifyKind::Any), "/sketch/a.h")).unwrap();
        tx.send(event(EventKind::Remove(notify::event::RemoveKind::Any), "/sketch/b.h"))
            .unwrap();

        let handle = tokio::spawn(watch_loop(rx, Arc::clone(&validity)));
        drop(tx);
        handle.await.unwrap();

        assert_eq!(validity.snapshot(), (false, 1));
    }

    #[tokio::test]
    async fn test_errors_do_not_stop_the_loop() {
        let validity = Arc::new(CacheValidity::new());
        assert!(validity.revalidate(0));

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(watch_loop(rx, Arc::clone(&validity)));

        tx.send(Err(notify::Error::generic("inotify queue overflow"))).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(validity.is_valid(), "errors alone are not changes");

        tx.send(event(EventKind::Any, "/sketch/Blink.ino")).unwrap();
        wait_for(|| !validity.is_valid()).await;

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_real_file_change_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let validity = Arc::new(CacheValidity::new());
        assert!(validity.revalidate(0));

        let watcher = FileWatcher::start(Arc::clone(&validity)).unwrap();
        watcher.watch(dir.path()).unwrap();
        assert_eq!(watcher.watched_paths(), vec![dir.path().to_path_buf()]);

        std::fs::write(dir.path().join("platform.txt"), "name=Test\n").unwrap();
        wait_for(|| !validity.is_valid()).await;
    }

    #[tokio::test]
    async fn test_watch_missing_path_fails() {
        let watcher = FileWatcher::start(Arc::new(CacheValidity::new())).unwrap();
        assert!(watcher.watch(Path::new("/nonexistent/hardware")).is_err());
        assert!(watcher.watched_paths().is_empty());
    }
}
