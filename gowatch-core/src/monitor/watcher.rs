//! Core file system watcher implementation using notify crate

use crate::config::WatchBackend;
use crate::error::{Result, WatchError};
use crate::monitor::{ChangeEvent, ChangeKind, ChangeQueue, PathFilter};
use notify::event::{MetadataKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Watches a directory tree and feeds accepted changes into a [`ChangeQueue`].
pub struct FileWatcher {
    filter: PathFilter,
    backend: WatchBackend,
}

/// Keeps the OS watcher alive. Dropping it stops watching.
pub struct WatcherHandle {
    registry: Arc<Mutex<Registry>>,
    errors: mpsc::UnboundedReceiver<notify::Error>,
    watched_files: usize,
}

impl WatcherHandle {
    /// Number of files matching the filter when watching started.
    pub fn watched_files(&self) -> usize {
        self.watched_files
    }

    /// Directories currently registered with the backend.
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        lock(&self.registry).dirs.iter().cloned().collect()
    }

    /// Runtime errors reported by the watcher backend.
    pub fn errors(&mut self) -> &mut mpsc::UnboundedReceiver<notify::Error> {
        &mut self.errors
    }
}

/// Directories registered with the backend, one non-recursive watch each.
struct Registry {
    watcher: Box<dyn Watcher + Send>,
    dirs: BTreeSet<PathBuf>,
}

impl Registry {
    fn add(&mut self, dir: PathBuf) -> notify::Result<()> {
        if self.dirs.contains(&dir) {
            return Ok(());
        }
        self.watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        trace!("Watching directory {:?}", dir);
        self.dirs.insert(dir);
        Ok(())
    }

    fn remove(&mut self, path: &Path) {
        let gone: Vec<PathBuf> =
            self.dirs.iter().filter(|d| d.starts_with(path)).cloned().collect();
        for dir in gone {
            // The backend may already have dropped the watch with the directory.
            let _ = self.watcher.unwatch(&dir);
            self.dirs.remove(&dir);
            trace!("Stopped watching directory {:?}", dir);
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Directory changes that add or drop watches.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DirChange {
    Appeared(PathBuf),
    Vanished(PathBuf),
}

impl FileWatcher {
    pub fn new(filter: PathFilter) -> Self {
        Self { filter, backend: WatchBackend::Native }
    }

    pub fn with_backend(mut self, backend: WatchBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Registers every directory outside the ignored subtrees and starts
    /// forwarding changes to `queue`.
    ///
    /// Directories created later are registered as they appear. Must be
    /// called from within a Tokio runtime.
    pub fn start(self, queue: ChangeQueue) -> Result<WatcherHandle> {
        let root = self.filter.root().to_path_buf();
        let watched_files = self.filter.enumerate().len();
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let (dir_tx, dir_rx) = mpsc::unbounded_channel();
        let filter = self.filter.clone();
        let watched_root = root.clone();

        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for change in dir_changes(&event) {
                    let _ = dir_tx.send(change);
                }
                if let Some(change) = translate(event, &filter) {
                    trace!("Queueing {:?}", change);
                    queue.push(change);
                }
            }
            // Directories removed mid-scan surface as lookup errors. Losing the root is fatal.
            Err(e) if is_vanished(&e) && !e.paths.contains(&watched_root) => {
                debug!("Watched path vanished: {:?}", e.paths);
                for path in e.paths {
                    let _ = dir_tx.send(DirChange::Vanished(path));
                }
            }
            Err(e) => {
                error!("Watch error: {:?}", e);
                let _ = err_tx.send(e);
            }
        };

        let watcher: Box<dyn Watcher + Send> = match self.backend {
            WatchBackend::Native => Box::new(RecommendedWatcher::new(handler, Config::default())?),
            WatchBackend::Poll { interval } => Box::new(PollWatcher::new(
                handler,
                Config::default().with_poll_interval(interval),
            )?),
        };

        let mut registry = Registry { watcher, dirs: BTreeSet::new() };
        for dir in self.filter.directories(&root) {
            registry.add(dir.clone()).map_err(|e| {
                WatchError::Setup(format!("cannot watch {}: {}", dir.display(), e))
            })?;
        }
        info!(
            "Watching path: {:?} ({} directories, {:?})",
            root,
            registry.dirs.len(),
            self.backend
        );

        let registry = Arc::new(Mutex::new(registry));
        spawn_registrar(Arc::downgrade(&registry), self.filter, dir_rx);

        Ok(WatcherHandle { registry, errors: err_rx, watched_files })
    }
}

/// Keeps the registry in step with directories created or removed under the root.
///
/// Watches are added off the backend's event thread, which `watch` may block on.
fn spawn_registrar(
    registry: Weak<Mutex<Registry>>,
    filter: PathFilter,
    mut changes: mpsc::UnboundedReceiver<DirChange>,
) {
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            let Some(registry) = registry.upgrade() else {
                break;
            };
            let mut guard = lock(&registry);
            match change {
                DirChange::Appeared(dir) => {
                    for dir in filter.directories(&dir) {
                        if let Err(e) = guard.add(dir.clone()) {
                            warn!("Cannot watch {}: {}", dir.display(), e);
                        }
                    }
                }
                DirChange::Vanished(path) => guard.remove(&path),
            }
        }
        debug!("Directory registrar stopped");
    });
}

fn is_vanished(err: &notify::Error) -> bool {
    match &err.kind {
        notify::ErrorKind::PathNotFound => true,
        notify::ErrorKind::Io(io) => io.kind() == std::io::ErrorKind::NotFound,
        _ => false,
    }
}

/// Directories that may need a watch added or dropped after `event`.
fn dir_changes(event: &Event) -> Vec<DirChange> {
    let appeared_or_vanished = |path: &PathBuf| {
        if path.is_dir() {
            DirChange::Appeared(path.clone())
        } else {
            DirChange::Vanished(path.clone())
        }
    };

    match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event
            .paths
            .iter()
            .filter(|p| p.is_dir())
            .map(|p| DirChange::Appeared(p.clone()))
            .collect(),
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.iter().map(|p| DirChange::Vanished(p.clone())).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => {
                let mut changes = vec![DirChange::Vanished(from.clone())];
                if to.is_dir() {
                    changes.push(DirChange::Appeared(to.clone()));
                }
                changes
            }
            paths => paths.iter().map(appeared_or_vanished).collect(),
        },
        EventKind::Modify(ModifyKind::Name(_)) => {
            event.paths.iter().map(appeared_or_vanished).collect()
        }
        _ => Vec::new(),
    }
}

/// Maps a notify event kind onto the changes the watch loop reacts to.
fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Renamed),
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)) => None,
        EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)) => {
            Some(ChangeKind::Updated)
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(ChangeKind::PermissionChanged),
        EventKind::Modify(_) => Some(ChangeKind::Updated),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

/// Converts a notify event into a [`ChangeEvent`], or `None` if it is filtered out.
pub(crate) fn translate(event: Event, filter: &PathFilter) -> Option<ChangeEvent> {
    let kind = classify(&event.kind)?;

    if let (EventKind::Modify(ModifyKind::Name(RenameMode::Both)), [from, to]) =
        (&event.kind, event.paths.as_slice())
    {
        if !filter.accepts(from) && !filter.accepts(to) {
            return None;
        }
        let kind =
            if from.parent() == to.parent() { ChangeKind::Renamed } else { ChangeKind::Moved };
        return Some(ChangeEvent::renamed(kind, from.clone(), to.clone()));
    }

    let path = event.paths.into_iter().find(|p| filter.accepts(p))?;
    debug!("{} {}", path.display(), kind);
    Some(ChangeEvent::for_path(kind, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn filter(root: &Path) -> PathFilter {
        PathFilter::new(root, &[".go".to_string(), ".mod".to_string()], &["vendor".to_string()])
    }

    fn event<P: AsRef<Path>>(kind: EventKind, paths: &[P]) -> Event {
        paths.iter().fold(Event::new(kind), |ev, p| ev.add_path(p.as_ref().to_path_buf()))
    }

    #[test]
    fn test_classify_event_kinds() {
        let root = Path::new("/src");
        let filter = filter(root);
        let main = root.join("main.go");

        let cases = [
            (EventKind::Create(CreateKind::File), Some(ChangeKind::Created)),
            (EventKind::Modify(ModifyKind::Data(DataChange::Content)), Some(ChangeKind::Updated)),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
                Some(ChangeKind::PermissionChanged),
            ),
            (
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
                Some(ChangeKind::Updated),
            ),
            (EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)), None),
            (EventKind::Remove(RemoveKind::File), Some(ChangeKind::Deleted)),
            (EventKind::Access(AccessKind::Any), None),
        ];

        for (kind, expected) in cases {
            let change = translate(event(kind, &[&main]), &filter);
            assert_eq!(change.map(|c| c.kind), expected, "kind {:?}", kind);
        }
    }

    #[test]
    fn test_rename_and_move() {
        let root = Path::new("/src");
        let filter = filter(root);
        let both = EventKind::Modify(ModifyKind::Name(RenameMode::Both));

        let renamed =
            translate(event(both, &[&root.join("a.go"), &root.join("b.go")]), &filter).unwrap();
        assert_eq!(renamed.kind, ChangeKind::Renamed);
        assert_eq!(renamed.old_path, Some(root.join("a.go")));
        assert_eq!(renamed.path, Some(root.join("b.go")));

        let moved =
            translate(event(both, &[&root.join("a.go"), &root.join("pkg/a.go")]), &filter).unwrap();
        assert_eq!(moved.kind, ChangeKind::Moved);

        // Renaming a temp file into a watched name still counts.
        let saved =
            translate(event(both, &[&root.join(".main.go.tmp"), &root.join("main.go")]), &filter);
        assert!(saved.is_some());

        let unwatched = event(both, &[&root.join("a.txt"), &root.join("b.txt")]);
        assert!(translate(unwatched, &filter).is_none());
    }

    #[test]
    fn test_filtered_paths_produce_no_event() {
        let root = Path::new("/src");
        let filter = filter(root);
        let kind = EventKind::Modify(ModifyKind::Data(DataChange::Content));

        assert!(translate(event(kind, &[&root.join("vendor/x.go")]), &filter).is_none());
        assert!(translate(event(kind, &[&root.join("notes.txt")]), &filter).is_none());
    }

    #[tokio::test]
    async fn test_poll_watcher_reports_changes_outside_ignored_dirs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        fs::create_dir_all(root.join("vendor")).unwrap();
        fs::write(root.join("vendor/x.go"), "package x").unwrap();
        fs::write(root.join("main.go"), "package main").unwrap();

        let queue = ChangeQueue::default();
        let handle = FileWatcher::new(filter(&root))
            .with_backend(WatchBackend::Poll { interval: Duration::from_millis(50) })
            .start(queue.clone())
            .unwrap();
        assert_eq!(handle.watched_files(), 1);

        fs::write(root.join("vendor/x.go"), "package x // edited").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(queue.try_recv().is_none());

        fs::write(root.join("main.go"), "package main // edited").unwrap();
        let change = tokio::time::timeout(Duration::from_secs(5), queue.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.path, Some(root.join("main.go")));
        assert!(change.mod_time.is_some());
        drop(handle);
    }

    async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_ignored_subtrees_are_not_registered() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        fs::write(root.join("main.go"), "package main").unwrap();
        fs::create_dir_all(root.join("pkg/api")).unwrap();
        for i in 0..300 {
            fs::create_dir_all(root.join(format!("node_modules/p{}/lib", i))).unwrap();
        }
        let filter = PathFilter::new(&root, &[".go".to_string()], &["node_modules".to_string()]);

        let handle = FileWatcher::new(filter).start(ChangeQueue::default()).unwrap();

        assert_eq!(
            handle.watched_dirs(),
            vec![root.clone(), root.join("pkg"), root.join("pkg/api")]
        );
    }

    #[tokio::test]
    async fn test_new_directories_are_registered() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        fs::write(root.join("main.go"), "package main").unwrap();
        let filter = PathFilter::new(&root, &[".go".to_string()], &["node_modules".to_string()]);

        let queue = ChangeQueue::default();
        let handle = FileWatcher::new(filter)
            .with_backend(WatchBackend::Poll { interval: Duration::from_millis(50) })
            .start(queue.clone())
            .unwrap();
        assert_eq!(handle.watched_dirs(), vec![root.clone()]);

        fs::create_dir_all(root.join("pkg/sub")).unwrap();
        fs::create_dir_all(root.join("web/node_modules/x")).unwrap();
        let sub = root.join("pkg/sub");
        assert!(wait_until(|| handle.watched_dirs().contains(&sub)).await);

        fs::write(sub.join("a.go"), "package sub").unwrap();
        let change = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let change = queue.recv().await.unwrap();
                if change.path == Some(sub.join("a.go")) {
                    return change;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(change.kind, ChangeKind::Created);
        assert!(!handle.watched_dirs().iter().any(|d| d.ends_with("node_modules")));

        fs::remove_dir_all(root.join("pkg")).unwrap();
        assert!(wait_until(|| handle.watched_dirs() == [root.clone(), root.join("web")]).await);
    }

    #[test]
    fn test_dir_changes_follow_directory_events() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("pkg");
        fs::create_dir(&dir).unwrap();
        let file = temp.path().join("main.go");
        fs::write(&file, "package main").unwrap();

        let created = event(EventKind::Create(CreateKind::Any), &[&dir, &file]);
        assert_eq!(dir_changes(&created), vec![DirChange::Appeared(dir.clone())]);

        let removed = event(EventKind::Remove(RemoveKind::Any), &[&dir]);
        assert_eq!(dir_changes(&removed), vec![DirChange::Vanished(dir.clone())]);

        let gone = temp.path().join("old");
        let renamed = event(EventKind::Modify(ModifyKind::Name(RenameMode::Both)), &[&gone, &dir]);
        assert_eq!(
            dir_changes(&renamed),
            vec![DirChange::Vanished(gone), DirChange::Appeared(dir.clone())]
        );

        let written = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &[&file]);
        assert!(dir_changes(&written).is_empty());
    }
}
