//! Filesystem monitoring and change detection
//!
//! This module provides:
//! - Path filtering by suffix, ignored directory name and excluded artifact
//! - A bounded "latest wins" change queue
//! - A notify-backed watcher with native and polling backends

pub mod filter;
pub mod queue;
pub mod watcher;

pub use filter::PathFilter;
pub use queue::{ChangeQueue, QueueStats};
pub use watcher::{FileWatcher, WatcherHandle};

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    Renamed,
    PermissionChanged,
    Moved,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::PermissionChanged => "permission changed",
            Self::Moved => "moved",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One filesystem notification, or a synthetic rebuild request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// `None` for synthetic events.
    pub path: Option<PathBuf>,
    /// Previous location, set for renames and moves.
    pub old_path: Option<PathBuf>,
    /// Modification time of `path` when the event was observed.
    pub mod_time: Option<SystemTime>,
}

impl ChangeEvent {
    /// Event for a real path, stamped with the file's current modification time.
    pub fn for_path(kind: ChangeKind, path: PathBuf) -> Self {
        let mod_time = modified_time(&path);
        Self { kind, path: Some(path), old_path: None, mod_time }
    }

    /// Rename or move from `old_path` to `path`.
    pub fn renamed(kind: ChangeKind, old_path: PathBuf, path: PathBuf) -> Self {
        let mut event = Self::for_path(kind, path);
        event.old_path = Some(old_path);
        event
    }

    /// Request for an unconditional rebuild, without filesystem payload.
    pub fn synthetic() -> Self {
        Self { kind: ChangeKind::Created, path: None, old_path: None, mod_time: None }
    }

    pub fn is_synthetic(&self) -> bool {
        self.path.is_none()
    }
}

pub(crate) fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
