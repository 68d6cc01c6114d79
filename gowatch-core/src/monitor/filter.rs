//! Decides which paths are watched

use crate::paths::dirs_with_name;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Accepts paths ending in a watched suffix that are neither the excluded
/// build artifact nor inside an ignored directory.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    extensions: Vec<String>,
    ignored_names: Vec<String>,
    ignored_dirs: Vec<PathBuf>,
    excluded: Vec<PathBuf>,
}

impl PathFilter {
    /// Builds a filter for `root`, resolving the ignored directories present on disk.
    pub fn new(root: impl Into<PathBuf>, extensions: &[String], ignored_names: &[String]) -> Self {
        let root = root.into();
        let ignored_dirs = dirs_with_name(&root, ignored_names);
        debug!("Ignoring {} directories under {:?}", ignored_dirs.len(), root);

        Self {
            root,
            extensions: extensions.to_vec(),
            ignored_names: ignored_names.to_vec(),
            ignored_dirs,
            excluded: Vec::new(),
        }
    }

    /// Never reports `path`, e.g. the build output.
    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(path.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_watchable(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.excluded.iter().any(|p| p == path) {
            return true;
        }
        if self.ignored_dirs.iter().any(|dir| path.starts_with(dir)) {
            return true;
        }
        // Directories created after startup are matched by name.
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        let mut parents = rel.parent().into_iter().flat_map(Path::components);
        parents.any(|c| self.ignored_names.iter().any(|name| c.as_os_str() == name.as_str()))
    }

    pub fn accepts(&self, path: &Path) -> bool {
        self.is_watchable(path) && !self.is_ignored(path)
    }

    /// Lists the watched files currently under the root.
    pub fn enumerate(&self) -> Vec<PathBuf> {
        self.walk(&self.root)
            .filter(|entry| entry.file_type().is_file() && self.accepts(entry.path()))
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Lists `dir` and every directory below it outside the ignored subtrees.
    ///
    /// Empty when `dir` itself is ignored. The root is never ignored.
    pub fn directories(&self, dir: &Path) -> Vec<PathBuf> {
        if dir != self.root && (self.is_ignored_dir(dir) || self.is_ignored(dir)) {
            return Vec::new();
        }
        self.walk(dir)
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect()
    }

    fn walk<'a>(&'a self, dir: &Path) -> impl Iterator<Item = DirEntry> + 'a {
        WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !self.is_ignored_dir(entry.path())
            })
            .filter_map(|entry| entry.ok())
    }

    fn is_ignored_dir(&self, dir: &Path) -> bool {
        self.ignored_dirs.iter().any(|d| d == dir)
            || dir
                .file_name()
                .is_some_and(|name| self.ignored_names.iter().any(|n| name == n.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn project() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("vendor/lib")).unwrap();
        fs::create_dir_all(root.join("internal/api")).unwrap();
        fs::write(root.join("main.go"), "package main").unwrap();
        fs::write(root.join("go.mod"), "module example.com/app").unwrap();
        fs::write(root.join("README.md"), "# app").unwrap();
        fs::write(root.join("internal/api/api.go"), "package api").unwrap();
        fs::write(root.join("vendor/x.go"), "package x").unwrap();
        fs::write(root.join("vendor/lib/y.go"), "package lib").unwrap();
        temp
    }

    #[test]
    fn test_suffix_filter() {
        let filter = PathFilter::new("/src", &strings(&[".go", ".mod"]), &[]);

        assert!(filter.accepts(Path::new("/src/main.go")));
        assert!(filter.accepts(Path::new("/src/go.mod")));
        assert!(!filter.accepts(Path::new("/src/README.md")));
        assert!(!filter.accepts(Path::new("/src/main.go.swp")));
    }

    #[test]
    fn test_ignored_directory_prunes_subtree() {
        let temp = project();
        let root = temp.path();
        let filter = PathFilter::new(root, &strings(&[".go", ".mod"]), &strings(&["vendor"]));

        assert!(!filter.accepts(&root.join("vendor/x.go")));
        assert!(!filter.accepts(&root.join("vendor/lib/y.go")));
        assert!(filter.accepts(&root.join("internal/api/api.go")));
    }

    #[test]
    fn test_directories_created_later_are_ignored_by_name() {
        let temp = project();
        let root = temp.path();
        let filter = PathFilter::new(root, &strings(&[".go"]), &strings(&["node_modules"]));

        assert!(!filter.accepts(&root.join("web/node_modules/pkg/gen.go")));
        assert!(filter.accepts(&root.join("web/main.go")));
        // Only directory components count, not the file name itself.
        assert!(filter.accepts(&root.join("node_modules.go")));
    }

    #[test]
    fn test_output_artifact_is_excluded() {
        let filter = PathFilter::new("/src", &strings(&[".go", ""]), &[]).exclude("/src/app");

        assert!(!filter.accepts(Path::new("/src/app")));
        assert!(filter.accepts(Path::new("/src/main.go")));
    }

    #[test]
    fn test_enumerate_skips_ignored_trees() {
        let temp = project();
        let root = temp.path();
        let filter = PathFilter::new(root, &strings(&[".go", ".mod"]), &strings(&["vendor"]));

        let mut files = filter.enumerate();
        files.sort();

        assert_eq!(
            files,
            vec![root.join("go.mod"), root.join("internal/api/api.go"), root.join("main.go")]
        );
    }

    #[test]
    fn test_directories_skip_ignored_subtrees() {
        let temp = project();
        let root = temp.path();
        fs::create_dir_all(root.join("web/node_modules/pkg")).unwrap();
        let filter =
            PathFilter::new(root, &strings(&[".go"]), &strings(&["vendor", "node_modules"]));

        let mut dirs = filter.directories(root);
        dirs.sort();
        assert_eq!(
            dirs,
            vec![
                root.to_path_buf(),
                root.join("internal"),
                root.join("internal/api"),
                root.join("web")
            ]
        );

        assert_eq!(filter.directories(&root.join("internal")).len(), 2);
        assert!(filter.directories(&root.join("vendor")).is_empty());
        assert!(filter.directories(&root.join("vendor/lib")).is_empty());
        assert!(filter.directories(&root.join("web/node_modules/pkg")).is_empty());
    }
}
