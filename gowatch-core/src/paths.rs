//! Output naming and directory helpers

use std::path::{MAIN_SEPARATOR, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Reports whether `s` is a major version path element such as `v2` or `v10`.
///
/// `v0` prefixes and a bare `v1` are not version elements, matching how module
/// paths are versioned.
pub fn is_version_element(s: &str) -> bool {
    let Some(digits) = s.strip_prefix('v') else {
        return false;
    };
    if digits.is_empty() || digits.starts_with('0') || digits == "1" {
        return false;
    }
    digits.bytes().all(|b| b.is_ascii_digit())
}

/// Derives the default build artifact name from a directory or module path.
///
/// `github.com/acme/server/v2` names the artifact `server`, not `v2`.
pub fn default_exec_name(path: &str) -> String {
    let mut segments = path.rsplit(|c| c == '/' || c == MAIN_SEPARATOR);
    let last = segments.next().unwrap_or_default();
    let name = if is_version_element(last) { segments.next().unwrap_or(last) } else { last };
    format!("{}{}", name, std::env::consts::EXE_SUFFIX)
}

/// Collects every directory under `root` whose base name is one of `names`.
///
/// A matched directory is not descended into, so nested directories with the
/// same name are reported once through their outermost ancestor.
pub fn dirs_with_name<S: AsRef<str>>(root: &Path, names: &[S]) -> Vec<PathBuf> {
    if names.is_empty() {
        return Vec::new();
    }

    let matches = |name: &str| names.iter().any(|n| n.as_ref() == name);
    let mut dirs = Vec::new();
    let mut walker = WalkDir::new(root).follow_links(false).into_iter();

    loop {
        let entry = match walker.next() {
            None => break,
            Some(Ok(entry)) => entry,
            Some(Err(e)) => {
                debug!("Skipping unreadable entry under {:?}: {}", root, e);
                continue;
            }
        };
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            continue;
        }
        if entry.file_name().to_str().is_some_and(matches) {
            trace!("Ignoring directory {:?}", entry.path());
            dirs.push(entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }

    dirs
}

/// Renders `path` relative to `base` when it lives below it.
pub fn display_path(path: &Path, base: &Path) -> PathBuf {
    match path.strip_prefix(base) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
        _ => path.to_path_buf(),
    }
}

/// True when the file at `path` was modified after `since`.
pub fn binary_modified_since(path: &Path, since: SystemTime) -> bool {
    std::fs::metadata(path).and_then(|m| m.modified()).map(|mtime| mtime > since).unwrap_or(false)
}
