//! Scope resolution helpers
//!
//! Filesystem-facing pieces of session naming: finding the natural project
//! root for a working path, remote-protocol path localization, and
//! relativizing tracked paths against a scope root.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{MuxError, Result};

/// Remote-protocol paths look like `/method:user@host:/local/segment`.
static REMOTE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/[^/:]+:").unwrap());

/// Compute the natural root for a working path: the nearest enclosing
/// version-control root, or the path's own directory when none exists.
///
/// A path that is neither a usable directory nor a file inside one is a
/// configuration error, not a silent default.
pub fn natural_root(working_path: &Path) -> Result<PathBuf> {
    let dir = if working_path.is_dir() {
        working_path.to_path_buf()
    } else if working_path.is_file() {
        working_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| MuxError::NoScopeRoot(working_path.to_path_buf()))?
    } else {
        return Err(MuxError::NoScopeRoot(working_path.to_path_buf()));
    };

    let dir = dir
        .canonicalize()
        .map_err(|_| MuxError::NoScopeRoot(working_path.to_path_buf()))?;

    Ok(vcs_root(&dir).unwrap_or(dir))
}

/// Walk up from `dir` looking for a `.git` entry.
fn vcs_root(dir: &Path) -> Option<PathBuf> {
    let mut current = Some(dir);
    while let Some(d) = current {
        if d.join(".git").exists() {
            return Some(d.to_path_buf());
        }
        current = d.parent();
    }
    None
}

/// The directory a working path belongs to, canonicalized.
pub fn working_dir(working_path: &Path) -> Result<PathBuf> {
    let dir = if working_path.is_dir() {
        working_path
    } else if working_path.is_file() {
        working_path
            .parent()
            .ok_or_else(|| MuxError::NoScopeRoot(working_path.to_path_buf()))?
    } else {
        return Err(MuxError::NoScopeRoot(working_path.to_path_buf()));
    };
    dir.canonicalize()
        .map_err(|_| MuxError::NoScopeRoot(working_path.to_path_buf()))
}

/// Whether a path uses a remote-access protocol prefix.
pub fn is_remote_path(path: &str) -> bool {
    REMOTE_PREFIX.is_match(path)
}

/// Strip the remote-protocol prefix, keeping only the local filesystem
/// segment. Local paths pass through unchanged.
pub fn localize_path(path: &str) -> &str {
    if !is_remote_path(path) {
        return path;
    }
    match path.rfind(':') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Express `path` relative to `root` when it lies underneath it.
pub fn relativize(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
