//! World directory discovery and traversal.
//!
//! A Minecraft server root holds one directory per dimension (`world`,
//! `world_nether`, `world_the_end`) next to jars, logs and configs. Only the
//! prefixed directories are walked; every regular file below them is reported
//! with a path relative to the server root so an archive can be unpacked
//! straight over a fresh install.

use crate::utils::{Result, SyncError};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Exact file names to skip (e.g. `session.lock`)
    pub exclude_names: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            exclude_names: vec!["session.lock".to_string()],
        }
    }
}

/// Information about a file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the server root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,
}

/// Directories directly under `root` whose name starts with `prefix`, sorted.
///
/// Fails if `root` cannot be read or nothing matches.
pub fn find_world_dirs(root: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            dirs.push(entry.path());
        }
    }

    if dirs.is_empty() {
        return Err(SyncError::Archive(format!(
            "no directories starting with {:?} under {}",
            prefix,
            root.display()
        )));
    }

    dirs.sort();
    Ok(dirs)
}

/// Walk `dir` and collect its regular files, relative to `root`.
///
/// Entries come back in file-name order so archives are reproducible.
pub fn walk_directory(root: &Path, dir: &Path, options: &WalkOptions) -> Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(options.follow_links)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry?;

        // Only regular files go into the archive
        if !entry.file_type().is_file() {
            continue;
        }

        if is_excluded(&entry, &options.exclude_names) {
            continue;
        }

        let path = entry.path().to_path_buf();
        let relative_path = path
            .strip_prefix(root)
            .map_err(|_| {
                SyncError::Archive(format!("{} is outside {}", path.display(), root.display()))
            })?
            .to_path_buf();

        files.push(FileInfo {
            size: entry.metadata()?.len(),
            path,
            relative_path,
        });
    }

    Ok(files)
}

/// Walk every world directory under `root`.
pub fn walk_worlds(root: &Path, prefix: &str, options: &WalkOptions) -> Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    for dir in find_world_dirs(root, prefix)? {
        files.extend(walk_directory(root, &dir, options)?);
    }
    Ok(files)
}

fn is_excluded(entry: &DirEntry, names: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    names.iter().any(|name| *name == file_name)
}
