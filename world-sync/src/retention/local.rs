//! Local archive pruning.

use crate::fs::archive::is_archive_name;
use crate::utils::Result;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// List archives in `dir`, oldest first by modification time.
pub fn list_local_archives(dir: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut archives = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !is_archive_name(&name.to_string_lossy()) {
            continue;
        }
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        archives.push((entry.path(), metadata.modified()?));
    }

    // Name breaks mtime ties so ordering is stable.
    archives.sort_by(|(a_path, a_time), (b_path, b_time)| {
        a_time.cmp(b_time).then_with(|| a_path.cmp(b_path))
    });

    Ok(archives)
}

/// Delete the oldest archives in `dir` until at most `keep` remain.
///
/// Returns the paths that were removed.
pub fn prune_local(dir: &Path, keep: usize) -> Result<Vec<PathBuf>> {
    let archives = list_local_archives(dir)?;
    let excess = archives.len().saturating_sub(keep);
    let mut removed = Vec::with_capacity(excess);

    for (path, _) in archives.into_iter().take(excess) {
        std::fs::remove_file(&path)?;
        debug!("Removed local archive {}", path.display());
        removed.push(path);
    }

    if !removed.is_empty() {
        info!(removed = removed.len(), keep, "Pruned local archives");
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use std::fs;
    use tempfile::TempDir;

    fn make_archives(dir: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                // Names sort opposite to mtime so the test catches name-based ordering.
                let path = dir.join(format!("world-20260101-{:06}.tar.zst", 999_999 - i));
                fs::write(&path, b"archive").unwrap();
                set_file_mtime(&path, FileTime::from_unix_time(1_700_000_000 + i as i64 * 60, 0))
                    .unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_prune_keeps_newest() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let created = make_archives(temp_dir.path(), 15);

        let removed = prune_local(temp_dir.path(), 10)?;

        assert_eq!(removed, created[..5].to_vec());
        for path in &created[5..] {
            assert!(path.exists(), "{} should remain", path.display());
        }
        assert_eq!(list_local_archives(temp_dir.path())?.len(), 10);
        Ok(())
    }

    #[test]
    fn test_prune_under_limit_is_noop() -> Result<()> {
        let temp_dir = TempDir::new()?;
        make_archives(temp_dir.path(), 4);

        assert!(prune_local(temp_dir.path(), 10)?.is_empty());
        assert_eq!(list_local_archives(temp_dir.path())?.len(), 4);
        Ok(())
    }

    #[test]
    fn test_prune_ignores_other_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        make_archives(temp_dir.path(), 3);
        fs::write(temp_dir.path().join("notes.txt"), b"keep me")?;
        fs::write(temp_dir.path().join(".world-sync.lock"), b"1")?;

        let removed = prune_local(temp_dir.path(), 1)?;

        assert_eq!(removed.len(), 2);
        assert!(temp_dir.path().join("notes.txt").exists());
        assert!(temp_dir.path().join(".world-sync.lock").exists());
        Ok(())
    }

    #[test]
    fn test_keep_zero_removes_everything() -> Result<()> {
        let temp_dir = TempDir::new()?;
        make_archives(temp_dir.path(), 3);

        assert_eq!(prune_local(temp_dir.path(), 0)?.len(), 3);
        assert!(list_local_archives(temp_dir.path())?.is_empty());
        Ok(())
    }
}
