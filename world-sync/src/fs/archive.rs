//! World archive creation (tar stream, zstd compressed).

use super::walker::{walk_worlds, WalkOptions};
use crate::utils::{Result, SyncError};
use chrono::{DateTime, TimeZone};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const ARCHIVE_PREFIX: &str = "world-";
pub const ARCHIVE_EXTENSION: &str = ".tar.zst";

/// Archive creation settings
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Directory name prefix under the server root
    pub prefix: String,

    pub walk: WalkOptions,

    /// zstd level (1-22)
    pub compression_level: i32,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            prefix: "world".to_string(),
            walk: WalkOptions::default(),
            compression_level: 3,
        }
    }
}

/// What ended up in a finished archive.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub files: usize,

    /// Sum of the source file sizes
    pub source_bytes: u64,

    /// Size of the compressed archive on disk
    pub archive_bytes: u64,
}

/// `world-YYYYMMDD-HHMMSS.tar.zst` for the given instant.
pub fn archive_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}{}{}", ARCHIVE_PREFIX, at.format("%Y%m%d-%H%M%S"), ARCHIVE_EXTENSION)
}

pub fn is_archive_name(name: &str) -> bool {
    name.starts_with(ARCHIVE_PREFIX) && name.ends_with(ARCHIVE_EXTENSION)
}

/// Archive every world directory under `source_root` into `output_path`.
///
/// The archive is written beside `output_path` with a `.partial` suffix and
/// renamed once complete, so a failed run never leaves a truncated archive.
pub fn create_archive(
    source_root: &Path,
    output_path: &Path,
    options: &ArchiveOptions,
) -> Result<ArchiveSummary> {
    let files = walk_worlds(source_root, &options.prefix, &options.walk)?;
    let source_bytes: u64 = files.iter().map(|f| f.size).sum();

    info!(
        "Archiving {} files ({} bytes) from {}",
        files.len(),
        source_bytes,
        source_root.display()
    );

    let partial = partial_path(output_path);
    let written = write_tar_zst(&partial, options.compression_level, |builder| {
        for file in &files {
            builder
                .append_path_with_name(&file.path, &file.relative_path)
                .map_err(|e| {
                    SyncError::Archive(format!("failed to add {}: {}", file.path.display(), e))
                })?;
        }
        Ok(())
    });

    if let Err(e) = written.and_then(|()| std::fs::rename(&partial, output_path).map_err(SyncError::from)) {
        if let Err(cleanup) = std::fs::remove_file(&partial) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial archive {}: {}", partial.display(), cleanup);
            }
        }
        return Err(e);
    }

    let archive_bytes = std::fs::metadata(output_path)?.len();
    info!(
        "Created archive {} ({} bytes compressed)",
        output_path.display(),
        archive_bytes
    );

    Ok(ArchiveSummary {
        path: output_path.to_path_buf(),
        files: files.len(),
        source_bytes,
        archive_bytes,
    })
}

fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn write_tar_zst<F>(path: &Path, level: i32, fill: F) -> Result<()>
where
    F: FnOnce(&mut tar::Builder<zstd::Encoder<'static, File>>) -> Result<()>,
{
    let file = File::create(path)?;
    let encoder = zstd::Encoder::new(file, level)?;
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    fill(&mut builder)?;

    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use std::collections::BTreeMap;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn read_archive(path: &Path) -> BTreeMap<String, Vec<u8>> {
        let decoder = zstd::Decoder::new(File::open(path).unwrap()).unwrap();
        let mut archive = tar::Archive::new(decoder);
        let mut entries = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            entries.insert(name, data);
        }
        entries
    }

    #[test]
    fn test_archive_reproduces_world_files() -> Result<()> {
        let server = TempDir::new()?;
        let out = TempDir::new()?;
        let root = server.path();

        fs::create_dir_all(root.join("world/region"))?;
        fs::create_dir_all(root.join("world_nether"))?;
        fs::create_dir_all(root.join("plugins"))?;
        fs::write(root.join("world/level.dat"), b"\x0a\x00\x00level")?;
        fs::write(root.join("world/session.lock"), b"lock")?;
        fs::write(root.join("world/region/r.0.0.mca"), vec![7u8; 10_000])?;
        fs::write(root.join("world_nether/x.mca"), b"nether")?;
        fs::write(root.join("plugins/config.yml"), b"ignored")?;

        let output = out.path().join("world-test.tar.zst");
        let summary = create_archive(root, &output, &ArchiveOptions::default())?;

        assert_eq!(summary.files, 3);
        assert!(summary.archive_bytes > 0);

        let entries = read_archive(&output);
        let names: Vec<_> = entries.keys().cloned().collect();
        assert_eq!(names, vec!["world/level.dat", "world/region/r.0.0.mca", "world_nether/x.mca"]);
        assert_eq!(entries["world/level.dat"], b"\x0a\x00\x00level");
        assert_eq!(entries["world/region/r.0.0.mca"], vec![7u8; 10_000]);
        assert_eq!(entries["world_nether/x.mca"], b"nether");

        // Source untouched
        assert!(root.join("world/session.lock").exists());
        Ok(())
    }

    #[test]
    fn test_custom_exclusions() -> Result<()> {
        let server = TempDir::new()?;
        let out = TempDir::new()?;
        fs::create_dir_all(server.path().join("world"))?;
        fs::write(server.path().join("world/level.dat"), b"level")?;
        fs::write(server.path().join("world/uid.dat"), b"uid")?;

        let options = ArchiveOptions {
            walk: WalkOptions {
                follow_links: false,
                exclude_names: vec!["uid.dat".to_string()],
            },
            ..ArchiveOptions::default()
        };
        let output = out.path().join("world-test.tar.zst");
        create_archive(server.path(), &output, &options)?;

        let entries = read_archive(&output);
        assert!(entries.contains_key("world/level.dat"));
        assert!(!entries.contains_key("world/uid.dat"));
        Ok(())
    }

    #[test]
    fn test_no_worlds_leaves_nothing_behind() -> Result<()> {
        let server = TempDir::new()?;
        let out = TempDir::new()?;
        fs::create_dir(server.path().join("logs"))?;

        let output = out.path().join("world-test.tar.zst");
        assert!(create_archive(server.path(), &output, &ArchiveOptions::default()).is_err());

        assert_eq!(fs::read_dir(out.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_missing_source_fails() -> Result<()> {
        let out = TempDir::new()?;
        let output = out.path().join("world-test.tar.zst");

        let err = create_archive(Path::new("/nonexistent/server"), &output, &ArchiveOptions::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());
        Ok(())
    }

    #[test]
    fn test_unwritable_output_cleans_up() -> Result<()> {
        let server = TempDir::new()?;
        fs::create_dir_all(server.path().join("world"))?;
        fs::write(server.path().join("world/level.dat"), b"level")?;

        let output = server.path().join("missing-dir/world-test.tar.zst");
        assert!(create_archive(server.path(), &output, &ArchiveOptions::default()).is_err());
        assert!(!server.path().join("missing-dir").exists());
        Ok(())
    }

    #[test]
    fn test_archive_name() {
        let naive = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let at = Utc.from_utc_datetime(&naive);
        let name = archive_name(&at);
        assert_eq!(name, "world-20261019-030405.tar.zst");
        assert!(is_archive_name(&name));
        assert!(!is_archive_name("world-20261019-030405.tar.zst.partial"));
        assert!(!is_archive_name("notes.txt"));
    }
}
