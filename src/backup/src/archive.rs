//! Packs the staged export directory into a single `.tar.gz`.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use common::ErrorKind;
use flate2::Compression;
use flate2::write::GzEncoder;
use thiserror::Error;
use walkdir::WalkDir;

/// Operating-system housekeeping files that never belong in a backup.
const EXCLUDED_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// AppleDouble resource-fork sidecars (`._photo.jpg`).
const APPLE_DOUBLE_PREFIX: &str = "._";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to archive {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive {} is empty", path.display())]
    Empty { path: PathBuf },

    #[error("archive task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::Io { .. } | ArchiveError::Task(_) => ErrorKind::Io,
            ArchiveError::Empty { .. } => ErrorKind::EmptyResult,
        }
    }

    fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ArchiveError::Io { path, source }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub size: u64,
    /// Regular files packed, excluding directories.
    pub files: usize,
}

pub fn is_excluded(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    EXCLUDED_NAMES.contains(&name.as_ref()) || name.starts_with(APPLE_DOUBLE_PREFIX)
}

/// Archives `staging_root/dir_name` into `archive_path`. Entries are stored
/// under `dir_name/` in file-name order.
pub async fn create_archive(
    staging_root: &Path,
    dir_name: &str,
    archive_path: &Path,
) -> Result<ArchiveSummary, ArchiveError> {
    let root = staging_root.to_path_buf();
    let dir_name = dir_name.to_string();
    let target = archive_path.to_path_buf();

    let files =
        tokio::task::spawn_blocking(move || write_archive(&root, &dir_name, &target)).await??;

    let size = tokio::fs::metadata(archive_path)
        .await
        .map_err(ArchiveError::io(archive_path))?
        .len();
    if size == 0 {
        return Err(ArchiveError::Empty {
            path: archive_path.to_path_buf(),
        });
    }

    tracing::info!(
        archive = %archive_path.display(),
        files,
        size = %common::format::human_bytes(size),
        "archive created"
    );
    Ok(ArchiveSummary {
        path: archive_path.to_path_buf(),
        size,
        files,
    })
}

fn write_archive(root: &Path, dir_name: &str, archive_path: &Path) -> Result<usize, ArchiveError> {
    let source = root.join(dir_name);
    let file = File::create(archive_path).map_err(ArchiveError::io(archive_path))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut files = 0;
    let walker = WalkDir::new(&source)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry.file_name()));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.clone());
            ArchiveError::Io {
                path,
                source: e.into(),
            }
        })?;
        let path = entry.path();
        let Ok(name) = path.strip_prefix(root) else {
            continue;
        };

        if entry.file_type().is_dir() {
            builder
                .append_dir(name, path)
                .map_err(ArchiveError::io(path))?;
        } else if entry.file_type().is_file() {
            builder
                .append_path_with_name(path, name)
                .map_err(ArchiveError::io(path))?;
            files += 1;
        } else {
            tracing::debug!(path = %path.display(), "skipping non-regular file");
        }
    }

    let mut writer = builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(ArchiveError::io(archive_path))?;
    writer.flush().map_err(ArchiveError::io(archive_path))?;

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn entries(archive: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = entry
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string();
                let mut data = Vec::new();
                std::io::Read::read_to_end(&mut entry, &mut data).unwrap();
                (name, data)
            })
            .collect()
    }

    #[test]
    fn test_exclusions() {
        for name in [".DS_Store", "Thumbs.db", "desktop.ini", "._photo.jpg"] {
            assert!(is_excluded(OsStr::new(name)), "{name}");
        }
        for name in ["data.ndjson", "photo.jpg", "DS_Store", "x._y"] {
            assert!(!is_excluded(OsStr::new(name)), "{name}");
        }
    }

    #[tokio::test]
    async fn test_archive_preserves_layout_and_skips_housekeeping() {
        let staging = tempfile::tempdir().unwrap();
        let export = staging.path().join("proj-prod-ts");
        std::fs::create_dir_all(export.join("assets/nested")).unwrap();
        std::fs::write(export.join("data.ndjson"), b"{\"_id\":\"a\"}\n").unwrap();
        std::fs::write(export.join("assets/abc-1x1.png"), b"png").unwrap();
        std::fs::write(export.join("assets/nested/def.pdf"), b"pdf").unwrap();
        std::fs::write(export.join(".DS_Store"), b"junk").unwrap();
        std::fs::write(export.join("assets/._abc-1x1.png"), b"junk").unwrap();
        std::fs::write(export.join("assets/Thumbs.db"), b"junk").unwrap();

        let archive_path = staging.path().join("proj-prod-ts.tar.gz");
        let summary = create_archive(staging.path(), "proj-prod-ts", &archive_path)
            .await
            .unwrap();

        assert_eq!(summary.files, 3);
        assert!(summary.size > 0);

        let entries = entries(&archive_path);
        let names: Vec<_> = entries.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "proj-prod-ts",
                "proj-prod-ts/assets",
                "proj-prod-ts/assets/abc-1x1.png",
                "proj-prod-ts/assets/nested",
                "proj-prod-ts/assets/nested/def.pdf",
                "proj-prod-ts/data.ndjson",
            ]
        );
        let data = entries
            .iter()
            .find(|(name, _)| name == "proj-prod-ts/data.ndjson")
            .map(|(_, data)| data.clone())
            .unwrap();
        assert_eq!(data, b"{\"_id\":\"a\"}\n");
    }

    #[tokio::test]
    async fn test_missing_source_directory_is_io_error() {
        let staging = tempfile::tempdir().unwrap();
        let err = create_archive(
            staging.path(),
            "does-not-exist",
            &staging.path().join("out.tar.gz"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ArchiveError::Io { .. }));
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
