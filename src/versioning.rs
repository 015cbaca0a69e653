//! Pre-overwrite archival into `.versions/`.

use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};

/// Archive directory name inside a mirror root.
pub const VERSIONS_DIR: &str = ".versions";

/// Audit record of one archived file. Never read back by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSnapshot {
    pub original_relative_path: PathBuf,
    pub archived_path: PathBuf,
    pub archived_at: DateTime<Local>,
}

/// Moves the file at `live_path` into `root/.versions/<name>_<YYYYmmdd_HHMMSS>`.
///
/// Returns `Ok(None)` when there is nothing to archive. If a snapshot with the
/// same second-resolution name already exists a `_1`, `_2`, ... suffix is added.
///
/// # Arguments
///
/// * `root` - Mirror root holding `.versions/`
/// * `live_path` - File about to be overwritten
/// * `now` - Time used in the archived name
///
/// # Returns
///
/// The snapshot record, `None` if nothing was moved, or the I/O error.
pub async fn archive_existing(
    root: &Path,
    live_path: &Path,
    now: DateTime<Local>,
) -> io::Result<Option<VersionSnapshot>> {
    match tokio::fs::metadata(live_path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    }

    let versions = root.join(VERSIONS_DIR);
    tokio::fs::create_dir_all(&versions).await?;

    let base_name = live_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stamp = now.format("%Y%m%d_%H%M%S");

    let mut archived_path = versions.join(format!("{}_{}", base_name, stamp));
    let mut suffix = 1u32;
    while tokio::fs::try_exists(&archived_path).await? {
        archived_path = versions.join(format!("{}_{}_{}", base_name, stamp, suffix));
        suffix += 1;
    }

    tokio::fs::rename(live_path, &archived_path).await?;

    Ok(Some(VersionSnapshot {
        original_relative_path: live_path
            .strip_prefix(root)
            .unwrap_or(live_path)
            .to_path_buf(),
        archived_path,
        archived_at: now,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 5, h, m, s)
            .single()
            .unwrap()
    }

    #[tokio::test]
    async fn moves_file_under_timestamped_name() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("docs/report.pdf");
        std::fs::create_dir_all(live.parent().unwrap()).unwrap();
        std::fs::write(&live, b"v1").unwrap();

        let snapshot = archive_existing(dir.path(), &live, at(9, 8, 7))
            .await
            .unwrap()
            .unwrap();

        assert!(!live.exists());
        assert_eq!(
            snapshot.archived_path,
            dir.path().join(".versions/report.pdf_20240305_090807")
        );
        assert_eq!(snapshot.original_relative_path, PathBuf::from("docs/report.pdf"));
        assert_eq!(std::fs::read(&snapshot.archived_path).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn missing_file_is_not_archived() {
        let dir = tempfile::tempdir().unwrap();
        let result = archive_existing(dir.path(), &dir.path().join("nope"), at(1, 2, 3))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(!dir.path().join(VERSIONS_DIR).exists());
    }

    #[tokio::test]
    async fn same_second_snapshots_stay_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("a.txt");

        std::fs::write(&live, b"one").unwrap();
        let first = archive_existing(dir.path(), &live, at(1, 2, 3)).await.unwrap().unwrap();
        std::fs::write(&live, b"two").unwrap();
        let second = archive_existing(dir.path(), &live, at(1, 2, 3)).await.unwrap().unwrap();

        assert_ne!(first.archived_path, second.archived_path);
        assert_eq!(std::fs::read(&first.archived_path).unwrap(), b"one");
        assert_eq!(std::fs::read(&second.archived_path).unwrap(), b"two");
    }
}
